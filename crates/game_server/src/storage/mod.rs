//! # Storage Collaborator
//!
//! The backend does not own durable storage; it talks to it through the
//! [`Storage`] trait. Every method is one transaction: implementations must
//! apply all of its writes or none, and must never expose a partially
//! applied write to a concurrent caller.
//!
//! [`MemoryStorage`] is the in-process implementation used by the binary
//! and by tests.

mod memory;

pub use memory::MemoryStorage;

use crate::model::{
    MultiverseRecord, NewSeed, PlayerLocation, PlayerRecord, ScopeKey, Seed, SeedId, UberStateMap,
    UniverseRecord, WorldRecord, WorldSeedId,
};
use async_trait::async_trait;
use multiverse_event_system::{MultiverseId, PlayerId, UniverseId, WorldId};

/// Errors reported by a storage implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The transaction conflicts with the current contents
    #[error("Storage conflict: {0}")]
    Conflict(String),
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        StorageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Transactional access to multiverse, world, player, uber state and seed records.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn create_multiverse(&self, game_handler_type: i32) -> Result<MultiverseRecord, StorageError>;

    async fn find_multiverse(&self, id: MultiverseId) -> Result<MultiverseRecord, StorageError>;

    async fn create_universe(&self, multiverse: MultiverseId) -> Result<UniverseRecord, StorageError>;

    async fn create_world(&self, universe: UniverseId, name: &str) -> Result<WorldRecord, StorageError>;

    async fn find_world(&self, id: WorldId) -> Result<WorldRecord, StorageError>;

    /// Deletes a world, its memberships and its own uber state.
    async fn delete_world(&self, id: WorldId) -> Result<WorldRecord, StorageError>;

    /// Creates or renames a player.
    async fn upsert_player(&self, id: PlayerId, name: &str) -> Result<PlayerRecord, StorageError>;

    async fn find_player(&self, id: PlayerId) -> Result<PlayerRecord, StorageError>;

    /// Puts a player into a world, leaving whatever world they played on before.
    async fn add_player_to_world(&self, player: PlayerId, world: WorldId) -> Result<PlayerLocation, StorageError>;

    /// Removes a player from their world. Returns where they were, if anywhere.
    async fn remove_player(&self, player: PlayerId) -> Result<Option<PlayerLocation>, StorageError>;

    async fn player_location(&self, player: PlayerId) -> Result<Option<PlayerLocation>, StorageError>;

    /// Reassigns worlds to a universe of the same multiverse as one transaction.
    async fn move_worlds_to_universe(&self, worlds: &[WorldId], universe: UniverseId) -> Result<(), StorageError>;

    async fn set_world_seed(&self, world: WorldId, seed: Option<WorldSeedId>) -> Result<(), StorageError>;

    async fn set_game_handler_active(&self, multiverse: MultiverseId, active: bool) -> Result<(), StorageError>;

    async fn set_game_handler_state(&self, multiverse: MultiverseId, state: Option<String>) -> Result<(), StorageError>;

    /// Canonical values of one scope. Unknown scopes are empty, not missing.
    async fn load_uber_state(&self, key: ScopeKey) -> Result<UberStateMap, StorageError>;

    /// Merges entries into several scopes as one transaction. Entries not
    /// mentioned keep their stored value.
    async fn store_uber_states(&self, writes: &[(ScopeKey, UberStateMap)]) -> Result<(), StorageError>;

    async fn create_seed(&self, seed: NewSeed) -> Result<Seed, StorageError>;

    async fn find_seed(&self, id: SeedId) -> Result<Seed, StorageError>;
}
