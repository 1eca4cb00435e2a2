//! Shared fixtures for unit tests.

use crate::config::ServerConfig;
use crate::connections::{drain, InMemoryConnections, Outbound};
use crate::messages::ServerMessage;
use crate::model::{
    MultiverseRecord, NewSeed, PlayerLocation, PlayerRecord, ScopeKey, Seed, SeedId, UberStateMap, UniverseRecord,
    WorldRecord, WorldSeedId,
};
use crate::storage::{MemoryStorage, Storage, StorageError};
use crate::sync::StateSynchronization;
use crate::HandlerServices;
use async_trait::async_trait;
use multiverse_event_system::{MultiverseId, PlayerId, UniverseId, WorldId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// In-memory collaborators plus the outboxes of every connected test player.
pub(crate) struct Fixture {
    pub storage: Arc<MemoryStorage>,
    pub connections: Arc<InMemoryConnections>,
    pub sync: Arc<StateSynchronization>,
    pub config: ServerConfig,
    outboxes: HashMap<PlayerId, UnboundedReceiver<Outbound>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let connections = Arc::new(InMemoryConnections::new());
        let sync = Arc::new(StateSynchronization::new(storage.clone(), connections.clone()));
        Self {
            storage,
            connections,
            sync,
            config,
            outboxes: HashMap::new(),
        }
    }

    pub fn services(&self) -> HandlerServices {
        HandlerServices {
            storage: self.storage.clone(),
            connections: self.connections.clone(),
            sync: self.sync.clone(),
            seed_generator: None,
            config: Arc::new(self.config.clone()),
        }
    }

    pub async fn multiverse(&self, game_handler_type: i32) -> MultiverseRecord {
        self.storage.create_multiverse(game_handler_type).await.unwrap()
    }

    pub async fn universe(&self, multiverse: MultiverseId) -> UniverseRecord {
        self.storage.create_universe(multiverse).await.unwrap()
    }

    pub async fn world(&self, universe: UniverseId, name: &str) -> WorldRecord {
        self.storage.create_world(universe, name).await.unwrap()
    }

    /// Creates a player on `world` and opens their game connection.
    pub async fn player(&mut self, world: WorldId, name: &str) -> PlayerId {
        let player = PlayerId::new();
        self.storage.upsert_player(player, name).await.unwrap();
        self.storage.add_player_to_world(player, world).await.unwrap();
        let outbox = self.connections.connect(player);
        self.outboxes.insert(player, outbox);
        player
    }

    pub fn disconnect(&mut self, player: PlayerId) {
        self.connections.disconnect(player);
        self.outboxes.remove(&player);
    }

    /// Everything sent to `player` since the last call.
    pub fn received(&mut self, player: PlayerId) -> Vec<ServerMessage> {
        self.outboxes.get_mut(&player).map(drain).unwrap_or_default()
    }

    pub fn clear_outboxes(&mut self) {
        for outbox in self.outboxes.values_mut() {
            drain(outbox);
        }
    }
}

/// [`MemoryStorage`] whose uber state writes can be made to fail.
pub(crate) struct FlakyStorage {
    inner: Arc<MemoryStorage>,
    reject_uber_writes: AtomicBool,
}

impl FlakyStorage {
    pub fn new(inner: Arc<MemoryStorage>) -> Self {
        Self {
            inner,
            reject_uber_writes: AtomicBool::new(false),
        }
    }

    pub fn reject_uber_writes(&self, reject: bool) {
        self.reject_uber_writes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn create_multiverse(&self, game_handler_type: i32) -> Result<MultiverseRecord, StorageError> {
        self.inner.create_multiverse(game_handler_type).await
    }

    async fn find_multiverse(&self, id: MultiverseId) -> Result<MultiverseRecord, StorageError> {
        self.inner.find_multiverse(id).await
    }

    async fn create_universe(&self, multiverse: MultiverseId) -> Result<UniverseRecord, StorageError> {
        self.inner.create_universe(multiverse).await
    }

    async fn create_world(&self, universe: UniverseId, name: &str) -> Result<WorldRecord, StorageError> {
        self.inner.create_world(universe, name).await
    }

    async fn find_world(&self, id: WorldId) -> Result<WorldRecord, StorageError> {
        self.inner.find_world(id).await
    }

    async fn delete_world(&self, id: WorldId) -> Result<WorldRecord, StorageError> {
        self.inner.delete_world(id).await
    }

    async fn upsert_player(&self, id: PlayerId, name: &str) -> Result<PlayerRecord, StorageError> {
        self.inner.upsert_player(id, name).await
    }

    async fn find_player(&self, id: PlayerId) -> Result<PlayerRecord, StorageError> {
        self.inner.find_player(id).await
    }

    async fn add_player_to_world(&self, player: PlayerId, world: WorldId) -> Result<PlayerLocation, StorageError> {
        self.inner.add_player_to_world(player, world).await
    }

    async fn remove_player(&self, player: PlayerId) -> Result<Option<PlayerLocation>, StorageError> {
        self.inner.remove_player(player).await
    }

    async fn player_location(&self, player: PlayerId) -> Result<Option<PlayerLocation>, StorageError> {
        self.inner.player_location(player).await
    }

    async fn move_worlds_to_universe(&self, worlds: &[WorldId], universe: UniverseId) -> Result<(), StorageError> {
        self.inner.move_worlds_to_universe(worlds, universe).await
    }

    async fn set_world_seed(&self, world: WorldId, seed: Option<WorldSeedId>) -> Result<(), StorageError> {
        self.inner.set_world_seed(world, seed).await
    }

    async fn set_game_handler_active(&self, multiverse: MultiverseId, active: bool) -> Result<(), StorageError> {
        self.inner.set_game_handler_active(multiverse, active).await
    }

    async fn set_game_handler_state(&self, multiverse: MultiverseId, state: Option<String>) -> Result<(), StorageError> {
        self.inner.set_game_handler_state(multiverse, state).await
    }

    async fn load_uber_state(&self, key: ScopeKey) -> Result<UberStateMap, StorageError> {
        self.inner.load_uber_state(key).await
    }

    async fn store_uber_states(&self, writes: &[(ScopeKey, UberStateMap)]) -> Result<(), StorageError> {
        if self.reject_uber_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Conflict("uber state write rejected".to_string()));
        }
        self.inner.store_uber_states(writes).await
    }

    async fn create_seed(&self, seed: NewSeed) -> Result<Seed, StorageError> {
        self.inner.create_seed(seed).await
    }

    async fn find_seed(&self, id: SeedId) -> Result<Seed, StorageError> {
        self.inner.find_seed(id).await
    }
}

/// Text of every `PrintText` message in `messages`.
pub(crate) fn texts(messages: &[ServerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| match message {
            ServerMessage::PrintText(print) => Some(print.text.clone()),
            _ => None,
        })
        .collect()
}

/// Values of every uber state update in `messages`.
pub(crate) fn uber_updates(messages: &[ServerMessage]) -> Vec<(multiverse_event_system::UberId, f64)> {
    messages
        .iter()
        .filter_map(|message| match message {
            ServerMessage::UberStateBatchUpdate(batch) => Some(batch.pairs()),
            _ => None,
        })
        .flatten()
        .collect()
}
