//! Data model of the multiverse backend.
//!
//! Records are plain snapshots handed out by the [`Storage`](crate::storage::Storage)
//! collaborator. Holding a record never locks anything; re-read it after any
//! suspension point when up-to-date membership matters.

use multiverse_event_system::{MultiverseId, PlayerId, UberId, UniverseId, WorldId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Progress values of one replica (or one shared scope), keyed by [`UberId`].
pub type UberStateMap = BTreeMap<UberId, f64>;

pub type SeedId = u64;
pub type WorldSeedId = u64;

/// Identifies one canonical uber state store: a World's own values, or the
/// values shared by a Universe or by the whole Multiverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScopeKey {
    World(WorldId),
    Universe(UniverseId),
    Multiverse(MultiverseId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
}

/// One progress replica and the players playing on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldRecord {
    pub id: WorldId,
    pub universe_id: UniverseId,
    pub multiverse_id: MultiverseId,
    pub name: String,
    pub members: BTreeSet<PlayerId>,
    pub seed_id: Option<WorldSeedId>,
}

/// A team of worlds sharing progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseRecord {
    pub id: UniverseId,
    pub multiverse_id: MultiverseId,
    pub worlds: Vec<WorldRecord>,
}

impl UniverseRecord {
    pub fn members(&self) -> BTreeSet<PlayerId> {
        self.worlds
            .iter()
            .flat_map(|world| world.members.iter().copied())
            .collect()
    }
}

/// One game session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiverseRecord {
    pub id: MultiverseId,
    /// Mode code of the game handler driving this session
    pub game_handler_type: i32,
    pub game_handler_active: bool,
    /// Serialized handler snapshot, written when the handler is disposed
    pub game_handler_state: Option<String>,
    pub universes: Vec<UniverseRecord>,
}

impl MultiverseRecord {
    /// All worlds, ordered by universe then world id.
    pub fn worlds(&self) -> impl Iterator<Item = &WorldRecord> {
        self.universes.iter().flat_map(|universe| universe.worlds.iter())
    }

    pub fn world(&self, id: WorldId) -> Option<&WorldRecord> {
        self.worlds().find(|world| world.id == id)
    }

    pub fn universe(&self, id: UniverseId) -> Option<&UniverseRecord> {
        self.universes.iter().find(|universe| universe.id == id)
    }

    /// The oldest world of the session.
    pub fn first_world(&self) -> Option<&WorldRecord> {
        self.worlds().min_by_key(|world| world.id)
    }

    pub fn world_of(&self, player: PlayerId) -> Option<&WorldRecord> {
        self.worlds().find(|world| world.members.contains(&player))
    }

    pub fn members(&self) -> BTreeSet<PlayerId> {
        self.worlds()
            .flat_map(|world| world.members.iter().copied())
            .collect()
    }
}

/// Where a player currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLocation {
    pub multiverse_id: MultiverseId,
    pub universe_id: UniverseId,
    pub world_id: WorldId,
}

/// Generated starting content for a group of worlds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub id: SeedId,
    /// Generation request the seed was produced from
    pub config: serde_json::Value,
    pub creator: Option<PlayerId>,
    pub spoiler: Option<String>,
    pub world_seeds: Vec<WorldSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSeed {
    pub id: WorldSeedId,
    pub world_index: usize,
    pub content: String,
}

/// Input of [`Storage::create_seed`](crate::storage::Storage::create_seed).
#[derive(Debug, Clone, PartialEq)]
pub struct NewSeed {
    pub config: serde_json::Value,
    pub creator: Option<PlayerId>,
    pub spoiler: Option<String>,
    pub seed_files: Vec<String>,
}
