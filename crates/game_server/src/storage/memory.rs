use super::{Storage, StorageError};
use crate::model::{
    MultiverseRecord, NewSeed, PlayerLocation, PlayerRecord, ScopeKey, Seed, SeedId, UberStateMap,
    UniverseRecord, WorldRecord, WorldSeed, WorldSeedId,
};
use async_trait::async_trait;
use multiverse_event_system::{MultiverseId, PlayerId, UniverseId, WorldId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug)]
struct MultiverseRow {
    game_handler_type: i32,
    game_handler_active: bool,
    game_handler_state: Option<String>,
}

#[derive(Debug)]
struct WorldRow {
    universe_id: UniverseId,
    name: String,
    seed_id: Option<WorldSeedId>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    multiverses: BTreeMap<MultiverseId, MultiverseRow>,
    universes: BTreeMap<UniverseId, MultiverseId>,
    worlds: BTreeMap<WorldId, WorldRow>,
    memberships: BTreeMap<PlayerId, WorldId>,
    players: HashMap<PlayerId, String>,
    uber_states: HashMap<ScopeKey, UberStateMap>,
    seeds: BTreeMap<SeedId, Seed>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn multiverse_of_universe(&self, universe: UniverseId) -> Result<MultiverseId, StorageError> {
        self.universes
            .get(&universe)
            .copied()
            .ok_or_else(|| StorageError::not_found("universe", universe))
    }

    fn world_record(&self, id: WorldId) -> Result<WorldRecord, StorageError> {
        let row = self.worlds.get(&id).ok_or_else(|| StorageError::not_found("world", id))?;
        let multiverse_id = self.multiverse_of_universe(row.universe_id)?;
        let members = self
            .memberships
            .iter()
            .filter(|(_, world)| **world == id)
            .map(|(player, _)| *player)
            .collect::<BTreeSet<_>>();

        Ok(WorldRecord {
            id,
            universe_id: row.universe_id,
            multiverse_id,
            name: row.name.clone(),
            members,
            seed_id: row.seed_id,
        })
    }

    fn universe_record(&self, id: UniverseId) -> Result<UniverseRecord, StorageError> {
        let multiverse_id = self.multiverse_of_universe(id)?;
        let worlds = self
            .worlds
            .iter()
            .filter(|(_, row)| row.universe_id == id)
            .map(|(world_id, _)| self.world_record(*world_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UniverseRecord {
            id,
            multiverse_id,
            worlds,
        })
    }

    fn multiverse_record(&self, id: MultiverseId) -> Result<MultiverseRecord, StorageError> {
        let row = self
            .multiverses
            .get(&id)
            .ok_or_else(|| StorageError::not_found("multiverse", id))?;
        let universes = self
            .universes
            .iter()
            .filter(|(_, multiverse)| **multiverse == id)
            .map(|(universe_id, _)| self.universe_record(*universe_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MultiverseRecord {
            id,
            game_handler_type: row.game_handler_type,
            game_handler_active: row.game_handler_active,
            game_handler_state: row.game_handler_state.clone(),
            universes,
        })
    }

    fn location_of(&self, player: PlayerId) -> Result<Option<PlayerLocation>, StorageError> {
        let Some(world_id) = self.memberships.get(&player).copied() else {
            return Ok(None);
        };
        let row = self
            .worlds
            .get(&world_id)
            .ok_or_else(|| StorageError::not_found("world", world_id))?;
        Ok(Some(PlayerLocation {
            multiverse_id: self.multiverse_of_universe(row.universe_id)?,
            universe_id: row.universe_id,
            world_id,
        }))
    }

    fn multiverse_row_mut(&mut self, id: MultiverseId) -> Result<&mut MultiverseRow, StorageError> {
        self.multiverses
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("multiverse", id))
    }
}

/// In-memory [`Storage`] implementation.
///
/// All tables live behind one `RwLock`; every trait method takes the lock
/// exactly once, which makes each call a transaction.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_multiverse(&self, game_handler_type: i32) -> Result<MultiverseRecord, StorageError> {
        let mut tables = self.tables.write().await;
        let id = MultiverseId(tables.next_id());
        tables.multiverses.insert(
            id,
            MultiverseRow {
                game_handler_type,
                game_handler_active: false,
                game_handler_state: None,
            },
        );
        info!("🌌 Created multiverse {} with handler type {}", id, game_handler_type);
        tables.multiverse_record(id)
    }

    async fn find_multiverse(&self, id: MultiverseId) -> Result<MultiverseRecord, StorageError> {
        self.tables.read().await.multiverse_record(id)
    }

    async fn create_universe(&self, multiverse: MultiverseId) -> Result<UniverseRecord, StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.multiverses.contains_key(&multiverse) {
            return Err(StorageError::not_found("multiverse", multiverse));
        }
        let id = UniverseId(tables.next_id());
        tables.universes.insert(id, multiverse);
        tables.universe_record(id)
    }

    async fn create_world(&self, universe: UniverseId, name: &str) -> Result<WorldRecord, StorageError> {
        let mut tables = self.tables.write().await;
        tables.multiverse_of_universe(universe)?;
        let id = WorldId(tables.next_id());
        tables.worlds.insert(
            id,
            WorldRow {
                universe_id: universe,
                name: name.to_string(),
                seed_id: None,
            },
        );
        tables.world_record(id)
    }

    async fn find_world(&self, id: WorldId) -> Result<WorldRecord, StorageError> {
        self.tables.read().await.world_record(id)
    }

    async fn delete_world(&self, id: WorldId) -> Result<WorldRecord, StorageError> {
        let mut tables = self.tables.write().await;
        let record = tables.world_record(id)?;
        tables.worlds.remove(&id);
        tables.memberships.retain(|_, world| *world != id);
        tables.uber_states.remove(&ScopeKey::World(id));
        info!("🗑️ Deleted world {} '{}'", id, record.name);
        Ok(record)
    }

    async fn upsert_player(&self, id: PlayerId, name: &str) -> Result<PlayerRecord, StorageError> {
        let mut tables = self.tables.write().await;
        tables.players.insert(id, name.to_string());
        Ok(PlayerRecord {
            id,
            name: name.to_string(),
        })
    }

    async fn find_player(&self, id: PlayerId) -> Result<PlayerRecord, StorageError> {
        let tables = self.tables.read().await;
        tables
            .players
            .get(&id)
            .map(|name| PlayerRecord {
                id,
                name: name.clone(),
            })
            .ok_or_else(|| StorageError::not_found("player", id))
    }

    async fn add_player_to_world(&self, player: PlayerId, world: WorldId) -> Result<PlayerLocation, StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.players.contains_key(&player) {
            return Err(StorageError::not_found("player", player));
        }
        if !tables.worlds.contains_key(&world) {
            return Err(StorageError::not_found("world", world));
        }
        tables.memberships.insert(player, world);
        debug!("Player {} now plays on world {}", player, world);
        tables
            .location_of(player)?
            .ok_or_else(|| StorageError::Conflict(format!("membership of {player} was not recorded")))
    }

    async fn remove_player(&self, player: PlayerId) -> Result<Option<PlayerLocation>, StorageError> {
        let mut tables = self.tables.write().await;
        let location = tables.location_of(player)?;
        tables.memberships.remove(&player);
        Ok(location)
    }

    async fn player_location(&self, player: PlayerId) -> Result<Option<PlayerLocation>, StorageError> {
        self.tables.read().await.location_of(player)
    }

    async fn move_worlds_to_universe(&self, worlds: &[WorldId], universe: UniverseId) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let target_multiverse = tables.multiverse_of_universe(universe)?;

        // Validate everything before the first write.
        for world in worlds {
            let row = tables.worlds.get(world).ok_or_else(|| StorageError::not_found("world", world))?;
            let source_multiverse = tables.multiverse_of_universe(row.universe_id)?;
            if source_multiverse != target_multiverse {
                return Err(StorageError::Conflict(format!(
                    "world {world} belongs to multiverse {source_multiverse}, not {target_multiverse}"
                )));
            }
        }

        for world in worlds {
            if let Some(row) = tables.worlds.get_mut(world) {
                row.universe_id = universe;
            }
        }

        info!("🔀 Moved worlds {:?} to universe {}", worlds, universe);
        Ok(())
    }

    async fn set_world_seed(&self, world: WorldId, seed: Option<WorldSeedId>) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .worlds
            .get_mut(&world)
            .ok_or_else(|| StorageError::not_found("world", world))?;
        row.seed_id = seed;
        Ok(())
    }

    async fn set_game_handler_active(&self, multiverse: MultiverseId, active: bool) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        tables.multiverse_row_mut(multiverse)?.game_handler_active = active;
        Ok(())
    }

    async fn set_game_handler_state(&self, multiverse: MultiverseId, state: Option<String>) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        tables.multiverse_row_mut(multiverse)?.game_handler_state = state;
        Ok(())
    }

    async fn load_uber_state(&self, key: ScopeKey) -> Result<UberStateMap, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.uber_states.get(&key).cloned().unwrap_or_default())
    }

    async fn store_uber_states(&self, writes: &[(ScopeKey, UberStateMap)]) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        for (key, entries) in writes {
            tables
                .uber_states
                .entry(*key)
                .or_default()
                .extend(entries.iter().map(|(id, value)| (*id, *value)));
        }
        Ok(())
    }

    async fn create_seed(&self, seed: NewSeed) -> Result<Seed, StorageError> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let world_seeds = seed
            .seed_files
            .into_iter()
            .enumerate()
            .map(|(world_index, content)| WorldSeed {
                id: tables.next_id(),
                world_index,
                content,
            })
            .collect::<Vec<_>>();

        let record = Seed {
            id,
            config: seed.config,
            creator: seed.creator,
            spoiler: seed.spoiler,
            world_seeds,
        };
        tables.seeds.insert(id, record.clone());
        info!("🌱 Stored seed {} with {} world seeds", id, record.world_seeds.len());
        Ok(record)
    }

    async fn find_seed(&self, id: SeedId) -> Result<Seed, StorageError> {
        let tables = self.tables.read().await;
        tables
            .seeds
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("seed", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiverse_event_system::UberId;

    async fn session(storage: &MemoryStorage) -> (MultiverseRecord, UniverseRecord, WorldRecord) {
        let multiverse = storage.create_multiverse(0).await.unwrap();
        let universe = storage.create_universe(multiverse.id).await.unwrap();
        let world = storage.create_world(universe.id, "Alpha").await.unwrap();
        (multiverse, universe, world)
    }

    #[tokio::test]
    async fn test_multiverse_snapshot_reflects_membership() {
        let storage = MemoryStorage::new();
        let (multiverse, universe, world) = session(&storage).await;
        let player = PlayerId::new();
        storage.upsert_player(player, "Ori").await.unwrap();

        let location = storage.add_player_to_world(player, world.id).await.unwrap();
        assert_eq!(location.universe_id, universe.id);
        assert_eq!(location.multiverse_id, multiverse.id);

        let snapshot = storage.find_multiverse(multiverse.id).await.unwrap();
        assert_eq!(snapshot.members(), BTreeSet::from([player]));
        assert_eq!(snapshot.world_of(player).map(|w| w.id), Some(world.id));
        assert_eq!(snapshot.first_world().map(|w| w.id), Some(world.id));
    }

    #[tokio::test]
    async fn test_adding_player_elsewhere_leaves_previous_world() {
        let storage = MemoryStorage::new();
        let (_, universe, first) = session(&storage).await;
        let second = storage.create_world(universe.id, "Beta").await.unwrap();
        let player = PlayerId::new();
        storage.upsert_player(player, "Ku").await.unwrap();

        storage.add_player_to_world(player, first.id).await.unwrap();
        storage.add_player_to_world(player, second.id).await.unwrap();

        assert!(storage.find_world(first.id).await.unwrap().members.is_empty());
        assert!(storage.find_world(second.id).await.unwrap().members.contains(&player));
    }

    #[tokio::test]
    async fn test_move_worlds_is_all_or_nothing() {
        let storage = MemoryStorage::new();
        let (_, universe, world) = session(&storage).await;
        let (_, foreign_universe, foreign_world) = session(&storage).await;
        let target = storage.create_universe(world.multiverse_id).await.unwrap();

        let result = storage
            .move_worlds_to_universe(&[world.id, foreign_world.id], target.id)
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert_eq!(storage.find_world(world.id).await.unwrap().universe_id, universe.id);
        assert_eq!(
            storage.find_world(foreign_world.id).await.unwrap().universe_id,
            foreign_universe.id
        );

        storage.move_worlds_to_universe(&[world.id], target.id).await.unwrap();
        assert_eq!(storage.find_world(world.id).await.unwrap().universe_id, target.id);
    }

    #[tokio::test]
    async fn test_uber_state_writes_merge_entries() {
        let storage = MemoryStorage::new();
        let key = ScopeKey::World(WorldId(99));
        let a = UberId::new(1, 1);
        let b = UberId::new(1, 2);

        storage
            .store_uber_states(&[(key, UberStateMap::from([(a, 1.0)]))])
            .await
            .unwrap();
        storage
            .store_uber_states(&[(key, UberStateMap::from([(b, 2.0)]))])
            .await
            .unwrap();

        let state = storage.load_uber_state(key).await.unwrap();
        assert_eq!(state, UberStateMap::from([(a, 1.0), (b, 2.0)]));
        assert!(storage
            .load_uber_state(ScopeKey::Universe(UniverseId(5)))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_records_report_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.find_multiverse(MultiverseId(7)).await,
            Err(StorageError::NotFound { kind: "multiverse", .. })
        ));
        assert!(matches!(
            storage.add_player_to_world(PlayerId::new(), WorldId(1)).await,
            Err(StorageError::NotFound { kind: "player", .. })
        ));
        assert_eq!(storage.player_location(PlayerId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_seed_gets_one_world_seed_per_file() {
        let storage = MemoryStorage::new();
        let seed = storage
            .create_seed(NewSeed {
                config: serde_json::json!({ "flags": [] }),
                creator: None,
                spoiler: Some("spoiler".into()),
                seed_files: vec!["first".into(), "second".into()],
            })
            .await
            .unwrap();

        assert_eq!(seed.world_seeds.len(), 2);
        assert_eq!(seed.world_seeds[1].world_index, 1);
        assert_eq!(seed.world_seeds[1].content, "second");
        assert_eq!(storage.find_seed(seed.id).await.unwrap(), seed);
    }
}
