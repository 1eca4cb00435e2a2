//! Reconciliation of per-world uber state updates.

use super::registry::AggregationStrategyRegistry;
use super::strategy::ShareScope;
use crate::connections::ConnectionDelivery;
use crate::error::ServerError;
use crate::messages::{ServerMessage, UberStateBatchUpdateMessage, UberStateUpdateMessage};
use crate::model::{MultiverseRecord, ScopeKey, UberStateMap, WorldRecord};
use crate::storage::Storage;
use dashmap::DashMap;
use multiverse_event_system::{MultiverseId, PlayerId, UberId, UniverseId, WorldId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

type ScopeCache = HashMap<ScopeKey, UberStateMap>;

/// Outcome of merging one submitted value.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedState {
    pub uber_id: UberId,
    pub scope: ShareScope,
    pub scope_key: ScopeKey,
    pub submitted: f64,
    /// Canonical value before the merge
    pub previous: Option<f64>,
    /// Canonical value after the merge
    pub value: f64,
}

impl AggregatedState {
    /// Whether the merge changed the canonical value.
    pub fn changed(&self) -> bool {
        self.previous != Some(self.value)
    }

    fn as_update(&self) -> UberStateUpdateMessage {
        UberStateUpdateMessage::new(self.uber_id, self.value)
    }
}

/// Canonical values produced by one [`StateSynchronization::aggregate_states`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult {
    pub multiverse_id: MultiverseId,
    pub universe_id: UniverseId,
    pub world_id: WorldId,
    /// One entry per submitted update, in submission order
    pub states: Vec<AggregatedState>,
}

impl AggregationResult {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Final canonical value of `id` within this batch.
    pub fn value_of(&self, id: UberId) -> Option<f64> {
        self.states.iter().rev().find(|state| state.uber_id == id).map(|state| state.value)
    }
}

/// The state synchronization engine.
///
/// The only writer of canonical uber state. Canonical values are cached per
/// scope and written through to storage; each multiverse has its own cache
/// lock, so sessions reconcile independently while a batch of one session
/// is merged against a single consistent snapshot.
pub struct StateSynchronization {
    storage: Arc<dyn Storage>,
    connections: Arc<dyn ConnectionDelivery>,
    registries: DashMap<WorldId, Arc<AggregationStrategyRegistry>>,
    caches: DashMap<MultiverseId, Arc<Mutex<ScopeCache>>>,
}

impl std::fmt::Debug for StateSynchronization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSynchronization")
            .field("registries", &self.registries.len())
            .field("cached_sessions", &self.caches.len())
            .finish()
    }
}

impl StateSynchronization {
    pub fn new(storage: Arc<dyn Storage>, connections: Arc<dyn ConnectionDelivery>) -> Self {
        Self {
            storage,
            connections,
            registries: DashMap::new(),
            caches: DashMap::new(),
        }
    }

    /// Activates the policies of one world, replacing earlier ones.
    pub fn install_registry(&self, world: WorldId, registry: AggregationStrategyRegistry) {
        debug!("📝 Installed {} sync policies for world {}", registry.len(), world);
        self.registries.insert(world, Arc::new(registry));
    }

    pub fn forget_registry(&self, world: WorldId) {
        self.registries.remove(&world);
    }

    /// Policies active for `world`; empty when none were installed.
    pub fn registry_for(&self, world: WorldId) -> Arc<AggregationStrategyRegistry> {
        self.registries
            .get(&world)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Drops the cached canonical values of a session. Storage stays authoritative.
    pub fn evict_multiverse(&self, multiverse: MultiverseId) {
        self.caches.remove(&multiverse);
    }

    fn cache_for(&self, multiverse: MultiverseId) -> Arc<Mutex<ScopeCache>> {
        self.caches.entry(multiverse).or_default().value().clone()
    }

    async fn ensure_loaded(&self, cache: &mut ScopeCache, key: ScopeKey) -> Result<(), ServerError> {
        if !cache.contains_key(&key) {
            let loaded = self.storage.load_uber_state(key).await?;
            cache.insert(key, loaded);
        }
        Ok(())
    }

    /// Merges `updates` submitted for `world` into canonical state.
    ///
    /// Each update is merged against the current canonical value of its
    /// scope using the world's installed policy (per-world copy when none
    /// applies). Updates are applied in order, so repeated COPY keys keep
    /// the last submission. The whole batch is one transaction: it is
    /// computed under the session's cache lock and stored with one write.
    pub async fn aggregate_states(
        &self,
        world: WorldId,
        updates: &[(UberId, f64)],
    ) -> Result<AggregationResult, ServerError> {
        let world = self.storage.find_world(world).await?;
        let registry = self.registry_for(world.id);
        let cache = self.cache_for(world.multiverse_id);
        let mut cache = cache.lock().await;

        let mut staged: HashMap<ScopeKey, UberStateMap> = HashMap::new();
        let mut states = Vec::with_capacity(updates.len());

        for &(uber_id, submitted) in updates {
            let (strategy, scope) = registry.policy_for(uber_id);
            let key = scope.key_for(world.id, world.universe_id, world.multiverse_id);
            self.ensure_loaded(&mut cache, key).await?;

            let previous = staged
                .get(&key)
                .and_then(|entries| entries.get(&uber_id))
                .or_else(|| cache.get(&key).and_then(|entries| entries.get(&uber_id)))
                .copied();
            let value = strategy.merge(previous, submitted);

            staged.entry(key).or_default().insert(uber_id, value);
            states.push(AggregatedState {
                uber_id,
                scope,
                scope_key: key,
                submitted,
                previous,
                value,
            });
        }

        let writes = staged.into_iter().collect::<Vec<_>>();
        self.storage.store_uber_states(&writes).await?;
        for (key, entries) in writes {
            cache.entry(key).or_default().extend(entries);
        }

        trace!("Aggregated {} updates for world {}", states.len(), world.id);

        Ok(AggregationResult {
            multiverse_id: world.multiverse_id,
            universe_id: world.universe_id,
            world_id: world.id,
            states,
        })
    }

    /// Delivers `results` submitted by `player`.
    ///
    /// The submitting world receives every value that changed or that differs
    /// from what was submitted; worlds sharing a key's scope receive changed
    /// values only. Recipients are computed from current membership.
    pub async fn sync_states(&self, player: PlayerId, results: &AggregationResult) -> Result<(), ServerError> {
        self.deliver(Some(player), results).await
    }

    /// Delivers server-originated `results` (no submitting player).
    pub async fn sync_world_states(&self, results: &AggregationResult) -> Result<(), ServerError> {
        self.deliver(None, results).await
    }

    async fn deliver(&self, sender: Option<PlayerId>, results: &AggregationResult) -> Result<(), ServerError> {
        if results.is_empty() {
            return Ok(());
        }

        let multiverse = self.storage.find_multiverse(results.multiverse_id).await?;
        let mut per_world: BTreeMap<WorldId, Vec<UberStateUpdateMessage>> = BTreeMap::new();

        let own = results
            .states
            .iter()
            .filter(|state| state.changed() || state.value != state.submitted)
            .map(AggregatedState::as_update)
            .collect::<Vec<_>>();
        if !own.is_empty() {
            per_world.insert(results.world_id, own);
        }

        for state in results
            .states
            .iter()
            .filter(|state| state.changed() && state.scope != ShareScope::World)
        {
            for world in scope_worlds(&multiverse, state.scope_key) {
                if world.id == results.world_id || self.registry_for(world.id).scope_of(state.uber_id) != state.scope {
                    continue;
                }
                per_world.entry(world.id).or_default().push(state.as_update());
            }
        }

        for (world_id, updates) in per_world {
            let mut recipients = multiverse
                .world(world_id)
                .map(|world| world.members.iter().copied().collect::<Vec<_>>())
                .unwrap_or_default();
            if world_id == results.world_id {
                if let Some(sender) = sender.filter(|sender| !recipients.contains(sender)) {
                    recipients.push(sender);
                }
            }
            if recipients.is_empty() {
                continue;
            }

            let message = ServerMessage::UberStateBatchUpdate(UberStateBatchUpdateMessage::new(updates));
            self.connections.to_players(&recipients, &message, false).await;
        }

        Ok(())
    }

    /// The merged view of canonical state a world observes: its own values,
    /// overlaid with universe and session values for keys its policies
    /// share at those scopes.
    pub async fn world_state(&self, world: WorldId) -> Result<UberStateMap, ServerError> {
        let world = self.storage.find_world(world).await?;
        let registry = self.registry_for(world.id);
        let cache = self.cache_for(world.multiverse_id);
        let mut cache = cache.lock().await;

        let own_key = ScopeKey::World(world.id);
        let shared = [
            (ScopeKey::Universe(world.universe_id), ShareScope::Universe),
            (ScopeKey::Multiverse(world.multiverse_id), ShareScope::Multiverse),
        ];

        self.ensure_loaded(&mut cache, own_key).await?;
        for (key, _) in shared {
            self.ensure_loaded(&mut cache, key).await?;
        }

        let mut merged = cache.get(&own_key).cloned().unwrap_or_default();
        for (key, scope) in shared {
            if let Some(entries) = cache.get(&key) {
                merged.extend(
                    entries
                        .iter()
                        .filter(|(id, _)| registry.scope_of(**id) == scope)
                        .map(|(id, value)| (*id, *value)),
                );
            }
        }

        Ok(merged)
    }

    /// The value `world` observes for one key.
    pub async fn current_value(&self, world: WorldId, id: UberId) -> Result<Option<f64>, ServerError> {
        Ok(self.world_state(world).await?.get(&id).copied())
    }
}

fn scope_worlds(multiverse: &MultiverseRecord, key: ScopeKey) -> Vec<&WorldRecord> {
    match key {
        ScopeKey::World(world) => multiverse.world(world).into_iter().collect(),
        ScopeKey::Universe(universe) => multiverse
            .universe(universe)
            .map(|universe| universe.worlds.iter().collect())
            .unwrap_or_default(),
        ScopeKey::Multiverse(_) => multiverse.worlds().collect(),
    }
}
