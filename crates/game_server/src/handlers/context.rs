//! Per-handler runtime shared by every game mode.

use crate::config::ServerConfig;
use crate::connections::ConnectionDelivery;
use crate::error::ServerError;
use crate::messages::{
    MultiverseInfoMessage, PlayerInfo, ServerMessage, UniverseInfo, WorldInfo,
};
use crate::model::{MultiverseRecord, PlayerLocation, WorldRecord};
use crate::seedgen::SeedGeneratorService;
use crate::storage::Storage;
use crate::sync::{AggregationResult, AggregationStrategyRegistry, StateSynchronization};
use multiverse_event_system::{
    DispatchFault, Event, EventBus, EventError, MultiverseId, OwnerTag, PlayerId, Scheduler, SenderEventBus,
    UberId, WorldId,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Collaborators every game handler works with.
#[derive(Clone)]
pub struct HandlerServices {
    pub storage: Arc<dyn Storage>,
    pub connections: Arc<dyn ConnectionDelivery>,
    pub sync: Arc<StateSynchronization>,
    /// Absent when the server runs without a seed generator
    pub seed_generator: Option<Arc<SeedGeneratorService>>,
    pub config: Arc<ServerConfig>,
}

impl std::fmt::Debug for HandlerServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerServices")
            .field("sync", &self.sync)
            .field("seed_generator", &self.seed_generator.is_some())
            .finish()
    }
}

/// Runtime of one game handler: its two event buses, its scheduler slot
/// and the lock that keeps its operations from interleaving.
///
/// Every entry point (client message, session event, scheduler tick) runs
/// through [`HandlerContext::run_exclusive`], so at most one operation per
/// handler is active at a time, even across suspension points. Different
/// handlers never share a context and run fully in parallel.
pub struct HandlerContext {
    multiverse_id: MultiverseId,
    owner: OwnerTag,
    services: HandlerServices,
    message_bus: SenderEventBus<PlayerId>,
    multiverse_bus: EventBus,
    op_lock: Mutex<()>,
    stopped: AtomicBool,
    scheduler: std::sync::Mutex<Option<Scheduler>>,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("multiverse_id", &self.multiverse_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl HandlerContext {
    /// Creates a context whose bus faults are forwarded to `faults`.
    pub fn new(
        multiverse_id: MultiverseId,
        services: HandlerServices,
        faults: mpsc::UnboundedSender<DispatchFault>,
    ) -> Self {
        Self {
            multiverse_id,
            owner: OwnerTag::new(format!("multiverse-{multiverse_id}")),
            services,
            message_bus: SenderEventBus::with_fault_channel("messages", faults.clone()),
            multiverse_bus: EventBus::with_fault_channel("multiverse", faults),
            op_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
            scheduler: std::sync::Mutex::new(None),
        }
    }

    /// Creates a context whose bus faults are only logged.
    pub fn detached(multiverse_id: MultiverseId, services: HandlerServices) -> Self {
        Self {
            multiverse_id,
            owner: OwnerTag::new(format!("multiverse-{multiverse_id}")),
            services,
            message_bus: SenderEventBus::new("messages"),
            multiverse_bus: EventBus::new("multiverse"),
            op_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
            scheduler: std::sync::Mutex::new(None),
        }
    }

    pub fn multiverse_id(&self) -> MultiverseId {
        self.multiverse_id
    }

    /// Tag under which the handler registers its bus handlers.
    pub fn owner(&self) -> &OwnerTag {
        &self.owner
    }

    pub fn services(&self) -> &HandlerServices {
        &self.services
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.services.storage
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionDelivery> {
        &self.services.connections
    }

    pub fn sync(&self) -> &Arc<StateSynchronization> {
        &self.services.sync
    }

    pub fn config(&self) -> &ServerConfig {
        &self.services.config
    }

    pub fn message_bus(&self) -> &SenderEventBus<PlayerId> {
        &self.message_bus
    }

    pub fn multiverse_bus(&self) -> &EventBus {
        &self.multiverse_bus
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Operation serialization
    // ------------------------------------------------------------------------

    /// Runs `operation` as this handler's only active operation.
    ///
    /// Returns `None` without running it when the handler was stopped while
    /// the operation was queued.
    pub async fn run_exclusive<F>(&self, operation: F) -> Option<F::Output>
    where
        F: Future,
    {
        let _guard = self.op_lock.lock().await;
        if self.is_stopped() {
            debug!("Discarding operation for stopped handler of multiverse {}", self.multiverse_id);
            return None;
        }
        Some(operation.await)
    }

    /// Forwards a client message to the message bus.
    pub async fn on_message<E: Event>(&self, message: E, sender: PlayerId) -> usize {
        self.run_exclusive(self.message_bus.dispatch(message, sender))
            .await
            .unwrap_or(0)
    }

    /// Forwards a session event to the multiverse bus.
    pub async fn on_multiverse_event<E: Event>(&self, event: E) -> usize {
        self.run_exclusive(self.multiverse_bus.dispatch(event))
            .await
            .unwrap_or(0)
    }

    /// Starts the handler's periodic tick at the configured interval.
    pub fn start_scheduler<F, Fut>(&self, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        let period = Duration::from_millis(self.config().tick_interval_ms.max(1));
        let scheduler = Scheduler::start(self.owner.to_string(), period, tick);
        let previous = match self.scheduler.lock() {
            Ok(mut slot) => slot.replace(scheduler),
            Err(poisoned) => poisoned.into_inner().replace(scheduler),
        };
        // Dropping a scheduler aborts its task.
        drop(previous);
    }

    /// Stops the handler: cancels its scheduler, removes its bus handlers
    /// and discards operations still waiting to run. Waits for the operation
    /// in flight, so it must not be awaited from inside an operation.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let scheduler = match self.scheduler.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }

        drop(self.op_lock.lock().await);

        let removed = self.message_bus.unregister_owner(&self.owner).await
            + self.multiverse_bus.unregister_owner(&self.owner).await;
        info!(
            "⏹️ Stopped handler of multiverse {} ({} bus handlers removed)",
            self.multiverse_id, removed
        );
    }

    // ------------------------------------------------------------------------
    // Session access
    // ------------------------------------------------------------------------

    /// The handler's own session. Its absence is handler-fatal.
    pub async fn multiverse(&self) -> Result<MultiverseRecord, ServerError> {
        self.storage()
            .find_multiverse(self.multiverse_id)
            .await
            .map_err(|e| ServerError::from(e).vanished())
    }

    /// Where `player` plays, if it is within this handler's session.
    pub async fn player_location(&self, player: PlayerId) -> Result<Option<PlayerLocation>, ServerError> {
        Ok(self
            .storage()
            .player_location(player)
            .await?
            .filter(|location| location.multiverse_id == self.multiverse_id))
    }

    pub async fn player_name(&self, player: PlayerId) -> String {
        self.storage()
            .find_player(player)
            .await
            .map(|record| record.name)
            .unwrap_or_else(|_| "(?)".to_string())
    }

    /// Whether any session member has an open game connection. A vanished
    /// session has none.
    pub async fn has_connected_members(&self) -> bool {
        match self.storage().find_multiverse(self.multiverse_id).await {
            Ok(multiverse) => multiverse
                .members()
                .into_iter()
                .any(|member| self.connections().is_connected(member)),
            Err(_) => false,
        }
    }

    pub async fn set_handler_active(&self, active: bool) -> Result<(), ServerError> {
        self.storage()
            .set_game_handler_active(self.multiverse_id, active)
            .await
            .map_err(|e| ServerError::from(e).vanished())
    }

    /// Installs the policies `generate` yields for every world of `multiverse`.
    pub fn install_registries(
        &self,
        multiverse: &MultiverseRecord,
        generate: impl Fn(&WorldRecord) -> AggregationStrategyRegistry,
    ) {
        for world in multiverse.worlds() {
            self.sync().install_registry(world.id, generate(world));
        }
    }

    // ------------------------------------------------------------------------
    // Uber state
    // ------------------------------------------------------------------------

    /// Reconciles updates a player submitted for their world and pushes the
    /// result. Players outside this session are ignored.
    pub async fn batch_update_uber_states(
        &self,
        player: PlayerId,
        updates: &[(UberId, f64)],
    ) -> Result<Option<AggregationResult>, ServerError> {
        let Some(location) = self.player_location(player).await? else {
            debug!("Ignoring uber state update from {} outside multiverse {}", player, self.multiverse_id);
            return Ok(None);
        };

        let result = self
            .sync()
            .aggregate_states(location.world_id, updates)
            .await
            .map_err(ServerError::vanished)?;
        self.sync().sync_states(player, &result).await?;
        Ok(Some(result))
    }

    /// Applies server-originated values to one world and pushes the result.
    pub async fn grant_to_world(&self, world: WorldId, updates: &[(UberId, f64)]) -> Result<AggregationResult, ServerError> {
        let result = self
            .sync()
            .aggregate_states(world, updates)
            .await
            .map_err(ServerError::vanished)?;
        self.sync().sync_world_states(&result).await?;
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Outbound messages
    // ------------------------------------------------------------------------

    pub async fn send(&self, players: &[PlayerId], message: ServerMessage) {
        if !players.is_empty() {
            self.connections().to_players(players, &message, false).await;
        }
    }

    pub async fn send_unreliable(&self, players: &[PlayerId], message: ServerMessage) {
        if !players.is_empty() {
            self.connections().to_players(players, &message, true).await;
        }
    }

    /// Sends to every session member and every observer.
    pub async fn broadcast(&self, message: ServerMessage) -> Result<(), ServerError> {
        let members = self.multiverse().await?.members().into_iter().collect::<Vec<_>>();
        self.send(&members, message.clone()).await;
        self.connections()
            .to_observers(self.multiverse_id, &message, false)
            .await;
        Ok(())
    }

    /// Builds the session overview with `client_info` attached.
    pub async fn multiverse_info(
        &self,
        client_info: Option<serde_json::Value>,
    ) -> Result<MultiverseInfoMessage, ServerError> {
        let multiverse = self.multiverse().await?;
        let mut universes = Vec::with_capacity(multiverse.universes.len());

        for universe in &multiverse.universes {
            let mut worlds = Vec::with_capacity(universe.worlds.len());
            for world in &universe.worlds {
                let mut members = Vec::with_capacity(world.members.len());
                for member in &world.members {
                    members.push(PlayerInfo {
                        id: *member,
                        name: self.player_name(*member).await,
                        connected: self.connections().is_connected(*member),
                    });
                }
                worlds.push(WorldInfo {
                    id: world.id,
                    name: world.name.clone(),
                    members,
                });
            }
            universes.push(UniverseInfo {
                id: universe.id,
                worlds,
            });
        }

        Ok(MultiverseInfoMessage {
            id: multiverse.id,
            game_handler_type: multiverse.game_handler_type,
            game_handler_active: multiverse.game_handler_active,
            universes,
            game_handler_client_info: client_info,
        })
    }

    pub async fn broadcast_multiverse_info(&self, client_info: Option<serde_json::Value>) -> Result<(), ServerError> {
        let info = self.multiverse_info(client_info).await?;
        self.broadcast(ServerMessage::MultiverseInfo(info)).await
    }

    pub async fn broadcast_block_starting(&self, block: bool) -> Result<(), ServerError> {
        self.broadcast(ServerMessage::SetBlockStartingNewGame { block }).await
    }
}
