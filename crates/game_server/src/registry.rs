//! # Game Handler Registry
//!
//! Owns the live game handler of every active multiverse. Handlers are
//! created lazily on first use: the mode code stored on the multiverse picks
//! the variant, the persisted snapshot is restored, the handler is started
//! and the aggregation policies of its worlds are installed. Idle handlers
//! are persisted and disposed, and every handler is persisted on shutdown.

use crate::error::ServerError;
use crate::handlers::{AnyGameHandler, GameHandlerType, HandlerContext, HandlerServices, LeagueGameHandler};
use crate::messages::{
    ClientMessage, DeveloperEvent, MultiverseEvent, PlayerJoinedEvent, PlayerLeftEvent, ServerMessage,
    UberStateBatchUpdateMessage, UberStateUpdateMessage, WorldCreatedEvent, WorldDeletedEvent,
};
use crate::model::{MultiverseRecord, PlayerLocation};
use dashmap::DashMap;
use multiverse_event_system::{DispatchFault, MultiverseId, PlayerId, ShutdownState, WorldId};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

pub struct GameHandlerRegistry {
    services: HandlerServices,
    handlers: DashMap<MultiverseId, AnyGameHandler>,
    /// Serializes handler creation and disposal
    lifecycle: Mutex<()>,
    shutdown: ShutdownState,
    this: Weak<GameHandlerRegistry>,
}

impl std::fmt::Debug for GameHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameHandlerRegistry")
            .field("active_handlers", &self.handlers.len())
            .field("shutting_down", &self.shutdown.is_shutdown_initiated())
            .finish()
    }
}

impl GameHandlerRegistry {
    pub fn new(services: HandlerServices) -> Arc<Self> {
        Self::with_shutdown_state(services, ShutdownState::new())
    }

    pub fn with_shutdown_state(services: HandlerServices, shutdown: ShutdownState) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            services,
            handlers: DashMap::new(),
            lifecycle: Mutex::new(()),
            shutdown,
            this: this.clone(),
        })
    }

    pub fn services(&self) -> &HandlerServices {
        &self.services
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }

    pub fn active_handlers(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_active(&self, multiverse: MultiverseId) -> bool {
        self.handlers.contains_key(&multiverse)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Creates a new multiverse driven by the mode `game_handler_type` and
    /// starts its handler. Unknown mode codes are rejected before anything
    /// is stored.
    pub async fn start_multiverse(&self, game_handler_type: i32) -> Result<(MultiverseRecord, AnyGameHandler), ServerError> {
        let kind = GameHandlerType::from_code(game_handler_type)?;
        self.ensure_accepting()?;

        let multiverse = self.services.storage.create_multiverse(kind.code()).await?;
        info!("🌌 Created {} multiverse {}", kind, multiverse.id);

        let handler = self.get_handler(multiverse.id).await?;
        Ok((multiverse, handler))
    }

    /// The live handler of `multiverse`, creating it on first use.
    pub async fn get_handler(&self, multiverse: MultiverseId) -> Result<AnyGameHandler, ServerError> {
        if let Some(handler) = self.handlers.get(&multiverse) {
            return Ok(handler.value().clone());
        }

        let _lifecycle = self.lifecycle.lock().await;
        if let Some(handler) = self.handlers.get(&multiverse) {
            return Ok(handler.value().clone());
        }
        self.ensure_accepting()?;

        let record = self.services.storage.find_multiverse(multiverse).await?;
        let kind = GameHandlerType::from_code(record.game_handler_type)?;

        let (faults, fault_receiver) = mpsc::unbounded_channel();
        let context = HandlerContext::new(multiverse, self.services.clone(), faults);
        let handler = AnyGameHandler::create(kind, context);

        let started = async {
            handler.restore_state(record.game_handler_state.as_deref()).await?;
            handler.start().await?;
            handler.refresh_aggregation_registries().await
        };
        if let Err(e) = started.await {
            error!("❌ Failed to start {} handler for multiverse {}: {}", kind, multiverse, e);
            handler.stop().await;
            return Err(e);
        }

        self.handlers.insert(multiverse, handler.clone());
        self.spawn_fault_monitor(multiverse, fault_receiver);
        info!("🎮 Started {} handler for multiverse {}", kind, multiverse);

        Ok(handler)
    }

    fn ensure_accepting(&self) -> Result<(), ServerError> {
        if self.shutdown.is_shutdown_initiated() {
            return Err(ServerError::Internal("server is shutting down".to_string()));
        }
        Ok(())
    }

    /// Logs a handler's bus faults; fatal ones make the registry reconsider
    /// whether the handler can be disposed.
    fn spawn_fault_monitor(&self, multiverse: MultiverseId, mut faults: mpsc::UnboundedReceiver<DispatchFault>) {
        let registry = self.this.clone();
        tokio::spawn(async move {
            while let Some(fault) = faults.recv().await {
                warn!(
                    "⚠️ Multiverse {} handler '{}' failed on {} ({} bus): {}",
                    multiverse, fault.handler, fault.event_type, fault.bus, fault.error
                );

                if !fault.error.is_fatal() {
                    continue;
                }
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                error!("💀 Fatal fault in multiverse {} handler, reconsidering disposal", multiverse);
                if let Err(e) = registry.dispose_if_idle(multiverse).await {
                    error!("❌ Failed to dispose handler of multiverse {}: {}", multiverse, e);
                }
            }
            debug!("Fault monitor of multiverse {} stopped", multiverse);
        });
    }

    /// Persists and disposes the handler of `multiverse` if it reports itself
    /// disposable. Returns whether it was disposed.
    pub async fn dispose_if_idle(&self, multiverse: MultiverseId) -> Result<bool, ServerError> {
        let Some(handler) = self.handlers.get(&multiverse).map(|entry| entry.value().clone()) else {
            return Ok(false);
        };
        if !handler.is_disposable().await {
            return Ok(false);
        }

        let _lifecycle = self.lifecycle.lock().await;
        if !self.handlers.contains_key(&multiverse) {
            return Ok(false);
        }
        self.dispose(multiverse, &handler).await;
        Ok(true)
    }

    async fn dispose(&self, multiverse: MultiverseId, handler: &AnyGameHandler) {
        handler.stop().await;
        if let Err(e) = handler.persist_state().await {
            warn!("⚠️ Could not persist handler state of multiverse {}: {}", multiverse, e);
        }

        self.handlers.remove(&multiverse);
        if let Ok(record) = self.services.storage.find_multiverse(multiverse).await {
            for world in record.worlds() {
                self.services.sync.forget_registry(world.id);
            }
        }
        self.services.sync.evict_multiverse(multiverse);

        info!("♻️ Disposed {} handler of multiverse {}", handler.handler_type(), multiverse);
    }

    /// Disposes every idle handler. Returns how many were disposed.
    pub async fn sweep_idle(&self) -> usize {
        let active = self.handlers.iter().map(|entry| *entry.key()).collect::<Vec<_>>();
        let mut disposed = 0;
        for multiverse in active {
            match self.dispose_if_idle(multiverse).await {
                Ok(true) => disposed += 1,
                Ok(false) => {}
                Err(e) => warn!("⚠️ Idle sweep failed for multiverse {}: {}", multiverse, e),
            }
        }
        if disposed > 0 {
            info!("🧹 Idle sweep disposed {} handler(s)", disposed);
        }
        disposed
    }

    /// Stops every handler after persisting its snapshot.
    pub async fn shutdown_all(&self) {
        self.shutdown.initiate_shutdown();
        let _lifecycle = self.lifecycle.lock().await;

        let active = self
            .handlers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect::<Vec<_>>();
        for (multiverse, handler) in &active {
            self.dispose(*multiverse, handler).await;
        }

        self.shutdown.complete_shutdown();
        info!("💾 Persisted {} game handler(s)", active.len());
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    async fn location_of(&self, player: PlayerId) -> Result<PlayerLocation, ServerError> {
        self.services
            .storage
            .player_location(player)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("player {player} is not part of a multiverse")))
    }

    /// Routes a client message to the handler of the sender's multiverse.
    pub async fn on_message(&self, player: PlayerId, message: ClientMessage) -> Result<usize, ServerError> {
        let location = self.location_of(player).await?;
        let handler = self.get_handler(location.multiverse_id).await?;
        Ok(handler.on_message(message, player).await)
    }

    /// Sends a freshly connected player their world's full state, then lets
    /// the handler finish the setup.
    pub async fn player_connected(&self, player: PlayerId) -> Result<(), ServerError> {
        let location = self.location_of(player).await?;
        let handler = self.get_handler(location.multiverse_id).await?;

        let state = self.services.sync.world_state(location.world_id).await?;
        if !state.is_empty() {
            let updates = state
                .into_iter()
                .map(|(uber_id, value)| UberStateUpdateMessage::new(uber_id, value))
                .collect();
            let message = ServerMessage::UberStateBatchUpdate(UberStateBatchUpdateMessage::new(updates));
            self.services.connections.to_players(&[player], &message, false).await;
        }

        handler.on_game_connection_setup(player).await?;
        handler.notify_multiverse_or_client_info_changed().await
    }

    /// Announces a world stored by the caller.
    pub async fn world_created(&self, world: WorldId) -> Result<(), ServerError> {
        let world = self.services.storage.find_world(world).await?;
        let handler = self.get_handler(world.multiverse_id).await?;

        handler.on_multiverse_event(WorldCreatedEvent { world }).await;
        handler.refresh_aggregation_registries().await?;
        handler.notify_multiverse_or_client_info_changed().await
    }

    /// Announces a world the caller deleted from `multiverse`.
    pub async fn world_deleted(&self, multiverse: MultiverseId, world: WorldId) -> Result<(), ServerError> {
        self.services.sync.forget_registry(world);
        let handler = self.get_handler(multiverse).await?;

        handler.on_multiverse_event(WorldDeletedEvent { world_id: world }).await;
        handler.refresh_aggregation_registries().await?;
        handler.notify_multiverse_or_client_info_changed().await
    }

    /// Announces that `player` joined `world`.
    pub async fn player_joined(&self, player: PlayerId, world: WorldId) -> Result<(), ServerError> {
        let record = self.services.storage.find_world(world).await?;
        let handler = self.get_handler(record.multiverse_id).await?;

        handler
            .on_multiverse_event(PlayerJoinedEvent {
                player_id: player,
                world_id: world,
            })
            .await;
        handler.refresh_aggregation_registries().await?;
        handler.notify_multiverse_or_client_info_changed().await
    }

    /// Announces that `player` left the world they played on at `location`.
    pub async fn player_left(&self, player: PlayerId, location: PlayerLocation) -> Result<(), ServerError> {
        let handler = self.get_handler(location.multiverse_id).await?;

        handler
            .on_multiverse_event(PlayerLeftEvent {
                player_id: player,
                world_id: location.world_id,
            })
            .await;
        handler.notify_multiverse_or_client_info_changed().await
    }

    pub async fn developer_event(&self, multiverse: MultiverseId, event: DeveloperEvent) -> Result<usize, ServerError> {
        let handler = self.get_handler(multiverse).await?;
        Ok(handler.on_multiverse_event(event).await)
    }

    /// Routes a player-issued session command to the sender's multiverse.
    pub async fn multiverse_event(&self, event: MultiverseEvent) -> Result<usize, ServerError> {
        let location = self.location_of(event.sender).await?;
        let handler = self.get_handler(location.multiverse_id).await?;
        Ok(handler.on_multiverse_event(event).await)
    }

    /// The League handler of `multiverse`.
    pub async fn league(&self, multiverse: MultiverseId) -> Result<LeagueGameHandler, ServerError> {
        let handler = self.get_handler(multiverse).await?;
        handler
            .as_league()
            .cloned()
            .ok_or_else(|| ServerError::Validation("You are not in a League game".to_string()))
    }

    /// Human-readable summary of a handler.
    pub async fn debug_info(&self, multiverse: MultiverseId) -> Result<String, ServerError> {
        let handler = self.get_handler(multiverse).await?;
        let record = self.services.storage.find_multiverse(multiverse).await?;

        let mut info = format!(
            "Multiverse {}\nHandler: {}\nActive: {}\nDisposable: {}\nBlocks new game: {}",
            multiverse,
            handler.handler_type(),
            record.game_handler_active,
            handler.is_disposable().await,
            handler.should_block_starting_new_game().await,
        );
        if let Some(extra) = handler.additional_debug_information().await {
            info.push('\n');
            info.push_str(&extra);
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::hide_and_seek::{HideAndSeekPhase, PlayerRole};
    use crate::messages::{PlayerPositionMessage, PlayerUseCatchingAbilityMessage};
    use crate::storage::Storage;
    use crate::testing::{uber_updates, Fixture};
    use multiverse_event_system::UberId;

    const ABILITY: UberId = UberId::new(6, 1000);

    #[tokio::test]
    async fn test_unknown_mode_is_rejected_before_storage() {
        let fixture = Fixture::new();
        let registry = GameHandlerRegistry::new(fixture.services());

        let error = registry.start_multiverse(42).await.unwrap_err();
        assert!(matches!(error, ServerError::Configuration(_)));
        assert!(fixture.storage.find_multiverse(MultiverseId(1)).await.is_err());
        assert_eq!(registry.active_handlers(), 0);
    }

    #[tokio::test]
    async fn test_messages_reach_the_senders_handler() {
        let mut fixture = Fixture::new();
        let registry = GameHandlerRegistry::new(fixture.services());
        let (multiverse, handler) = registry.start_multiverse(GameHandlerType::NORMAL).await.unwrap();
        assert_eq!(handler.handler_type(), GameHandlerType::Normal);

        let universe = fixture.universe(multiverse.id).await;
        let a = fixture.world(universe.id, "A").await;
        let b = fixture.world(universe.id, "B").await;
        registry.world_created(a.id).await.unwrap();
        registry.world_created(b.id).await.unwrap();
        let alice = fixture.player(a.id, "alice").await;
        let bob = fixture.player(b.id, "bob").await;
        registry.player_joined(alice, a.id).await.unwrap();
        registry.player_joined(bob, b.id).await.unwrap();
        fixture.clear_outboxes();

        let message = ClientMessage::UberStateUpdate(UberStateUpdateMessage::new(ABILITY, 1.0));
        assert_eq!(registry.on_message(alice, message).await.unwrap(), 1);
        assert_eq!(uber_updates(&fixture.received(bob)), vec![(ABILITY, 1.0)]);
    }

    #[tokio::test]
    async fn test_connected_player_receives_world_state() {
        let mut fixture = Fixture::new();
        let registry = GameHandlerRegistry::new(fixture.services());
        let (multiverse, _) = registry.start_multiverse(GameHandlerType::NORMAL).await.unwrap();
        let universe = fixture.universe(multiverse.id).await;
        let a = fixture.world(universe.id, "A").await;
        let b = fixture.world(universe.id, "B").await;
        registry.world_created(a.id).await.unwrap();
        registry.world_created(b.id).await.unwrap();
        fixture.sync.aggregate_states(a.id, &[(ABILITY, 1.0)]).await.unwrap();

        let bob = fixture.player(b.id, "bob").await;
        registry.player_connected(bob).await.unwrap();

        assert_eq!(uber_updates(&fixture.received(bob)), vec![(ABILITY, 1.0)]);
    }

    #[tokio::test]
    async fn test_idle_handler_round_trips_through_disposal() {
        let mut config = crate::config::ServerConfig::default();
        config.hide_and_seek.hiding_seconds = 300;
        let mut fixture = Fixture::with_config(config);
        let registry = GameHandlerRegistry::new(fixture.services());
        let (multiverse, _) = registry.start_multiverse(GameHandlerType::HIDE_AND_SEEK).await.unwrap();

        let seekers = fixture.universe(multiverse.id).await;
        let hiders = fixture.universe(multiverse.id).await;
        let s = fixture.world(seekers.id, "Seekers").await;
        let h = fixture.world(hiders.id, "Hiders").await;
        registry.world_created(s.id).await.unwrap();
        registry.world_created(h.id).await.unwrap();
        let seeker = fixture.player(s.id, "seeker").await;
        let hider = fixture.player(h.id, "hider").await;
        registry.player_joined(seeker, s.id).await.unwrap();
        registry.player_joined(hider, h.id).await.unwrap();
        registry
            .developer_event(multiverse.id, DeveloperEvent::new("start"))
            .await
            .unwrap();

        assert!(!registry.dispose_if_idle(multiverse.id).await.unwrap());

        fixture.disconnect(seeker);
        fixture.disconnect(hider);
        assert!(registry.dispose_if_idle(multiverse.id).await.unwrap());
        assert!(!registry.is_active(multiverse.id));

        let record = fixture.storage.find_multiverse(multiverse.id).await.unwrap();
        assert!(record.game_handler_state.is_some());
        assert!(record.game_handler_active);

        let restored = registry.get_handler(multiverse.id).await.unwrap();
        let AnyGameHandler::HideAndSeek(restored) = restored else {
            panic!("expected a hide and seek handler");
        };
        assert_eq!(restored.phase().await, HideAndSeekPhase::Hiding);
        assert_eq!(restored.role_of(seeker).await, Some(PlayerRole::Seeker));
        assert_eq!(restored.role_of(hider).await, Some(PlayerRole::Hider));
        assert!(restored.state().await.seconds_until_catch_phase > 290);
    }

    #[tokio::test]
    async fn test_catch_through_registry_moves_hider_world() {
        let mut fixture = Fixture::new();
        let registry = GameHandlerRegistry::new(fixture.services());
        let (multiverse, _) = registry.start_multiverse(GameHandlerType::HIDE_AND_SEEK).await.unwrap();

        let seekers = fixture.universe(multiverse.id).await;
        let hiders = fixture.universe(multiverse.id).await;
        let s = fixture.world(seekers.id, "Seekers").await;
        let h = fixture.world(hiders.id, "Hiders").await;
        registry.world_created(s.id).await.unwrap();
        registry.world_created(h.id).await.unwrap();
        let seeker = fixture.player(s.id, "seeker").await;
        let hider = fixture.player(h.id, "hider").await;
        registry.player_joined(seeker, s.id).await.unwrap();
        registry.player_joined(hider, h.id).await.unwrap();

        registry
            .on_message(seeker, ClientMessage::PlayerPosition(PlayerPositionMessage { x: 0.0, y: 0.0 }))
            .await
            .unwrap();
        registry
            .on_message(hider, ClientMessage::PlayerPosition(PlayerPositionMessage { x: 3.0, y: 4.0 }))
            .await
            .unwrap();
        registry
            .on_message(
                seeker,
                ClientMessage::PlayerUseCatchingAbility(PlayerUseCatchingAbilityMessage),
            )
            .await
            .unwrap();

        let moved = fixture.storage.find_world(h.id).await.unwrap();
        assert_eq!(moved.universe_id, seekers.id);
    }

    #[tokio::test]
    async fn test_league_accessor_rejects_other_modes() {
        let fixture = Fixture::new();
        let registry = GameHandlerRegistry::new(fixture.services());
        let (normal, _) = registry.start_multiverse(GameHandlerType::NORMAL).await.unwrap();
        let (league, _) = registry.start_multiverse(GameHandlerType::LEAGUE).await.unwrap();

        assert!(matches!(registry.league(normal.id).await, Err(ServerError::Validation(_))));
        assert!(registry.league(league.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_persists_and_refuses_new_sessions() {
        let fixture = Fixture::new();
        let registry = GameHandlerRegistry::new(fixture.services());
        let (multiverse, _) = registry.start_multiverse(GameHandlerType::INFECTION).await.unwrap();

        registry.shutdown_all().await;

        assert_eq!(registry.active_handlers(), 0);
        assert!(registry.shutdown_state().is_shutdown_complete());
        let record = fixture.storage.find_multiverse(multiverse.id).await.unwrap();
        assert!(record.game_handler_state.is_some());
        assert!(matches!(
            registry.start_multiverse(GameHandlerType::NORMAL).await,
            Err(ServerError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_debug_info_names_the_mode() {
        let fixture = Fixture::new();
        let registry = GameHandlerRegistry::new(fixture.services());
        let (multiverse, _) = registry.start_multiverse(GameHandlerType::LEAGUE).await.unwrap();

        let info = registry.debug_info(multiverse.id).await.unwrap();
        assert!(info.contains("Handler: league"));
        assert!(info.contains("Submissions: 0"));
    }
}
