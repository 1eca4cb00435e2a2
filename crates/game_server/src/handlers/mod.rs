//! # Game Handlers
//!
//! A game handler implements the real-time rules of one game mode for one
//! multiverse. Every mode implements [`GameHandler`]; the closed set of modes
//! is the [`AnyGameHandler`] sum type, selected by the integer mode code
//! stored on the multiverse through [`GameHandlerType`].
//!
//! Handlers receive input only through the two buses of their
//! [`HandlerContext`] and their scheduler, and every one of those entry
//! points runs as the handler's single active operation.

mod context;
pub mod hide_and_seek;
pub mod infection;
pub mod league;
pub mod normal;


pub use context::{HandlerContext, HandlerServices};
pub use hide_and_seek::HideAndSeekGameHandler;
pub use infection::InfectionGameHandler;
pub use league::LeagueGameHandler;
pub use normal::NormalGameHandler;

use crate::error::ServerError;
use crate::messages::ClientMessage;
use crate::model::WorldRecord;
use crate::sync::AggregationStrategyRegistry;
use async_trait::async_trait;
use multiverse_event_system::{Event, EventError, PlayerId};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

// ============================================================================
// Mode table
// ============================================================================

/// The game modes a multiverse can be driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameHandlerType {
    Normal,
    HideAndSeek,
    Infection,
    League,
}

/// Process-wide mode code table, built once on first use.
static HANDLER_TYPES: Lazy<HashMap<i32, GameHandlerType>> = Lazy::new(|| {
    HashMap::from([
        (GameHandlerType::NORMAL, GameHandlerType::Normal),
        (GameHandlerType::HIDE_AND_SEEK, GameHandlerType::HideAndSeek),
        (GameHandlerType::INFECTION, GameHandlerType::Infection),
        (GameHandlerType::LEAGUE, GameHandlerType::League),
    ])
});

impl GameHandlerType {
    pub const NORMAL: i32 = 0;
    pub const HIDE_AND_SEEK: i32 = 1;
    pub const INFECTION: i32 = 2;
    pub const LEAGUE: i32 = 3;

    /// Looks up a mode code. Unknown codes are a configuration error.
    pub fn from_code(code: i32) -> Result<Self, ServerError> {
        HANDLER_TYPES
            .get(&code)
            .copied()
            .ok_or_else(|| ServerError::Configuration(format!("unknown game handler type {code}")))
    }

    pub fn code(self) -> i32 {
        match self {
            GameHandlerType::Normal => Self::NORMAL,
            GameHandlerType::HideAndSeek => Self::HIDE_AND_SEEK,
            GameHandlerType::Infection => Self::INFECTION,
            GameHandlerType::League => Self::LEAGUE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GameHandlerType::Normal => "normal",
            GameHandlerType::HideAndSeek => "hide_and_seek",
            GameHandlerType::Infection => "infection",
            GameHandlerType::League => "league",
        }
    }
}

impl std::fmt::Display for GameHandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Handler contract
// ============================================================================

/// Contract every game mode implements.
///
/// Methods without a default are the mode's rules; the provided methods
/// build the shared plumbing (persistence, notifications, policy refresh)
/// on top of them.
#[async_trait]
pub trait GameHandler: Send + Sync + 'static {
    /// Mode-specific payload attached to `MultiverseInfo`.
    type ClientInfo: Serialize + Send + Sync + 'static;

    fn context(&self) -> &HandlerContext;

    fn handler_type(&self) -> GameHandlerType;

    /// Registers the bus handlers and starts the scheduler, if any.
    async fn start(&self) -> Result<(), ServerError>;

    /// Releases the scheduler and every bus registration.
    async fn stop(&self) {
        self.context().shutdown().await;
    }

    /// Merge policies active for `world`.
    async fn generate_state_aggregation_registry(&self, world: &WorldRecord) -> AggregationStrategyRegistry;

    async fn serialize_state(&self) -> Result<Option<String>, ServerError> {
        Ok(None)
    }

    /// Restores a snapshot and re-derives every cache from current membership.
    async fn restore_state(&self, _serialized: Option<&str>) -> Result<(), ServerError> {
        Ok(())
    }

    async fn is_disposable(&self) -> bool {
        true
    }

    async fn client_info(&self) -> Option<Self::ClientInfo> {
        None
    }

    async fn should_block_starting_new_game(&self) -> bool {
        false
    }

    async fn additional_debug_information(&self) -> Option<String> {
        None
    }

    /// Called after a player's game connection was set up and synced.
    async fn on_game_connection_setup(&self, _player: PlayerId) -> Result<(), ServerError> {
        Ok(())
    }

    /// [`GameHandler::client_info`] as JSON bytes; empty when there is none.
    async fn serialized_client_info(&self) -> Result<Vec<u8>, ServerError> {
        match self.client_info().await {
            Some(info) => Ok(serde_json::to_vec(&info)?),
            None => Ok(Vec::new()),
        }
    }

    async fn client_info_value(&self) -> Result<Option<serde_json::Value>, ServerError> {
        match self.client_info().await {
            Some(info) => Ok(Some(serde_json::to_value(&info)?)),
            None => Ok(None),
        }
    }

    /// Writes the current snapshot into the multiverse record.
    async fn persist_state(&self) -> Result<(), ServerError> {
        let state = self.serialize_state().await?;
        let context = self.context();
        context
            .storage()
            .set_game_handler_state(context.multiverse_id(), state)
            .await?;
        Ok(())
    }

    async fn notify_multiverse_or_client_info_changed(&self) -> Result<(), ServerError> {
        let info = self.client_info_value().await?;
        self.context().broadcast_multiverse_info(info).await
    }

    async fn notify_should_block_starting_game_changed(&self) -> Result<(), ServerError> {
        let block = self.should_block_starting_new_game().await;
        self.context().broadcast_block_starting(block).await
    }

    /// Regenerates and installs the policies of every world of the session.
    async fn refresh_aggregation_registries(&self) -> Result<(), ServerError> {
        let context = self.context();
        let refresh = async {
            let multiverse = context.multiverse().await?;
            for world in multiverse.worlds() {
                let registry = self.generate_state_aggregation_registry(world).await;
                context.sync().install_registry(world.id, registry);
            }
            Ok(())
        };
        context.run_exclusive(refresh).await.unwrap_or(Ok(()))
    }
}

// ============================================================================
// Registration helpers
// ============================================================================

/// Shared state of a handler variant, reachable from its bus closures.
pub(crate) trait HandlerCore: Send + Sync + 'static {
    fn context(&self) -> &HandlerContext;
}

/// Registers a client message handler that calls back into `target`.
///
/// The closure only holds a weak reference, so a registration never keeps a
/// disposed handler alive.
pub(crate) async fn on_message<T, E, F, Fut>(target: &Arc<T>, handler: F)
where
    T: HandlerCore,
    E: Event,
    F: Fn(Arc<T>, Arc<E>, PlayerId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServerError>> + Send + 'static,
{
    let weak = Arc::downgrade(target);
    let context = target.context();
    context
        .message_bus()
        .register(context.owner().clone(), move |message: Arc<E>, sender: PlayerId| {
            let pending = weak.upgrade().map(|target| handler(target, message, sender));
            async move {
                match pending {
                    Some(pending) => pending.await.map_err(EventError::from),
                    None => Ok(()),
                }
            }
        })
        .await;
}

/// Registers a session event handler that calls back into `target`.
pub(crate) async fn on_event<T, E, F, Fut>(target: &Arc<T>, handler: F)
where
    T: HandlerCore,
    E: Event,
    F: Fn(Arc<T>, Arc<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServerError>> + Send + 'static,
{
    let weak = Arc::downgrade(target);
    let context = target.context();
    context
        .multiverse_bus()
        .register(context.owner().clone(), move |event: Arc<E>| {
            let pending = weak.upgrade().map(|target| handler(target, event));
            async move {
                match pending {
                    Some(pending) => pending.await.map_err(EventError::from),
                    None => Ok(()),
                }
            }
        })
        .await;
}

/// Starts `target`'s scheduler; every tick runs as an exclusive operation.
pub(crate) fn on_tick<T, F, Fut>(target: &Arc<T>, tick: F)
where
    T: HandlerCore,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServerError>> + Send + 'static,
{
    let weak = Arc::downgrade(target);
    let tick = Arc::new(tick);
    target.context().start_scheduler(move || {
        let target = weak.upgrade();
        let tick = tick.clone();
        async move {
            let Some(target) = target else {
                return Ok(());
            };
            match target.context().run_exclusive(tick(target.clone())).await {
                Some(Err(error)) => Err(EventError::from(error)),
                _ => Ok(()),
            }
        }
    });
}

/// Registers the uber state handlers every mode shares.
pub(crate) async fn on_uber_state_updates<T: HandlerCore>(target: &Arc<T>) {
    on_message(target, |target: Arc<T>, message: Arc<crate::messages::UberStateUpdateMessage>, sender| async move {
        target
            .context()
            .batch_update_uber_states(sender, &[(message.uber_id, message.value)])
            .await
            .map(|_| ())
    })
    .await;

    on_message(
        target,
        |target: Arc<T>, message: Arc<crate::messages::UberStateBatchUpdateMessage>, sender| async move {
            target
                .context()
                .batch_update_uber_states(sender, &message.pairs())
                .await
                .map(|_| ())
        },
    )
    .await;
}

// ============================================================================
// Sum type
// ============================================================================

/// One game handler of any mode.
///
/// Cheap to clone: every variant is a handle to shared state.
#[derive(Debug, Clone)]
pub enum AnyGameHandler {
    Normal(NormalGameHandler),
    HideAndSeek(HideAndSeekGameHandler),
    Infection(InfectionGameHandler),
    League(LeagueGameHandler),
}

macro_rules! dispatch {
    ($self:expr, $handler:ident => $body:expr) => {
        match $self {
            AnyGameHandler::Normal($handler) => $body,
            AnyGameHandler::HideAndSeek($handler) => $body,
            AnyGameHandler::Infection($handler) => $body,
            AnyGameHandler::League($handler) => $body,
        }
    };
}

impl AnyGameHandler {
    /// Creates the handler variant for `kind` on `context`. Not started.
    pub fn create(kind: GameHandlerType, context: HandlerContext) -> Self {
        match kind {
            GameHandlerType::Normal => AnyGameHandler::Normal(NormalGameHandler::new(context)),
            GameHandlerType::HideAndSeek => AnyGameHandler::HideAndSeek(HideAndSeekGameHandler::new(context)),
            GameHandlerType::Infection => AnyGameHandler::Infection(InfectionGameHandler::new(context)),
            GameHandlerType::League => AnyGameHandler::League(LeagueGameHandler::new(context)),
        }
    }

    pub fn handler_type(&self) -> GameHandlerType {
        dispatch!(self, handler => handler.handler_type())
    }

    pub fn context(&self) -> &HandlerContext {
        dispatch!(self, handler => handler.context())
    }

    /// Forwards a client message to the message bus.
    pub async fn on_message(&self, message: ClientMessage, sender: PlayerId) -> usize {
        let context = self.context();
        match message {
            ClientMessage::UberStateUpdate(message) => context.on_message(message, sender).await,
            ClientMessage::UberStateBatchUpdate(message) => context.on_message(message, sender).await,
            ClientMessage::PlayerPosition(message) => context.on_message(message, sender).await,
            ClientMessage::PlayerUseCatchingAbility(message) => context.on_message(message, sender).await,
        }
    }

    /// Forwards a session event to the multiverse bus.
    pub async fn on_multiverse_event<E: Event>(&self, event: E) -> usize {
        self.context().on_multiverse_event(event).await
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        dispatch!(self, handler => handler.start().await)
    }

    pub async fn stop(&self) {
        dispatch!(self, handler => handler.stop().await)
    }

    pub async fn generate_state_aggregation_registry(&self, world: &WorldRecord) -> AggregationStrategyRegistry {
        dispatch!(self, handler => handler.generate_state_aggregation_registry(world).await)
    }

    pub async fn serialize_state(&self) -> Result<Option<String>, ServerError> {
        dispatch!(self, handler => handler.serialize_state().await)
    }

    pub async fn restore_state(&self, serialized: Option<&str>) -> Result<(), ServerError> {
        dispatch!(self, handler => handler.restore_state(serialized).await)
    }

    pub async fn is_disposable(&self) -> bool {
        dispatch!(self, handler => handler.is_disposable().await)
    }

    pub async fn should_block_starting_new_game(&self) -> bool {
        dispatch!(self, handler => handler.should_block_starting_new_game().await)
    }

    pub async fn additional_debug_information(&self) -> Option<String> {
        dispatch!(self, handler => handler.additional_debug_information().await)
    }

    pub async fn on_game_connection_setup(&self, player: PlayerId) -> Result<(), ServerError> {
        dispatch!(self, handler => handler.on_game_connection_setup(player).await)
    }

    pub async fn serialized_client_info(&self) -> Result<Vec<u8>, ServerError> {
        dispatch!(self, handler => handler.serialized_client_info().await)
    }

    pub async fn client_info_value(&self) -> Result<Option<serde_json::Value>, ServerError> {
        dispatch!(self, handler => handler.client_info_value().await)
    }

    pub async fn persist_state(&self) -> Result<(), ServerError> {
        dispatch!(self, handler => handler.persist_state().await)
    }

    pub async fn notify_multiverse_or_client_info_changed(&self) -> Result<(), ServerError> {
        dispatch!(self, handler => handler.notify_multiverse_or_client_info_changed().await)
    }

    pub async fn notify_should_block_starting_game_changed(&self) -> Result<(), ServerError> {
        dispatch!(self, handler => handler.notify_should_block_starting_game_changed().await)
    }

    pub async fn refresh_aggregation_registries(&self) -> Result<(), ServerError> {
        dispatch!(self, handler => handler.refresh_aggregation_registries().await)
    }

    pub fn as_league(&self) -> Option<&LeagueGameHandler> {
        match self {
            AnyGameHandler::League(handler) => Some(handler),
            _ => None,
        }
    }
}
