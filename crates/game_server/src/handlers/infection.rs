//! # Infection
//!
//! The first world starts infected. Infected players spread the infection
//! with the catching ability; every world within range of an infected
//! player becomes infected too. The game ends once no healthy world is left.
//!
//! The infection flag is shared across all infected worlds and kept
//! per-world everywhere else, so healthy worlds never learn it early.

use super::{
    on_event, on_message, on_tick, on_uber_state_updates, GameHandler, GameHandlerType, HandlerContext, HandlerCore,
};
use crate::error::ServerError;
use crate::messages::{
    DeveloperEvent, PlayerJoinedEvent, PlayerLeftEvent, PlayerPositionMessage, PlayerPositionUpdate,
    PlayerUseCatchingAbilityMessage, PrintTextMessage, ScreenPosition, ServerMessage, WorldCreatedEvent,
    WorldDeletedEvent,
};
use crate::model::{MultiverseRecord, WorldRecord};
use crate::sync::{
    normal_world_sync_aggregation_strategy, sync, AggregationStrategy, AggregationStrategyRegistry, ShareScope,
};
use async_trait::async_trait;
use multiverse_event_system::{PlayerId, UberId, Vector2, WorldId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Set on every infected world.
pub const INFECTED_UBER_ID: UberId = UberId::new(6, 2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InfectionPhase {
    #[default]
    Lobby,
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InfectionState {
    pub phase: InfectionPhase,
    pub infected_worlds: BTreeSet<WorldId>,
    pub seconds_elapsed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfectionClientInfo {
    pub phase: InfectionPhase,
    pub infected_world_ids: Vec<WorldId>,
}

/// Merge policies of one world under `state`.
fn infection_registry(state: &InfectionState, world: &WorldRecord) -> AggregationStrategyRegistry {
    let infection = if state.infected_worlds.contains(&world.id) {
        sync(INFECTED_UBER_ID).with(AggregationStrategy::Max).across(ShareScope::Multiverse)
    } else {
        sync(INFECTED_UBER_ID).with(AggregationStrategy::Copy).across(ShareScope::World)
    };
    normal_world_sync_aggregation_strategy() + AggregationStrategyRegistry::new().with(infection)
}

#[derive(Debug, Default)]
struct Runtime {
    state: InfectionState,
    /// Last reported position of every session member
    positions: BTreeMap<PlayerId, Vector2>,
}

impl Runtime {
    fn client_info(&self) -> InfectionClientInfo {
        InfectionClientInfo {
            phase: self.state.phase,
            infected_world_ids: self.state.infected_worlds.iter().copied().collect(),
        }
    }
}

struct Inner {
    context: HandlerContext,
    runtime: Mutex<Runtime>,
}

impl HandlerCore for Inner {
    fn context(&self) -> &HandlerContext {
        &self.context
    }
}

impl Inner {
    /// Prunes vanished worlds and players and infects the first world of a
    /// session that has none.
    async fn update_player_info_cache(&self, runtime: &mut Runtime) -> Result<MultiverseRecord, ServerError> {
        let multiverse = self.context.multiverse().await?;

        runtime
            .state
            .infected_worlds
            .retain(|world| multiverse.world(*world).is_some());
        if runtime.state.infected_worlds.is_empty() {
            if let Some(first) = multiverse.first_world() {
                runtime.state.infected_worlds.insert(first.id);
                info!("🦠 World {} is patient zero of multiverse {}", first.id, multiverse.id);
            }
        }

        let members = multiverse.members();
        runtime.positions.retain(|player, _| members.contains(player));
        for member in members {
            runtime.positions.entry(member).or_default();
        }

        Ok(multiverse)
    }

    async fn broadcast_info(&self, runtime: &Runtime) -> Result<(), ServerError> {
        let info = serde_json::to_value(runtime.client_info())?;
        self.context.broadcast_multiverse_info(Some(info)).await
    }

    async fn on_position(&self, message: &PlayerPositionMessage, sender: PlayerId) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        let Some(position) = runtime.positions.get_mut(&sender) else {
            return Ok(());
        };
        *position = Vector2::new(message.x, message.y);

        let others = runtime
            .positions
            .keys()
            .copied()
            .filter(|player| *player != sender)
            .collect::<Vec<_>>();
        let update = PlayerPositionUpdate {
            player_id: sender,
            x: message.x,
            y: message.y,
        };
        self.context
            .send_unreliable(&others, ServerMessage::UpdatePlayerPosition(update))
            .await;
        Ok(())
    }

    async fn on_catch(&self, infector: PlayerId) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        if runtime.state.phase != InfectionPhase::Running {
            debug!("Ignoring catching ability outside a running infection game");
            return Ok(());
        }

        let multiverse = self.context.multiverse().await?;
        let Some(world) = multiverse.world_of(infector) else {
            return Ok(());
        };
        if !runtime.state.infected_worlds.contains(&world.id) {
            debug!("Ignoring catching ability used by healthy player {}", infector);
            return Ok(());
        }

        let everyone = multiverse.members().into_iter().collect::<Vec<_>>();
        let others = everyone.iter().copied().filter(|player| *player != infector).collect::<Vec<_>>();
        self.context
            .send(&others, ServerMessage::PlayerUsedCatchingAbility { player_id: infector })
            .await;

        let origin = runtime.positions.get(&infector).copied().unwrap_or_default();
        let radius = self.context.config().infection.infection_radius;
        let mut victims = Vec::new();
        let mut newly_infected = BTreeSet::new();
        for healthy in multiverse
            .worlds()
            .filter(|world| !runtime.state.infected_worlds.contains(&world.id))
        {
            for member in &healthy.members {
                let position = runtime.positions.get(member).copied().unwrap_or_default();
                if origin.distance_squared_to(&position) < radius * radius {
                    victims.push(*member);
                    newly_infected.insert(healthy.id);
                }
            }
        }

        if victims.is_empty() {
            return Ok(());
        }

        runtime.state.infected_worlds.extend(newly_infected.iter().copied());
        let state = runtime.state.clone();
        self.context
            .install_registries(&multiverse, |world| infection_registry(&state, world));
        for world in &newly_infected {
            self.context.grant_to_world(*world, &[(INFECTED_UBER_ID, 1.0)]).await?;
        }

        let infector_name = self.context.player_name(infector).await;
        let notice = PrintTextMessage::new(format!("You have been infected by {infector_name}!"))
            .for_seconds(5.0)
            .on_screen(ScreenPosition::MiddleCenter)
            .boxed(true);
        self.context.send(&victims, notice.into()).await;
        for victim in &victims {
            self.context
                .send(&everyone, ServerMessage::PlayerCaught { player_id: *victim })
                .await;
        }
        info!(
            "🦠 {} infected {} player(s) in multiverse {}",
            infector_name,
            victims.len(),
            multiverse.id
        );

        if multiverse
            .worlds()
            .all(|world| runtime.state.infected_worlds.contains(&world.id))
        {
            runtime.state.phase = InfectionPhase::Finished;
            let elapsed = runtime.state.seconds_elapsed;
            let summary = PrintTextMessage::new(format!(
                "Everyone is infected! The game lasted {}:{:02}",
                elapsed / 60,
                elapsed % 60
            ))
            .for_seconds(10.0)
            .on_screen(ScreenPosition::MiddleCenter)
            .boxed(true);
            self.context.send(&everyone, summary.into()).await;
            self.context.set_handler_active(false).await?;
            self.context.broadcast_block_starting(false).await?;
            info!("🏆 Infection finished in multiverse {} after {}s", multiverse.id, elapsed);
        }

        self.broadcast_info(&runtime).await
    }

    async fn on_developer_event(&self, event: &DeveloperEvent) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        match event.event.as_str() {
            "start" if runtime.state.phase == InfectionPhase::Lobby => {
                self.update_player_info_cache(&mut runtime).await?;
                runtime.state.phase = InfectionPhase::Running;
                runtime.state.seconds_elapsed = 0;
                self.context.set_handler_active(true).await?;
                info!("🏁 Infection started in multiverse {}", self.context.multiverse_id());
                self.broadcast_info(&runtime).await?;
                self.context.broadcast_block_starting(true).await?;
            }
            "start" => debug!("Infection game already {:?}", runtime.state.phase),
            "updatePlayerInfoCache" => {
                self.update_player_info_cache(&mut runtime).await?;
            }
            "reset" => {
                runtime.state = InfectionState::default();
                let multiverse = self.update_player_info_cache(&mut runtime).await?;
                let state = runtime.state.clone();
                self.context
                    .install_registries(&multiverse, |world| infection_registry(&state, world));
                self.context.set_handler_active(false).await?;
                info!("🔄 Infection reset in multiverse {}", multiverse.id);
                self.broadcast_info(&runtime).await?;
                self.context.broadcast_block_starting(false).await?;
            }
            other => debug!("Ignoring developer event '{}'", other),
        }
        Ok(())
    }

    async fn on_world_deleted(&self, event: &WorldDeletedEvent) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        runtime.state.infected_worlds.remove(&event.world_id);
        self.update_player_info_cache(&mut runtime).await.map(|_| ())
    }

    async fn on_membership_changed(&self) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        self.update_player_info_cache(&mut runtime).await.map(|_| ())
    }

    async fn tick(&self) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        if runtime.state.phase == InfectionPhase::Running {
            runtime.state.seconds_elapsed += 1;
        }
        Ok(())
    }
}

/// Infection game handler.
#[derive(Clone)]
pub struct InfectionGameHandler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InfectionGameHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfectionGameHandler")
            .field("multiverse_id", &self.inner.context.multiverse_id())
            .finish()
    }
}

impl InfectionGameHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                runtime: Mutex::new(Runtime::default()),
            }),
        }
    }

    pub async fn phase(&self) -> InfectionPhase {
        self.inner.runtime.lock().await.state.phase
    }

    pub async fn state(&self) -> InfectionState {
        self.inner.runtime.lock().await.state.clone()
    }

    pub async fn is_world_infected(&self, world: WorldId) -> bool {
        self.inner.runtime.lock().await.state.infected_worlds.contains(&world)
    }
}

#[async_trait]
impl GameHandler for InfectionGameHandler {
    type ClientInfo = InfectionClientInfo;

    fn context(&self) -> &HandlerContext {
        &self.inner.context
    }

    fn handler_type(&self) -> GameHandlerType {
        GameHandlerType::Infection
    }

    async fn start(&self) -> Result<(), ServerError> {
        let inner = &self.inner;

        on_uber_state_updates(inner).await;
        on_message(inner, |inner: Arc<Inner>, message: Arc<PlayerPositionMessage>, sender| async move {
            inner.on_position(&message, sender).await
        })
        .await;
        on_message(inner, |inner: Arc<Inner>, _: Arc<PlayerUseCatchingAbilityMessage>, sender| async move {
            inner.on_catch(sender).await
        })
        .await;

        on_event(inner, |inner: Arc<Inner>, event: Arc<DeveloperEvent>| async move {
            inner.on_developer_event(&event).await
        })
        .await;
        on_event(inner, |inner: Arc<Inner>, _: Arc<WorldCreatedEvent>| async move {
            inner.on_membership_changed().await
        })
        .await;
        on_event(inner, |inner: Arc<Inner>, event: Arc<WorldDeletedEvent>| async move {
            inner.on_world_deleted(&event).await
        })
        .await;
        on_event(inner, |inner: Arc<Inner>, _: Arc<PlayerJoinedEvent>| async move {
            inner.on_membership_changed().await
        })
        .await;
        on_event(inner, |inner: Arc<Inner>, _: Arc<PlayerLeftEvent>| async move {
            inner.on_membership_changed().await
        })
        .await;

        on_tick(inner, |inner: Arc<Inner>| async move { inner.tick().await });

        info!("🦠 Infection handler started for multiverse {}", inner.context.multiverse_id());
        Ok(())
    }

    async fn generate_state_aggregation_registry(&self, world: &WorldRecord) -> AggregationStrategyRegistry {
        let runtime = self.inner.runtime.lock().await;
        infection_registry(&runtime.state, world)
    }

    async fn serialize_state(&self) -> Result<Option<String>, ServerError> {
        let runtime = self.inner.runtime.lock().await;
        Ok(Some(serde_json::to_string(&runtime.state)?))
    }

    async fn restore_state(&self, serialized: Option<&str>) -> Result<(), ServerError> {
        let inner = &self.inner;
        let restore = async {
            let mut runtime = inner.runtime.lock().await;
            if let Some(serialized) = serialized {
                runtime.state = serde_json::from_str(serialized)?;
            }
            inner.update_player_info_cache(&mut runtime).await.map(|_| ())
        };
        inner.context.run_exclusive(restore).await.unwrap_or(Ok(()))
    }

    async fn is_disposable(&self) -> bool {
        !self.inner.context.has_connected_members().await
    }

    async fn client_info(&self) -> Option<InfectionClientInfo> {
        Some(self.inner.runtime.lock().await.client_info())
    }

    async fn should_block_starting_new_game(&self) -> bool {
        self.phase().await == InfectionPhase::Running
    }

    async fn additional_debug_information(&self) -> Option<String> {
        let runtime = self.inner.runtime.lock().await;
        Some(format!(
            "Phase: {:?}\nInfected worlds: {:?}\nSeconds elapsed: {}",
            runtime.state.phase, runtime.state.infected_worlds, runtime.state.seconds_elapsed
        ))
    }
}
