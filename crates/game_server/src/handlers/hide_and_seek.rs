//! # Hide and Seek
//!
//! One universe seeks, every other universe hides. The session moves from
//! the lobby to a hiding countdown, then to the catching phase, during which
//! hider positions are periodically revealed to seekers at a shrinking
//! interval.
//!
//! Seekers are the members of every world sharing a universe with a seeker
//! world. Caught hiders have their world moved into the seeker's universe,
//! which makes them seekers from then on.

use super::{on_event, on_message, on_tick, GameHandler, GameHandlerType, HandlerContext, HandlerCore};
use crate::config::HideAndSeekSettings;
use crate::error::ServerError;
use crate::messages::{
    DeveloperEvent, HorizontalAnchor, PlayerJoinedEvent, PlayerLeftEvent, PlayerPositionMessage, PlayerPositionUpdate,
    PlayerUseCatchingAbilityMessage, PrintTextMessage, ScreenPosition, ServerMessage, SetVisibilityMessage,
    TextAlignment, UberStateBatchUpdateMessage, UberStateUpdateMessage, WorldCreatedEvent, WorldDeletedEvent,
};
use crate::model::{MultiverseRecord, WorldRecord};
use crate::seedgen::SeedGenConfig;
use crate::sync::{
    is_pickup, normal_world_sync_aggregation_strategy, sync, AggregationStrategy, AggregationStrategyRegistry,
};
use async_trait::async_trait;
use multiverse_event_system::{PlayerId, UberId, Vector2, WorldId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Granted to every seeker world when catching starts.
pub const BLAZE_UBER_ID: UberId = UberId::new(6, 1115);

const QUEUE: &str = "hide_and_seek";
const CAUGHT_QUEUE: &str = "hide_and_seek_caught";

/// Catch ability of one seeker world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekerWorldInfo {
    pub world_id: WorldId,
    pub radius: f32,
    pub cooldown: f32,
}

/// Persisted snapshot of a hide and seek game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HideAndSeekState {
    pub started: bool,
    pub catch_phase: bool,
    pub seconds_until_catch_phase: i64,
    pub seeker_hint_base_interval: i64,
    pub seeker_hint_interval_multiplier: f32,
    pub seeker_hint_min_interval: i64,
    pub game_seconds_elapsed: i64,
    pub seconds_until_seeker_hint: i64,
    pub seeker_hints_given: i32,
    /// Root seeker worlds. Worlds sharing their universe seek too.
    pub seeker_worlds: BTreeMap<WorldId, SeekerWorldInfo>,
}

impl Default for HideAndSeekState {
    fn default() -> Self {
        Self::from_settings(&HideAndSeekSettings::default())
    }
}

impl HideAndSeekState {
    pub fn from_settings(settings: &HideAndSeekSettings) -> Self {
        Self {
            started: false,
            catch_phase: false,
            seconds_until_catch_phase: settings.hiding_seconds,
            seeker_hint_base_interval: settings.seeker_hint_base_interval,
            seeker_hint_interval_multiplier: settings.seeker_hint_interval_multiplier,
            seeker_hint_min_interval: settings.seeker_hint_min_interval,
            game_seconds_elapsed: 0,
            seconds_until_seeker_hint: settings.seeker_hint_base_interval,
            seeker_hints_given: 0,
            seeker_worlds: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> HideAndSeekPhase {
        match (self.started, self.catch_phase) {
            (_, true) => HideAndSeekPhase::Catching,
            (true, false) => HideAndSeekPhase::Hiding,
            (false, false) => HideAndSeekPhase::Lobby,
        }
    }

    /// Reveal interval after `hints` reveals: geometric decay, floored.
    pub fn hint_interval(&self, hints: i32) -> i64 {
        let decayed = self.seeker_hint_base_interval as f32 * self.seeker_hint_interval_multiplier.powi(hints);
        (decayed as i64).max(self.seeker_hint_min_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HideAndSeekPhase {
    Lobby,
    Hiding,
    Catching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerRole {
    Hider,
    Seeker,
}

/// Live per-player data. Rebuilt from membership, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PlayerState {
    role: PlayerRole,
    position: Vector2,
    revealed_map_position: Option<Vector2>,
}

impl PlayerState {
    fn new(role: PlayerRole) -> Self {
        Self {
            role,
            position: Vector2::default(),
            revealed_map_position: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HideAndSeekClientInfo {
    pub seeker_world_infos: Vec<SeekerWorldInfo>,
}

#[derive(Debug, Default)]
struct Runtime {
    state: HideAndSeekState,
    players: BTreeMap<PlayerId, PlayerState>,
}

impl Runtime {
    fn everyone(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    fn with_role(&self, role: PlayerRole) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|(_, player)| player.role == role)
            .map(|(id, _)| *id)
            .collect()
    }

    fn client_info(&self) -> HideAndSeekClientInfo {
        HideAndSeekClientInfo {
            seeker_world_infos: self.state.seeker_worlds.values().copied().collect(),
        }
    }
}

/// Every world sharing a universe with a root seeker world.
fn seeker_world_ids(state: &HideAndSeekState, multiverse: &MultiverseRecord) -> BTreeSet<WorldId> {
    multiverse
        .universes
        .iter()
        .filter(|universe| universe.worlds.iter().any(|world| state.seeker_worlds.contains_key(&world.id)))
        .flat_map(|universe| universe.worlds.iter().map(|world| world.id))
        .collect()
}

/// Catch ability of `world`: its own, or that of the root seeker world of its universe.
fn seeker_info_for(state: &HideAndSeekState, multiverse: &MultiverseRecord, world: &WorldRecord) -> Option<SeekerWorldInfo> {
    state.seeker_worlds.get(&world.id).copied().or_else(|| {
        multiverse
            .universe(world.universe_id)?
            .worlds
            .iter()
            .find_map(|sibling| state.seeker_worlds.get(&sibling.id).copied())
    })
}

fn corner_notice(text: impl Into<String>, with_sound: bool) -> ServerMessage {
    PrintTextMessage::new(text)
        .at(Vector2::new(1.5, 0.0))
        .with_id(0)
        .for_seconds(3.0)
        .on_screen(ScreenPosition::BottomRight)
        .anchored(HorizontalAnchor::Right)
        .aligned(TextAlignment::Right)
        .boxed(false)
        .with_sound(with_sound)
        .in_queue(QUEUE)
        .into()
}

const SEEDGEN_HEADERS: [&str; 5] = [
    "vanilla_opher_upgrades",
    "black_market",
    "key_hints",
    "zone_hints",
    "trial_hints",
];

/// Seed for the seeker world: no Blaze, which is granted when catching starts.
pub fn seeker_seedgen_config() -> SeedGenConfig {
    SeedGenConfig {
        flags: vec!["--multiplayer".to_string()],
        presets: vec!["qol".to_string(), "rspawn".to_string()],
        difficulty: "gorlek".to_string(),
        headers: SEEDGEN_HEADERS.iter().map(|header| header.to_string()).collect(),
        custom_headers: vec![[
            "!!remove 2|115",
            "3|0|2|100",
            "3|0|2|5",
            "3|0|2|97",
            "3|0|2|101",
            "3|0|9|0",
        ]
        .join("\n")],
        goals: Vec::new(),
    }
}

pub fn hider_seedgen_config() -> SeedGenConfig {
    let mut headers = vec!["tp_zone_hints".to_string()];
    headers.extend(SEEDGEN_HEADERS.iter().map(|header| header.to_string()));

    SeedGenConfig {
        flags: vec!["--multiplayer".to_string()],
        presets: vec!["qol".to_string(), "rspawn".to_string()],
        difficulty: "gorlek".to_string(),
        headers,
        custom_headers: Vec::new(),
        goals: vec!["trees".to_string()],
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
    /// Re-derives seekers and hiders from current membership, bootstrapping
    /// the first world as seeker world, then broadcasts visibility.
    async fn update_player_info_cache(&self, runtime: &mut Runtime) -> Result<(), ServerError> {
        let multiverse = self.context.multiverse().await?;
        let settings = &self.context.config().hide_and_seek;

        if let Some(first) = multiverse.first_world() {
            if !runtime.state.seeker_worlds.contains_key(&first.id) {
                runtime.state.seeker_worlds.clear();
                runtime.state.seeker_worlds.insert(
                    first.id,
                    SeekerWorldInfo {
                        world_id: first.id,
                        radius: settings.catch_radius,
                        cooldown: settings.catch_cooldown,
                    },
                );
                info!("🔍 World {} is the seeker world of multiverse {}", first.id, multiverse.id);
            }
        }

        let seekers = seeker_world_ids(&runtime.state, &multiverse);
        let mut players = BTreeMap::new();
        for world in multiverse.worlds() {
            let role = if seekers.contains(&world.id) {
                PlayerRole::Seeker
            } else {
                PlayerRole::Hider
            };
            for member in &world.members {
                let mut player = runtime
                    .players
                    .remove(member)
                    .unwrap_or_else(|| PlayerState::new(role));
                player.role = role;
                players.insert(*member, player);
            }
        }
        runtime.players = players;

        self.broadcast_visibility(runtime).await;
        Ok(())
    }

    async fn broadcast_visibility(&self, runtime: &Runtime) {
        let hidden_on_map = runtime
            .players
            .iter()
            .filter(|(_, player)| player.role == PlayerRole::Hider && player.revealed_map_position.is_none())
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        let hidden_in_world = if runtime.state.catch_phase {
            Vec::new()
        } else {
            hidden_on_map.clone()
        };

        let message = ServerMessage::SetVisibility(SetVisibilityMessage {
            hidden_in_world,
            hidden_on_map,
        });
        self.context.send(&runtime.everyone(), message).await;
    }

    async fn broadcast_info(&self, runtime: &Runtime) -> Result<(), ServerError> {
        let info = serde_json::to_value(runtime.client_info())?;
        self.context.broadcast_multiverse_info(Some(info)).await
    }

    async fn on_position(&self, message: &PlayerPositionMessage, sender: PlayerId) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        let Some(player) = runtime.players.get_mut(&sender) else {
            return Ok(());
        };
        player.position = Vector2::new(message.x, message.y);
        let player = *player;

        let multiverse = self.context.multiverse().await?;
        let universe_members = multiverse
            .world_of(sender)
            .and_then(|world| multiverse.universe(world.universe_id))
            .map(|universe| universe.members())
            .unwrap_or_default()
            .into_iter()
            .filter(|member| *member != sender)
            .collect::<Vec<_>>();

        let update = PlayerPositionUpdate {
            player_id: sender,
            x: message.x,
            y: message.y,
        };

        match player.role {
            PlayerRole::Seeker => {
                self.context
                    .send_unreliable(&universe_members, ServerMessage::UpdatePlayerPosition(update))
                    .await;
            }
            PlayerRole::Hider => {
                self.context
                    .send_unreliable(&universe_members, ServerMessage::UpdatePlayerWorldPosition(update))
                    .await;

                if let Some(revealed) = player.revealed_map_position {
                    let seekers = runtime
                        .with_role(PlayerRole::Seeker)
                        .into_iter()
                        .filter(|seeker| *seeker != sender)
                        .collect::<Vec<_>>();
                    let update = PlayerPositionUpdate {
                        player_id: sender,
                        x: revealed.x,
                        y: revealed.y,
                    };
                    self.context
                        .send_unreliable(&seekers, ServerMessage::UpdatePlayerMapPosition(update))
                        .await;
                }
            }
        }

        Ok(())
    }

    async fn on_catch(&self, seeker: PlayerId) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        let multiverse = self.context.multiverse().await?;

        let Some(seeker_world) = multiverse.world_of(seeker) else {
            return Ok(());
        };
        let Some(ability) = seeker_info_for(&runtime.state, &multiverse, seeker_world) else {
            debug!("Ignoring catching ability used by hider {}", seeker);
            return Ok(());
        };

        let everyone = runtime.everyone();
        let others = everyone.iter().copied().filter(|player| *player != seeker).collect::<Vec<_>>();
        self.context
            .send(&others, ServerMessage::PlayerUsedCatchingAbility { player_id: seeker })
            .await;

        let Some(seeker_position) = runtime.players.get(&seeker).map(|player| player.position) else {
            return Ok(());
        };
        let radius_squared = ability.radius * ability.radius;
        let caught = runtime
            .players
            .iter()
            .filter(|(_, player)| {
                player.role == PlayerRole::Hider && seeker_position.distance_squared_to(&player.position) < radius_squared
            })
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();

        if caught.is_empty() {
            return Ok(());
        }

        let seeker_name = self.context.player_name(seeker).await;
        let notice = PrintTextMessage::new(format!(
            "You have been caught by {seeker_name}!\nYou are now a seeker in {seeker_name}'s world."
        ))
        .at(Vector2::new(0.0, 0.0))
        .with_id(0)
        .for_seconds(5.0)
        .on_screen(ScreenPosition::MiddleCenter)
        .boxed(true)
        .with_sound(false);
        self.context.send(&caught, notice.into()).await;

        for player in &caught {
            self.context
                .send(&everyone, ServerMessage::PlayerCaught { player_id: *player })
                .await;
        }

        let caught_worlds = caught
            .iter()
            .filter_map(|player| multiverse.world_of(*player))
            .map(|world| world.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        self.context
            .storage()
            .move_worlds_to_universe(&caught_worlds, seeker_world.universe_id)
            .await
            .map_err(|e| ServerError::from(e).vanished())?;
        info!(
            "🎯 {} caught {} hider(s); worlds {:?} joined universe {}",
            seeker_name,
            caught.len(),
            caught_worlds,
            seeker_world.universe_id
        );

        self.update_player_info_cache(&mut runtime).await?;

        // Moved worlds now observe the seeker universe's progression.
        for world in &caught_worlds {
            let state = self.context.sync().world_state(*world).await?;
            let members = multiverse
                .world(*world)
                .map(|world| world.members.iter().copied().collect::<Vec<_>>())
                .unwrap_or_default();
            let updates = state
                .into_iter()
                .map(|(uber_id, value)| UberStateUpdateMessage::new(uber_id, value))
                .collect();
            self.context
                .send(&members, ServerMessage::UberStateBatchUpdate(UberStateBatchUpdateMessage::new(updates)))
                .await;
        }

        let hiders = runtime.with_role(PlayerRole::Hider);
        for player in &caught {
            let name = self.context.player_name(*player).await;
            let announcement = PrintTextMessage::new(format!("{name} has been caught by {seeker_name}!"))
                .at(Vector2::new(0.0, 0.0))
                .with_id(0)
                .for_seconds(3.0)
                .on_screen(ScreenPosition::MiddleCenter)
                .boxed(true)
                .with_sound(true)
                .in_queue(CAUGHT_QUEUE);
            self.context.send(&hiders, announcement.into()).await;
        }

        Ok(())
    }

    /// Reconciles the updates, then tells a seeker which hider worlds
    /// already own the pickups they just collected.
    async fn on_uber_states(&self, sender: PlayerId, updates: &[(UberId, f64)]) -> Result<(), ServerError> {
        let Some(result) = self.context.batch_update_uber_states(sender, updates).await? else {
            return Ok(());
        };

        let pickups = updates
            .iter()
            .map(|(uber_id, _)| *uber_id)
            .filter(|uber_id| is_pickup(*uber_id))
            .collect::<BTreeSet<_>>();
        if pickups.is_empty() {
            return Ok(());
        }

        let runtime = self.runtime.lock().await;
        let multiverse = self.context.multiverse().await?;
        let seekers = seeker_world_ids(&runtime.state, &multiverse);
        if !seekers.contains(&result.world_id) {
            return Ok(());
        }

        let position = runtime
            .players
            .get(&sender)
            .map(|player| player.position)
            .unwrap_or_default();
        let recipients = multiverse
            .world(result.world_id)
            .map(|world| world.members.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();

        for pickup in pickups {
            let mut owners = Vec::new();
            for world in multiverse.worlds().filter(|world| !seekers.contains(&world.id)) {
                if self.context.sync().current_value(world.id, pickup).await? == Some(1.0) {
                    owners.push(world.name.clone());
                }
            }

            if !owners.is_empty() {
                let message = PrintTextMessage::new(owners.join("\n"))
                    .at(position + Vector2::new(0.0, -1.0))
                    .for_seconds(3.0)
                    .in_game();
                self.context.send(&recipients, message.into()).await;
            }
        }

        Ok(())
    }

    async fn on_developer_event(&self, event: &DeveloperEvent) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        match event.event.as_str() {
            "start" => {
                runtime.state.started = true;
                self.context.set_handler_active(true).await?;
                info!("🏁 Hide and seek started in multiverse {}", self.context.multiverse_id());
                self.broadcast_info(&runtime).await?;
            }
            "updatePlayerInfoCache" => {
                self.update_player_info_cache(&mut runtime).await?;
            }
            "reset" => {
                runtime.state = HideAndSeekState::from_settings(&self.context.config().hide_and_seek);
                runtime.players.clear();
                self.update_player_info_cache(&mut runtime).await?;
                self.context.set_handler_active(false).await?;
                info!("🔄 Hide and seek reset in multiverse {}", self.context.multiverse_id());
                self.broadcast_info(&runtime).await?;
            }
            other => debug!("Ignoring developer event '{}'", other),
        }
        Ok(())
    }

    async fn on_world_created(&self, event: &WorldCreatedEvent) -> Result<(), ServerError> {
        info!("🌍 World {} created in multiverse {}", event.world.id, self.context.multiverse_id());
        let mut runtime = self.runtime.lock().await;

        if let Some(generator) = self.context.services().seed_generator.clone() {
            let config = if runtime.state.seeker_worlds.is_empty() {
                seeker_seedgen_config()
            } else {
                hider_seedgen_config()
            };

            match generator.generate_seed(&config, None).await {
                Ok(seed) => {
                    if let Some(world_seed) = seed.world_seeds.first() {
                        self.context
                            .storage()
                            .set_world_seed(event.world.id, Some(world_seed.id))
                            .await?;
                    }
                }
                Err(e) => warn!("⚠️ Seed generation for world {} failed: {}", event.world.id, e),
            }
        }

        self.update_player_info_cache(&mut runtime).await
    }

    async fn on_world_deleted(&self, event: &WorldDeletedEvent) -> Result<(), ServerError> {
        info!("🗑️ World {} deleted from multiverse {}", event.world_id, self.context.multiverse_id());
        let mut runtime = self.runtime.lock().await;
        runtime.state.seeker_worlds.remove(&event.world_id);
        self.update_player_info_cache(&mut runtime).await
    }

    async fn on_membership_changed(&self) -> Result<(), ServerError> {
        let mut runtime = self.runtime.lock().await;
        self.update_player_info_cache(&mut runtime).await
    }

    async fn grant_blaze(&self, runtime: &Runtime) -> Result<(), ServerError> {
        let multiverse = self.context.multiverse().await?;
        for world in seeker_world_ids(&runtime.state, &multiverse) {
            self.context.grant_to_world(world, &[(BLAZE_UBER_ID, 1.0)]).await?;
        }
        Ok(())
    }

    async fn tick(&self) -> Result<(), ServerError> {
        let mut guard = self.runtime.lock().await;
        let runtime = &mut *guard;
        if !runtime.state.started {
            return Ok(());
        }

        let everyone = runtime.everyone();
        let state = &mut runtime.state;

        if !state.catch_phase {
            state.seconds_until_catch_phase -= 1;

            if state.seconds_until_catch_phase <= 0 {
                state.catch_phase = true;
                info!("🏃 Catching started in multiverse {}", self.context.multiverse_id());

                self.grant_blaze(runtime).await?;
                let go = PrintTextMessage::new("<s_2>GO!</>")
                    .at(Vector2::new(0.0, 1.0))
                    .with_id(0)
                    .for_seconds(3.0)
                    .on_screen(ScreenPosition::MiddleCenter)
                    .in_queue(QUEUE);
                self.context.send(&everyone, go.into()).await;
                self.broadcast_visibility(runtime).await;
            } else {
                let remaining = state.seconds_until_catch_phase;
                let text = format!("Catching starts in {}:{:02}", remaining / 60, remaining % 60);
                self.context.send(&everyone, corner_notice(text, false)).await;
            }

            return Ok(());
        }

        state.game_seconds_elapsed += 1;
        state.seconds_until_seeker_hint -= 1;
        let countdown_window = (state.hint_interval(state.seeker_hints_given) / 2).min(30);

        if state.seconds_until_seeker_hint <= 0 {
            state.seeker_hints_given += 1;
            state.seconds_until_seeker_hint = state.hint_interval(state.seeker_hints_given);

            for player in runtime.players.values_mut() {
                if player.role == PlayerRole::Hider {
                    player.revealed_map_position = Some(player.position);
                }
            }

            self.context
                .send(&everyone, corner_notice("Hider positions revealed to seekers!", true))
                .await;
            self.broadcast_visibility(runtime).await;
        } else if state.seconds_until_seeker_hint <= countdown_window {
            let text = format!("Revealing hider positions in {}s", state.seconds_until_seeker_hint);
            self.context.send(&everyone, corner_notice(text, true)).await;
        }

        Ok(())
    }
}

/// Hide-and-Seek game handler.
#[derive(Clone)]
pub struct HideAndSeekGameHandler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HideAndSeekGameHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HideAndSeekGameHandler")
            .field("multiverse_id", &self.inner.context.multiverse_id())
            .finish()
    }
}

impl HideAndSeekGameHandler {
    pub fn new(context: HandlerContext) -> Self {
        let state = HideAndSeekState::from_settings(&context.config().hide_and_seek);
        Self {
            inner: Arc::new(Inner {
                context,
                runtime: Mutex::new(Runtime {
                    state,
                    players: BTreeMap::new(),
                }),
            }),
        }
    }

    pub async fn phase(&self) -> HideAndSeekPhase {
        self.inner.runtime.lock().await.state.phase()
    }

    pub async fn state(&self) -> HideAndSeekState {
        self.inner.runtime.lock().await.state.clone()
    }

    /// Current role of a session member, if known.
    pub async fn role_of(&self, player: PlayerId) -> Option<PlayerRole> {
        self.inner
            .runtime
            .lock()
            .await
            .players
            .get(&player)
            .map(|player| player.role)
    }
}

#[async_trait]
impl GameHandler for HideAndSeekGameHandler {
    type ClientInfo = HideAndSeekClientInfo;

    fn context(&self) -> &HandlerContext {
        &self.inner.context
    }

    fn handler_type(&self) -> GameHandlerType {
        GameHandlerType::HideAndSeek
    }

    async fn start(&self) -> Result<(), ServerError> {
        let inner = &self.inner;

        on_message(inner, |inner: Arc<Inner>, message: Arc<PlayerPositionMessage>, sender| async move {
            inner.on_position(&message, sender).await
        })
        .await;
        on_message(inner, |inner: Arc<Inner>, _: Arc<PlayerUseCatchingAbilityMessage>, sender| async move {
            inner.on_catch(sender).await
        })
        .await;
        on_message(inner, |inner: Arc<Inner>, message: Arc<UberStateUpdateMessage>, sender| async move {
            inner.on_uber_states(sender, &[(message.uber_id, message.value)]).await
        })
        .await;
        on_message(inner, |inner: Arc<Inner>, message: Arc<UberStateBatchUpdateMessage>, sender| async move {
            inner.on_uber_states(sender, &message.pairs()).await
        })
        .await;

        on_event(inner, |inner: Arc<Inner>, event: Arc<DeveloperEvent>| async move {
            inner.on_developer_event(&event).await
        })
        .await;
        on_event(inner, |inner: Arc<Inner>, event: Arc<WorldCreatedEvent>| async move {
            inner.on_world_created(&event).await
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

        info!("🙈 Hide and seek handler started for multiverse {}", inner.context.multiverse_id());
        Ok(())
    }

    async fn generate_state_aggregation_registry(&self, _world: &WorldRecord) -> AggregationStrategyRegistry {
        normal_world_sync_aggregation_strategy()
            + AggregationStrategyRegistry::new().with(sync(BLAZE_UBER_ID).with(AggregationStrategy::Max))
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
            inner.update_player_info_cache(&mut runtime).await
        };
        inner.context.run_exclusive(restore).await.unwrap_or(Ok(()))
    }

    async fn is_disposable(&self) -> bool {
        !self.inner.context.has_connected_members().await
    }

    async fn client_info(&self) -> Option<HideAndSeekClientInfo> {
        Some(self.inner.runtime.lock().await.client_info())
    }

    async fn additional_debug_information(&self) -> Option<String> {
        let runtime = self.inner.runtime.lock().await;
        let mut info = format!("Phase: {:?}\nPlayer Infos:", runtime.state.phase());
        for (id, player) in &runtime.players {
            info.push_str(&format!(
                "\n  - {}: {:?} at ({}, {})",
                id, player.role, player.position.x, player.position.y
            ));
        }
        Some(info)
    }

    async fn on_game_connection_setup(&self, _player: PlayerId) -> Result<(), ServerError> {
        let inner = &self.inner;
        let setup = async {
            let runtime = inner.runtime.lock().await;
            inner.broadcast_visibility(&runtime).await;
        };
        inner.context.run_exclusive(setup).await;
        Ok(())
    }
}
