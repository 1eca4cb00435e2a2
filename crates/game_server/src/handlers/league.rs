//! # League
//!
//! Asynchronous competitive runs. Every member gets a save GUID when they
//! join; a finished run is submitted once, and only with a save file carrying
//! that GUID.

use super::{on_event, on_uber_state_updates, GameHandler, GameHandlerType, HandlerContext, HandlerCore};
use crate::error::ServerError;
use crate::messages::{DeveloperEvent, PlayerJoinedEvent, WorldCreatedEvent};
use crate::model::WorldRecord;
use crate::sync::{normal_world_sync_aggregation_strategy, AggregationStrategyRegistry};
use async_trait::async_trait;
use multiverse_event_system::{current_timestamp_millis, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// One accepted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueSubmission {
    pub save_guid: Uuid,
    pub in_game_time: f32,
    pub save_file_len: usize,
    /// Milliseconds since the Unix epoch
    pub submitted_at: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeagueState {
    pub save_guids: BTreeMap<PlayerId, Uuid>,
    pub submissions: BTreeMap<PlayerId, LeagueSubmission>,
}

struct Inner {
    context: HandlerContext,
    state: Mutex<LeagueState>,
}

impl HandlerCore for Inner {
    fn context(&self) -> &HandlerContext {
        &self.context
    }
}

impl Inner {
    /// Hands a save GUID to every member that has none yet.
    async fn assign_save_guids(&self, state: &mut LeagueState) -> Result<(), ServerError> {
        let multiverse = self.context.multiverse().await?;
        for member in multiverse.members() {
            state.save_guids.entry(member).or_insert_with(|| {
                debug!("Assigned league save GUID to {}", member);
                Uuid::new_v4()
            });
        }
        Ok(())
    }

    async fn on_membership_changed(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        self.assign_save_guids(&mut state).await
    }

    async fn on_developer_event(&self, event: &DeveloperEvent) -> Result<(), ServerError> {
        match event.event.as_str() {
            "updatePlayerInfoCache" => self.on_membership_changed().await,
            other => {
                debug!("Ignoring developer event '{}'", other);
                Ok(())
            }
        }
    }

    async fn create_submission(
        &self,
        player: PlayerId,
        save_guid: Uuid,
        in_game_time: f32,
        save_file: &[u8],
    ) -> Result<LeagueSubmission, ServerError> {
        let multiverse = self.context.multiverse().await?;
        if !multiverse.members().contains(&player) {
            return Err(ServerError::Validation("You are not part of this league game".to_string()));
        }

        let mut state = self.state.lock().await;
        if state.submissions.contains_key(&player) {
            return Err(ServerError::Validation("You cannot submit a run at this time".to_string()));
        }

        let expected = state
            .save_guids
            .get(&player)
            .copied()
            .ok_or_else(|| ServerError::Validation("No save GUID was assigned to you".to_string()))?;
        if expected != save_guid {
            return Err(ServerError::Validation(format!(
                "Invalid save file GUID, expected {expected} but got {save_guid}"
            )));
        }

        let limit = self.context.config().league.max_save_file_bytes;
        if save_file.len() > limit {
            return Err(ServerError::Validation(format!(
                "Save file too large ({} bytes, at most {} allowed)",
                save_file.len(),
                limit
            )));
        }

        let submission = LeagueSubmission {
            save_guid,
            in_game_time,
            save_file_len: save_file.len(),
            submitted_at: current_timestamp_millis(),
        };
        state.submissions.insert(player, submission.clone());
        info!(
            "🏆 League submission from {} in multiverse {} ({}s in game)",
            player,
            multiverse.id,
            in_game_time
        );
        Ok(submission)
    }
}

/// League game handler.
#[derive(Clone)]
pub struct LeagueGameHandler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LeagueGameHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeagueGameHandler")
            .field("multiverse_id", &self.inner.context.multiverse_id())
            .finish()
    }
}

impl LeagueGameHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                state: Mutex::new(LeagueState::default()),
            }),
        }
    }

    /// Whether `player` is a member that has not submitted yet.
    pub async fn can_submit(&self, player: PlayerId) -> bool {
        let is_member = match self.inner.context.multiverse().await {
            Ok(multiverse) => multiverse.members().contains(&player),
            Err(_) => false,
        };
        is_member && !self.inner.state.lock().await.submissions.contains_key(&player)
    }

    pub async fn player_save_guid(&self, player: PlayerId) -> Option<Uuid> {
        self.inner.state.lock().await.save_guids.get(&player).copied()
    }

    pub async fn submission(&self, player: PlayerId) -> Option<LeagueSubmission> {
        self.inner.state.lock().await.submissions.get(&player).cloned()
    }

    /// Records a finished run of `player`.
    ///
    /// Fails with a validation error, changing nothing, when the player is
    /// not a member, already submitted, sent a save file with another GUID,
    /// or the save file exceeds the configured size.
    pub async fn create_submission(
        &self,
        player: PlayerId,
        save_guid: Uuid,
        in_game_time: f32,
        save_file: &[u8],
    ) -> Result<LeagueSubmission, ServerError> {
        let inner = &self.inner;
        inner
            .context
            .run_exclusive(inner.create_submission(player, save_guid, in_game_time, save_file))
            .await
            .unwrap_or_else(|| Err(ServerError::Validation("This league game is no longer running".to_string())))
    }
}

#[async_trait]
impl GameHandler for LeagueGameHandler {
    type ClientInfo = ();

    fn context(&self) -> &HandlerContext {
        &self.inner.context
    }

    fn handler_type(&self) -> GameHandlerType {
        GameHandlerType::League
    }

    async fn start(&self) -> Result<(), ServerError> {
        let inner = &self.inner;

        on_uber_state_updates(inner).await;
        on_event(inner, |inner: Arc<Inner>, _: Arc<PlayerJoinedEvent>| async move {
            inner.on_membership_changed().await
        })
        .await;
        on_event(inner, |inner: Arc<Inner>, _: Arc<WorldCreatedEvent>| async move {
            inner.on_membership_changed().await
        })
        .await;
        on_event(inner, |inner: Arc<Inner>, event: Arc<DeveloperEvent>| async move {
            inner.on_developer_event(&event).await
        })
        .await;

        info!("🏆 League handler started for multiverse {}", inner.context.multiverse_id());
        Ok(())
    }

    async fn generate_state_aggregation_registry(&self, _world: &WorldRecord) -> AggregationStrategyRegistry {
        normal_world_sync_aggregation_strategy()
    }

    async fn serialize_state(&self) -> Result<Option<String>, ServerError> {
        let state = self.inner.state.lock().await;
        Ok(Some(serde_json::to_string(&*state)?))
    }

    async fn restore_state(&self, serialized: Option<&str>) -> Result<(), ServerError> {
        let inner = &self.inner;
        let restore = async {
            let mut state = inner.state.lock().await;
            if let Some(serialized) = serialized {
                *state = serde_json::from_str(serialized)?;
            }
            inner.assign_save_guids(&mut state).await
        };
        inner.context.run_exclusive(restore).await.unwrap_or(Ok(()))
    }

    async fn should_block_starting_new_game(&self) -> bool {
        true
    }

    async fn additional_debug_information(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        Some(format!(
            "Save GUIDs: {}\nSubmissions: {}",
            state.save_guids.len(),
            state.submissions.len()
        ))
    }
}
