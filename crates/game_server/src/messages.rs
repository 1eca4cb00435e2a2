//! # Message Types
//!
//! Inbound client messages (dispatched on a game handler's message bus),
//! session events (dispatched on its multiverse bus) and the outbound
//! [`ServerMessage`] contract.
//!
//! Outbound messages are partial updates: optional fields are omitted from
//! the wire when unset so receivers merge them into what they already hold.

use crate::model::WorldRecord;
use multiverse_event_system::{MultiverseId, PlayerId, UberId, UniverseId, Vector2, WorldId};
use serde::{Deserialize, Serialize};

/// Version stamped on every outbound [`Envelope`].
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Inbound client messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UberStateUpdateMessage {
    pub uber_id: UberId,
    pub value: f64,
}

impl UberStateUpdateMessage {
    pub fn new(uber_id: UberId, value: f64) -> Self {
        Self { uber_id, value }
    }
}

/// Several uber state updates reconciled as one transaction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UberStateBatchUpdateMessage {
    pub updates: Vec<UberStateUpdateMessage>,
}

impl UberStateBatchUpdateMessage {
    pub fn new(updates: Vec<UberStateUpdateMessage>) -> Self {
        Self { updates }
    }

    /// Updates as `(id, value)` pairs in submission order.
    pub fn pairs(&self) -> Vec<(UberId, f64)> {
        self.updates.iter().map(|u| (u.uber_id, u.value)).collect()
    }
}

impl From<UberStateUpdateMessage> for UberStateBatchUpdateMessage {
    fn from(update: UberStateUpdateMessage) -> Self {
        Self { updates: vec![update] }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerPositionMessage {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerUseCatchingAbilityMessage;

/// Every message a game client may send to its game handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    UberStateUpdate(UberStateUpdateMessage),
    UberStateBatchUpdate(UberStateBatchUpdateMessage),
    PlayerPosition(PlayerPositionMessage),
    PlayerUseCatchingAbility(PlayerUseCatchingAbilityMessage),
}

// ============================================================================
// Session events
// ============================================================================

/// A world was created; dispatched after the storage write.
#[derive(Debug, Clone)]
pub struct WorldCreatedEvent {
    pub world: WorldRecord,
}

#[derive(Debug, Clone)]
pub struct WorldDeletedEvent {
    pub world_id: WorldId,
}

#[derive(Debug, Clone)]
pub struct PlayerJoinedEvent {
    pub player_id: PlayerId,
    pub world_id: WorldId,
}

#[derive(Debug, Clone)]
pub struct PlayerLeftEvent {
    pub player_id: PlayerId,
    pub world_id: WorldId,
}

/// Developer and debug commands such as `start` or `reset`.
#[derive(Debug, Clone)]
pub struct DeveloperEvent {
    pub event: String,
    pub payload: Option<serde_json::Value>,
}

impl DeveloperEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: None,
        }
    }
}

/// Session command issued by a player.
#[derive(Debug, Clone)]
pub struct MultiverseEvent {
    pub event: String,
    pub sender: PlayerId,
    pub payload: Option<serde_json::Value>,
}

// ============================================================================
// Outbound messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenPosition {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    MiddleCenter,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalAnchor {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlignment {
    Left,
    Center,
    Right,
    Justify,
}

/// On-screen text.
///
/// Built with chained setters; only the fields that were set are sent.
///
/// ```rust
/// use game_server::messages::{PrintTextMessage, ScreenPosition};
///
/// let message = PrintTextMessage::new("GO!")
///     .for_seconds(3.0)
///     .on_screen(ScreenPosition::MiddleCenter)
///     .in_queue("hide_and_seek");
/// let json = serde_json::to_value(&message).unwrap();
/// assert!(json.get("with_box").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrintTextMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vector2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_position: Option<ScreenPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_anchor: Option<HorizontalAnchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<TextAlignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_box: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_sound: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_in_game_coordinates: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

impl PrintTextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn at(mut self, position: Vector2) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn for_seconds(mut self, time: f32) -> Self {
        self.time = Some(time);
        self
    }

    pub fn on_screen(mut self, screen_position: ScreenPosition) -> Self {
        self.screen_position = Some(screen_position);
        self
    }

    pub fn anchored(mut self, anchor: HorizontalAnchor) -> Self {
        self.horizontal_anchor = Some(anchor);
        self
    }

    pub fn aligned(mut self, alignment: TextAlignment) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn boxed(mut self, with_box: bool) -> Self {
        self.with_box = Some(with_box);
        self
    }

    pub fn with_sound(mut self, with_sound: bool) -> Self {
        self.with_sound = Some(with_sound);
        self
    }

    /// Interprets `position` as in-game coordinates instead of screen space.
    pub fn in_game(mut self) -> Self {
        self.use_in_game_coordinates = Some(true);
        self
    }

    pub fn in_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// Players to hide from every other client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetVisibilityMessage {
    pub hidden_in_world: Vec<PlayerId>,
    pub hidden_on_map: Vec<PlayerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerPositionUpdate {
    pub player_id: PlayerId,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldInfo {
    pub id: WorldId,
    pub name: String,
    pub members: Vec<PlayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseInfo {
    pub id: UniverseId,
    pub worlds: Vec<WorldInfo>,
}

/// Session overview sent whenever membership or handler configuration changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiverseInfoMessage {
    pub id: MultiverseId,
    pub game_handler_type: i32,
    pub game_handler_active: bool,
    pub universes: Vec<UniverseInfo>,
    /// Mode-specific client info, when the handler publishes any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_handler_client_info: Option<serde_json::Value>,
}

/// Every message the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    UberStateBatchUpdate(UberStateBatchUpdateMessage),
    PrintText(PrintTextMessage),
    SetVisibility(SetVisibilityMessage),
    UpdatePlayerPosition(PlayerPositionUpdate),
    UpdatePlayerWorldPosition(PlayerPositionUpdate),
    UpdatePlayerMapPosition(PlayerPositionUpdate),
    PlayerUsedCatchingAbility { player_id: PlayerId },
    PlayerCaught { player_id: PlayerId },
    MultiverseInfo(MultiverseInfoMessage),
    SetBlockStartingNewGame { block: bool },
}

impl From<PrintTextMessage> for ServerMessage {
    fn from(message: PrintTextMessage) -> Self {
        ServerMessage::PrintText(message)
    }
}

/// Versioned wrapper around one outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub payload: ServerMessage,
}

impl Envelope {
    pub fn new(payload: ServerMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_fields_are_omitted() {
        let message = PrintTextMessage::new("hello").for_seconds(2.0);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json, serde_json::json!({ "text": "hello", "time": 2.0 }));
    }

    #[test]
    fn test_partial_message_deserializes_with_defaults() {
        let message: PrintTextMessage = serde_json::from_str(r#"{"text":"hi","with_box":true}"#).unwrap();
        assert_eq!(message.with_box, Some(true));
        assert_eq!(message.queue, None);
    }

    #[test]
    fn test_envelope_carries_version_and_tag() {
        let envelope = Envelope::new(ServerMessage::SetBlockStartingNewGame { block: true });
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["version"], PROTOCOL_VERSION);
        assert_eq!(json["payload"]["type"], "SetBlockStartingNewGame");
        assert_eq!(json["payload"]["data"]["block"], true);
    }

    #[test]
    fn test_client_message_from_wire() {
        let raw = r#"{"type":"UberStateUpdate","data":{"uber_id":{"group":6,"state":1115},"value":1.0}}"#;
        let message: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            message,
            ClientMessage::UberStateUpdate(UberStateUpdateMessage::new(UberId::new(6, 1115), 1.0))
        );
    }
}
