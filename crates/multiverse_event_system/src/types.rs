//! # Core Type Definitions
//!
//! Identifiers shared by every layer of the multiverse backend.
//!
//! ## Key Types
//!
//! - [`PlayerId`] - Opaque, session-scoped player identity
//! - [`MultiverseId`], [`UniverseId`], [`WorldId`] - Storage record identifiers
//! - [`UberId`] - The integer pair addressing one progress flag or counter
//! - [`Vector2`] - 2D in-game position used by the real-time game modes
//!
//! ## Design Principles
//!
//! - **Type Safety**: Wrapper types prevent ID confusion (WorldId vs UniverseId)
//! - **Serialization**: All types support JSON serialization for state blobs and client payloads

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a player.
///
/// This is a wrapper around UUID that provides type safety and ensures
/// player IDs cannot be confused with other types of IDs in the system.
/// The core never persists it on its own; it is the key of connection and
/// role-tracking maps.
///
/// # Examples
///
/// ```rust
/// use multiverse_event_system::PlayerId;
///
/// let player_id = PlayerId::new();
/// let parsed: PlayerId = player_id.to_string().parse()?;
/// assert_eq!(player_id, parsed);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::str::FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Identifier of one active game session.
    MultiverseId
);
record_id!(
    /// Identifier of a state-sharing group of worlds (a team).
    UniverseId
);
record_id!(
    /// Identifier of one progress replica.
    WorldId
);

/// Address of a single progress flag or counter: `(group, state)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UberId {
    pub group: i32,
    pub state: i32,
}

impl UberId {
    pub const fn new(group: i32, state: i32) -> Self {
        Self { group, state }
    }
}

impl std::fmt::Display for UberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.group, self.state)
    }
}

/// 2D position in game coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance; compare against a squared radius to avoid the root.
    pub fn distance_squared_to(&self, other: &Vector2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

impl std::ops::Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_squared() {
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(3.0, 4.0);
        assert_eq!(a.distance_squared_to(&b), 25.0);
        assert_eq!(b.distance_squared_to(&a), 25.0);
    }

    #[test]
    fn test_player_id_round_trip_through_string() {
        let id = PlayerId::new();
        let parsed: PlayerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_record_ids_serialize_transparently() {
        let json = serde_json::to_string(&WorldId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(UberId::new(6, 1115).to_string(), "6|1115");
    }
}
