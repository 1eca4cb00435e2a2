//! # Connection Delivery
//!
//! Game handlers never talk to sockets. They hand outbound messages to a
//! [`ConnectionDelivery`] implementation, addressed either to a set of
//! players or to everyone observing a session. Transport framing lives
//! entirely behind this trait.

use crate::messages::{Envelope, ServerMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use multiverse_event_system::{MultiverseId, PlayerId};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Outbound delivery to connected clients.
///
/// Sends are best effort: a recipient without a live connection is skipped.
/// `unreliable` marks loss-tolerant high-frequency data such as positions.
#[async_trait]
pub trait ConnectionDelivery: Send + Sync + 'static {
    async fn to_players(&self, players: &[PlayerId], message: &ServerMessage, unreliable: bool);

    async fn to_observers(&self, multiverse: MultiverseId, message: &ServerMessage, unreliable: bool);

    fn is_connected(&self, player: PlayerId) -> bool;
}

/// One message as it left the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub envelope: Envelope,
    pub unreliable: bool,
}

/// Channel-backed [`ConnectionDelivery`].
///
/// Each connected player (and each observer) owns an unbounded outbox. A
/// transport layer drains the outboxes; tests read them directly.
#[derive(Debug, Default)]
pub struct InMemoryConnections {
    players: DashMap<PlayerId, mpsc::UnboundedSender<Outbound>>,
    observers: DashMap<MultiverseId, Vec<mpsc::UnboundedSender<Outbound>>>,
}

impl InMemoryConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the game connection of `player`, replacing any previous one.
    pub fn connect(&self, player: PlayerId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.players.insert(player, tx);
        debug!("🔗 Player {} connected", player);
        rx
    }

    pub fn disconnect(&self, player: PlayerId) {
        if self.players.remove(&player).is_some() {
            debug!("🔌 Player {} disconnected", player);
        }
    }

    /// Starts observing a session without playing in it.
    pub fn observe(&self, multiverse: MultiverseId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.entry(multiverse).or_default().push(tx);
        rx
    }

    pub fn connected_players(&self) -> usize {
        self.players.len()
    }
}

#[async_trait]
impl ConnectionDelivery for InMemoryConnections {
    async fn to_players(&self, players: &[PlayerId], message: &ServerMessage, unreliable: bool) {
        let mut closed = Vec::new();
        for player in players {
            let Some(outbox) = self.players.get(player) else {
                trace!("Skipping message for offline player {}", player);
                continue;
            };
            let outbound = Outbound {
                envelope: Envelope::new(message.clone()),
                unreliable,
            };
            if outbox.send(outbound).is_err() {
                closed.push(*player);
            }
        }

        for player in closed {
            self.disconnect(player);
        }
    }

    async fn to_observers(&self, multiverse: MultiverseId, message: &ServerMessage, unreliable: bool) {
        if let Some(mut outboxes) = self.observers.get_mut(&multiverse) {
            outboxes.retain(|outbox| {
                outbox
                    .send(Outbound {
                        envelope: Envelope::new(message.clone()),
                        unreliable,
                    })
                    .is_ok()
            });
        }
    }

    fn is_connected(&self, player: PlayerId) -> bool {
        self.players
            .get(&player)
            .map(|outbox| !outbox.is_closed())
            .unwrap_or(false)
    }
}

/// Drains every message currently queued in an outbox.
pub fn drain(outbox: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(outbound) = outbox.try_recv() {
        messages.push(outbound.envelope.payload);
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_connected_players_receive() {
        let connections = InMemoryConnections::new();
        let online = PlayerId::new();
        let offline = PlayerId::new();
        let mut outbox = connections.connect(online);

        let message = ServerMessage::SetBlockStartingNewGame { block: false };
        connections.to_players(&[online, offline], &message, false).await;

        assert_eq!(drain(&mut outbox), vec![message]);
        assert!(connections.is_connected(online));
        assert!(!connections.is_connected(offline));
    }

    #[tokio::test]
    async fn test_dropped_outbox_counts_as_disconnected() {
        let connections = InMemoryConnections::new();
        let player = PlayerId::new();
        drop(connections.connect(player));

        assert!(!connections.is_connected(player));
        connections
            .to_players(&[player], &ServerMessage::PlayerCaught { player_id: player }, true)
            .await;
        assert_eq!(connections.connected_players(), 0);
    }

    #[tokio::test]
    async fn test_observers_receive_session_broadcasts() {
        let connections = InMemoryConnections::new();
        let mut observer = connections.observe(MultiverseId(3));
        let mut other = connections.observe(MultiverseId(4));

        let message = ServerMessage::SetBlockStartingNewGame { block: true };
        connections.to_observers(MultiverseId(3), &message, false).await;

        assert_eq!(drain(&mut observer), vec![message]);
        assert!(drain(&mut other).is_empty());
    }
}
