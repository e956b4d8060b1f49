//! Connection seam between the session layer and a game protocol client

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::types::{
    ConnectOptions, ConnectionError, ControlState, EquipSlot, GameEvent, InventoryItem, SessionId,
};

/// A lifecycle event tagged with the connection instance that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub session_id: SessionId,
    pub username: String,
    pub event: GameEvent,
}

/// Sending half handed to a connection so it can report lifecycle events
#[derive(Debug, Clone)]
pub struct ConnectionEventSink {
    session_id: SessionId,
    username: String,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionEventSink {
    pub fn new(
        session_id: SessionId,
        username: impl Into<String>,
        tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            session_id,
            username: username.into(),
            tx,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Report an event; dropped silently once the session loop has exited
    pub fn emit(&self, event: GameEvent) {
        let event = ConnectionEvent {
            session_id: self.session_id,
            username: self.username.clone(),
            event,
        };
        if self.tx.send(event).is_err() {
            debug!(
                "Session loop gone, dropping event for {} {}",
                self.username, self.session_id
            );
        }
    }
}

/// One live connection to the game server
///
/// `chat`, `set_control_state` and `quit` only enqueue work on the client and
/// return immediately. `equip` and `consume` complete when the server has
/// acknowledged the action.
#[async_trait]
pub trait GameConnection: Send + Sync {
    fn username(&self) -> &str;

    /// Current food level, `MAX_FOOD` when full
    fn food(&self) -> u32;

    /// Snapshot of the player's inventory
    fn inventory(&self) -> Vec<InventoryItem>;

    fn chat(&self, message: &str) -> Result<(), ConnectionError>;

    fn set_control_state(&self, control: ControlState, enabled: bool)
    -> Result<(), ConnectionError>;

    async fn equip(&self, item: &InventoryItem, slot: EquipSlot) -> Result<(), ConnectionError>;

    async fn consume(&self) -> Result<(), ConnectionError>;

    /// Close the connection; an `End` event follows
    fn quit(&self);
}

/// Factory for game connections
pub trait Connector: Send + Sync {
    /// Start connecting and return immediately; progress arrives through `events`
    fn connect(&self, options: ConnectOptions, events: ConnectionEventSink)
    -> Arc<dyn GameConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ConnectionEventSink::new(SessionId(7), "alice", tx);

        sink.emit(GameEvent::Spawn);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id, SessionId(7));
        assert_eq!(event.username, "alice");
        assert_eq!(event.event, GameEvent::Spawn);
    }

    #[test]
    fn test_sink_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = ConnectionEventSink::new(SessionId(1), "bob", tx);
        // Must not panic
        sink.emit(GameEvent::End {
            reason: "closed".to_string(),
        });
    }
}
