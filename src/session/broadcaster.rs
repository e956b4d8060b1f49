//! Event broadcaster for fanning session state changes out to observers

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events pushed to every connected observer
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ObserverEvent {
    /// Alt entered the world
    BotSpawned { username: String },
    /// Alt connection closed
    BotDisconnected { username: String },
    /// Alt was kicked by the server
    BotKicked { username: String, reason: String },
    /// Connection or action failure for an alt
    BotError { username: String, error: String },
    /// Chat line sent on behalf of an alt
    ChatMessage { username: String, message: String },
    /// Alt stopped on request
    BotStopped { username: String },
    /// Alt removed on request
    RemoveAlt { username: String },
    /// All macros of an alt cleared
    RemoveMacros { username: String },
    /// Macro registered for an alt
    MacroAdded {
        username: String,
        command: String,
        cooldown: f64,
    },
    /// Create requested for an alt that is already live
    AltExists { username: String },
}

impl ObserverEvent {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ObserverEvent::BotSpawned { .. } => "bot-spawned",
            ObserverEvent::BotDisconnected { .. } => "bot-disconnected",
            ObserverEvent::BotKicked { .. } => "bot-kicked",
            ObserverEvent::BotError { .. } => "bot-error",
            ObserverEvent::ChatMessage { .. } => "chat-message",
            ObserverEvent::BotStopped { .. } => "bot-stopped",
            ObserverEvent::RemoveAlt { .. } => "remove-alt",
            ObserverEvent::RemoveMacros { .. } => "remove-macros",
            ObserverEvent::MacroAdded { .. } => "macro-added",
            ObserverEvent::AltExists { .. } => "alt-exists",
        }
    }

    /// Username the event refers to
    pub fn username(&self) -> &str {
        match self {
            ObserverEvent::BotSpawned { username }
            | ObserverEvent::BotDisconnected { username }
            | ObserverEvent::BotKicked { username, .. }
            | ObserverEvent::BotError { username, .. }
            | ObserverEvent::ChatMessage { username, .. }
            | ObserverEvent::BotStopped { username }
            | ObserverEvent::RemoveAlt { username }
            | ObserverEvent::RemoveMacros { username }
            | ObserverEvent::MacroAdded { username, .. }
            | ObserverEvent::AltExists { username } => username,
        }
    }
}

/// Fan-out sink shared by the registry, background feed tasks and observers
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ObserverEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current observers; having none is not an error
    pub fn publish(&self, event: ObserverEvent) {
        debug!("Broadcasting {} for {}", event.name(), event.username());
        if self.tx.send(event).is_err() {
            debug!("No observers connected, event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn test_wire_format() {
        let event = ObserverEvent::BotKicked {
            username: "alice".to_string(),
            reason: "flying".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "bot-kicked",
                "data": { "username": "alice", "reason": "flying" }
            })
        );
        assert_eq!(event.name(), "bot-kicked");
    }

    #[test]
    fn test_publish_without_observers() {
        let broadcaster = EventBroadcaster::new(8);
        assert_eq!(broadcaster.observer_count(), 0);
        broadcaster.publish(ObserverEvent::BotSpawned {
            username: "alice".to_string(),
        });
    }

    #[test]
    fn test_fan_out_to_all_observers() {
        let broadcaster = EventBroadcaster::new(8);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        broadcaster.publish(ObserverEvent::RemoveAlt {
            username: "bob".to_string(),
        });

        block_on(async {
            assert_eq!(first.recv().await.unwrap().name(), "remove-alt");
            assert_eq!(second.recv().await.unwrap().username(), "bob");
        });
    }
}
