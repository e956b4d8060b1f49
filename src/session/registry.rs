//! Session registry: the single owner of every live alt session
//!
//! All mutation happens on the session loop. Connections report lifecycle
//! events through one typed channel; each event carries the `SessionId` of the
//! connection instance that produced it, and events from an instance that is no
//! longer registered are dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::GameServerConfig;
use crate::game::{
    ConnectOptions, ConnectionError, ConnectionEvent, ConnectionEventSink, Connector, ControlState,
    EquipSlot, GameConnection, GameEvent, InventoryItem, MAX_FOOD, SessionId,
};

use super::broadcaster::{EventBroadcaster, ObserverEvent};
use super::handle::{SessionHandle, SessionState};
use super::macro_scheduler::{MacroError, MacroFire, MacroInfo, MacroScheduler};
use super::reconnect_supervisor::{
    AUTO_RECONNECT_DELAY, ReconnectDue, ReconnectSupervisor, SETTLE_DELAY,
};

/// Substrings of edible item names, most preferred first
pub const FOOD_PRIORITY: [&str; 3] = ["_apple", "bread", "cooked_"];

/// Actions that can be toggled on a live alt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToggleAction {
    Jump,
    Sneak,
    AutoFeed,
    AutoReconnect,
}

/// A timer owned by the registry that elapsed
pub enum TimerFired {
    Macro(MacroFire),
    Reconnect(ReconnectDue),
}

/// Chat command sent right after spawning to authenticate on the server
pub fn login_command(credential: &str) -> String {
    format!("/login {}", credential)
}

/// Pick the most preferred edible item from an inventory snapshot
pub fn select_food(items: &[InventoryItem]) -> Option<InventoryItem> {
    FOOD_PRIORITY.iter().find_map(|pattern| {
        items
            .iter()
            .find(|item| item.name.contains(pattern))
            .cloned()
    })
}

async fn feed(connection: &dyn GameConnection, item: &InventoryItem) -> Result<(), ConnectionError> {
    connection.equip(item, EquipSlot::Hand).await?;
    connection.consume().await
}

pub struct SessionRegistry {
    sessions: HashMap<String, SessionHandle>,
    macros: MacroScheduler,
    reconnects: ReconnectSupervisor,
    connector: Arc<dyn Connector>,
    broadcaster: EventBroadcaster,
    server: GameServerConfig,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    next_session_id: u64,
}

impl SessionRegistry {
    /// Create a registry and the receiver its connections report into
    pub fn new(
        server: GameServerConfig,
        connector: Arc<dyn Connector>,
        broadcaster: EventBroadcaster,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let registry = Self {
            sessions: HashMap::new(),
            macros: MacroScheduler::new(),
            reconnects: ReconnectSupervisor::new(),
            connector,
            broadcaster,
            server,
            event_tx,
            next_session_id: 1,
        };

        (registry, event_rx)
    }

    /// Start a session for `username`; no-op returning false if one is live
    pub fn create(&mut self, username: &str, credential: &str) -> bool {
        if self.sessions.contains_key(username) {
            info!("Bot with username {} already exists", username);
            self.broadcaster.publish(ObserverEvent::AltExists {
                username: username.to_string(),
            });
            return false;
        }

        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;

        let options = ConnectOptions {
            host: self.server.host.clone(),
            port: self.server.port,
            username: username.to_string(),
            password: credential.to_string(),
            auth: self.server.auth,
            version: self.server.version.clone(),
        };
        let sink = ConnectionEventSink::new(id, username, self.event_tx.clone());
        let connection = self.connector.connect(options, sink);

        self.sessions.insert(
            username.to_string(),
            SessionHandle::new(id, username, credential, connection),
        );
        info!(
            "Creating bot {} {} -> {}:{}",
            username, id, self.server.host, self.server.port
        );
        true
    }

    /// Tear down the session, its reconnect timer and all of its macros
    pub fn remove(&mut self, username: &str) -> bool {
        let cancelled = self.reconnects.cancel(username);
        let cleared = self.macros.clear(username);
        let session = self.detach(username);

        let torn_down = session.is_some() || cancelled || cleared > 0;
        if torn_down {
            info!("Removed alt {}", username);
            self.broadcaster.publish(ObserverEvent::RemoveAlt {
                username: username.to_string(),
            });
        } else {
            debug!("Remove ignored, {} is not registered", username);
        }
        torn_down
    }

    /// Tear down the session and its reconnect timer; macro definitions stay
    pub fn stop(&mut self, username: &str) -> bool {
        let cancelled = self.reconnects.cancel(username);
        let session = self.detach(username);

        let torn_down = session.is_some() || cancelled;
        if torn_down {
            info!("Stopped alt {}", username);
            self.broadcaster.publish(ObserverEvent::BotStopped {
                username: username.to_string(),
            });
        } else {
            debug!("Stop ignored, {} is not registered", username);
        }
        torn_down
    }

    /// Tear down any live session and recreate it after the settle delay
    pub fn reconnect(&mut self, username: &str, credential: &str) {
        self.reconnects.cancel(username);
        if self.detach(username).is_some() {
            info!("Disconnected {} for reconnect", username);
        }
        self.reconnects.arm(username, credential, SETTLE_DELAY);
    }

    /// Flip a behaviour flag or held input; false if `username` is absent
    pub fn toggle_action(&mut self, username: &str, action: ToggleAction, enabled: bool) -> bool {
        let Some(session) = self.sessions.get_mut(username) else {
            debug!("Toggle {:?} ignored, {} is not registered", action, username);
            return false;
        };

        let control = match action {
            ToggleAction::Jump => Some(ControlState::Jump),
            ToggleAction::Sneak => Some(ControlState::Sneak),
            ToggleAction::AutoFeed => {
                session.flags_mut().auto_feed = enabled;
                None
            }
            ToggleAction::AutoReconnect => {
                session.flags_mut().auto_reconnect = enabled;
                None
            }
        };

        if let Some(control) = control {
            if let Err(e) = session.connection().set_control_state(control, enabled) {
                warn!("Failed to set {:?} for {}: {}", control, username, e);
                self.broadcaster.publish(ObserverEvent::BotError {
                    username: username.to_string(),
                    error: e.to_string(),
                });
                return false;
            }
        }

        info!("Toggled {:?} for {}: {}", action, username, enabled);
        true
    }

    /// Send a chat line from an active alt and echo it to observers
    pub fn send_chat(&mut self, username: &str, message: &str) -> bool {
        let Some(session) = self.sessions.get(username).filter(|s| s.is_active()) else {
            debug!("Chat ignored, {} is not active", username);
            return false;
        };

        if let Err(e) = session.connection().chat(message) {
            warn!("Failed to send chat for {}: {}", username, e);
            self.broadcaster.publish(ObserverEvent::BotError {
                username: username.to_string(),
                error: e.to_string(),
            });
            return false;
        }

        self.broadcaster.publish(ObserverEvent::ChatMessage {
            username: username.to_string(),
            message: format!("{}: {}", username, message),
        });
        true
    }

    /// Register a periodic chat macro; `Ok(None)` if `username` is absent
    pub fn add_macro(
        &mut self,
        username: &str,
        command: &str,
        cooldown_minutes: f64,
    ) -> Result<Option<MacroInfo>, MacroError> {
        let Some(session) = self.sessions.get(username) else {
            debug!("Macro ignored, {} is not registered", username);
            return Ok(None);
        };

        let info = self.macros.add(
            username,
            session.connection().clone(),
            command,
            cooldown_minutes,
        )?;
        self.broadcaster.publish(ObserverEvent::MacroAdded {
            username: username.to_string(),
            command: info.command.clone(),
            cooldown: info.cooldown_minutes,
        });
        Ok(Some(info))
    }

    /// Cancel and forget all macros of `username`
    pub fn clear_macros(&mut self, username: &str) -> usize {
        let removed = self.macros.clear(username);
        if removed > 0 {
            self.broadcaster.publish(ObserverEvent::RemoveMacros {
                username: username.to_string(),
            });
        }
        removed
    }

    /// React to a lifecycle event reported by a connection
    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let ConnectionEvent {
            session_id,
            username,
            event,
        } = event;

        match self.sessions.get(&username) {
            Some(session) if session.id() == session_id => {}
            Some(_) => {
                debug!(
                    "Dropping {} event from replaced connection {} of {}",
                    event.kind(),
                    session_id,
                    username
                );
                return;
            }
            None => {
                debug!(
                    "Dropping {} event for unregistered {} {}",
                    event.kind(),
                    username,
                    session_id
                );
                return;
            }
        }

        match event {
            GameEvent::Spawn => self.on_spawn(&username),
            GameEvent::Health { food, .. } => self.on_health(&username, food),
            GameEvent::Kicked { reason } => {
                info!("Bot {} kicked: {}", username, reason);
                self.broadcaster
                    .publish(ObserverEvent::BotKicked { username, reason });
            }
            GameEvent::Error { message } => {
                warn!("Bot {} error: {}", username, message);
                self.broadcaster.publish(ObserverEvent::BotError {
                    username,
                    error: message,
                });
            }
            GameEvent::End { reason } => self.on_end(&username, &reason),
        }
    }

    fn on_spawn(&mut self, username: &str) {
        let Some(session) = self.sessions.get_mut(username) else {
            return;
        };

        let respawn = session.is_active();
        if !respawn {
            if let Err(e) = session.activate() {
                warn!("Ignoring spawn: {}", e);
                return;
            }
        }
        let connection = session.connection().clone();
        let credential = session.credential().to_string();

        self.reconnects.cancel(username);
        info!("Bot {} spawned", username);
        self.broadcaster.publish(ObserverEvent::BotSpawned {
            username: username.to_string(),
        });

        if respawn {
            debug!("Bot {} respawned, sending login again", username);
        }

        if let Err(e) = connection.chat(&login_command(&credential)) {
            warn!("Failed to send login for {}: {}", username, e);
            self.broadcaster.publish(ObserverEvent::BotError {
                username: username.to_string(),
                error: e.to_string(),
            });
        }
        self.macros.resume(username, connection);
    }

    fn on_end(&mut self, username: &str, reason: &str) {
        self.macros.suspend(username);
        let Some(mut session) = self.sessions.remove(username) else {
            return;
        };
        session.cancel_tasks();
        if let Err(e) = session.end() {
            warn!("{}", e);
        }

        info!("Bot {} disconnected: {}", username, reason);
        self.broadcaster.publish(ObserverEvent::BotDisconnected {
            username: username.to_string(),
        });

        if session.flags().auto_reconnect && !self.reconnects.is_pending(username) {
            self.reconnects
                .arm(username, session.credential(), AUTO_RECONNECT_DELAY);
        }
    }

    fn on_health(&mut self, username: &str, food: u32) {
        let Some(session) = self.sessions.get(username) else {
            return;
        };
        if !session.flags().auto_feed || food >= MAX_FOOD {
            return;
        }

        let connection = session.connection().clone();
        let Some(item) = select_food(&connection.inventory()) else {
            debug!("Bot {} is hungry ({}) but has no food", username, food);
            return;
        };
        let Some(guard) = session.try_begin_feeding() else {
            debug!("Bot {} is already eating", username);
            return;
        };

        debug!("Bot {} eating {} at food {}", username, item.name, food);
        let cancelled = session.task_token();
        let broadcaster = self.broadcaster.clone();
        let username = username.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            let result = tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    debug!("Feeding of {} cancelled by teardown", username);
                    return;
                }
                result = feed(connection.as_ref(), &item) => result,
            };
            if let Err(e) = result {
                if cancelled.is_cancelled() {
                    return;
                }
                warn!("Error while feeding {}: {}", username, e);
                broadcaster.publish(ObserverEvent::BotError {
                    username,
                    error: format!("Error while feeding: {}", e),
                });
            }
        });
    }

    /// Wait for the next macro or reconnect timer to elapse
    pub async fn next_timer(&mut self) -> TimerFired {
        poll_fn(|cx| {
            if let Poll::Ready(fire) = self.macros.poll_fire(cx) {
                return Poll::Ready(TimerFired::Macro(fire));
            }
            if let Poll::Ready(due) = self.reconnects.poll_due(cx) {
                return Poll::Ready(TimerFired::Reconnect(due));
            }
            Poll::Pending
        })
        .await
    }

    /// Run the action of an elapsed timer
    pub fn handle_timer(&mut self, fired: TimerFired) {
        match fired {
            TimerFired::Macro(fire) => {
                debug!("Macro fired for {}: {}", fire.username, fire.command);
                if let Err(e) = fire.connection.chat(&fire.command) {
                    warn!("Macro for {} failed: {}", fire.username, e);
                    self.broadcaster.publish(ObserverEvent::BotError {
                        username: fire.username,
                        error: e.to_string(),
                    });
                }
            }
            TimerFired::Reconnect(due) => {
                info!("Reconnect timer fired for {}", due.username);
                self.create(&due.username, &due.credential);
            }
        }
    }

    /// Tear down every session and timer, returning how many sessions were live
    pub fn shutdown(&mut self) -> usize {
        self.reconnects.cancel_all();
        let usernames: Vec<String> = self.sessions.keys().cloned().collect();
        for username in &usernames {
            self.macros.clear(username);
            self.detach(username);
        }
        info!("Registry shut down, {} sessions closed", usernames.len());
        usernames.len()
    }

    /// Suspend macros, unregister the session and close its connection
    fn detach(&mut self, username: &str) -> Option<SessionHandle> {
        self.macros.suspend(username);
        let session = self.sessions.remove(username)?;
        session.cancel_tasks();
        session.connection().quit();
        Some(session)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    pub fn session(&self, username: &str) -> Option<&SessionHandle> {
        self.sessions.get(username)
    }

    pub fn state(&self, username: &str) -> Option<SessionState> {
        self.sessions.get(username).map(|s| s.state())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered usernames, sorted
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn macros(&self) -> &MacroScheduler {
        &self.macros
    }

    pub fn reconnects(&self) -> &ReconnectSupervisor {
        &self.reconnects
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::MockConnector;

    fn registry() -> (
        SessionRegistry,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        Arc<MockConnector>,
    ) {
        let connector = Arc::new(MockConnector::new());
        let (registry, rx) = SessionRegistry::new(
            GameServerConfig::default(),
            connector.clone(),
            EventBroadcaster::new(64),
        );
        (registry, rx, connector)
    }

    #[test]
    fn test_select_food_priority() {
        let items = vec![
            InventoryItem::new("cooked_beef", 3, 36),
            InventoryItem::new("bread", 5, 37),
            InventoryItem::new("dirt", 64, 38),
        ];
        assert_eq!(select_food(&items).unwrap().name, "bread");

        let items = vec![
            InventoryItem::new("cooked_porkchop", 1, 36),
            InventoryItem::new("golden_apple", 1, 37),
        ];
        assert_eq!(select_food(&items).unwrap().name, "golden_apple");

        assert!(select_food(&[InventoryItem::new("stone", 1, 36)]).is_none());
    }

    #[test]
    fn test_login_command() {
        assert_eq!(login_command("hunter2"), "/login hunter2");
    }

    #[tokio::test]
    async fn test_connect_options_come_from_server_config() {
        let (mut registry, _rx, connector) = registry();
        registry.create("alice", "pw");

        let conn = connector.latest("alice").unwrap();
        let server = GameServerConfig::default();
        assert_eq!(conn.options().host, server.host);
        assert_eq!(conn.options().port, server.port);
        assert_eq!(conn.options().version, server.version);
        assert_eq!(conn.options().password, "pw");
    }

    #[tokio::test]
    async fn test_stale_events_are_dropped() {
        let (mut registry, mut rx, connector) = registry();
        registry.create("alice", "pw");
        let old = connector.latest("alice").unwrap();

        // Replace the session; the old connection's End must not touch the new one
        registry.stop("alice");
        registry.create("alice", "pw");
        while let Ok(event) = rx.try_recv() {
            registry.handle_connection_event(event);
        }
        old.emit(GameEvent::Spawn);
        registry.handle_connection_event(rx.try_recv().unwrap());

        assert_eq!(registry.state("alice"), Some(SessionState::Connecting));
        assert_eq!(connector.connect_count("alice"), 2);
    }

    #[tokio::test]
    async fn test_toggle_flags() {
        let (mut registry, _rx, connector) = registry();
        registry.create("bob", "pw");

        assert!(registry.toggle_action("bob", ToggleAction::AutoFeed, true));
        assert!(registry.toggle_action("bob", ToggleAction::Jump, true));
        assert!(!registry.toggle_action("nobody", ToggleAction::Jump, true));

        let flags = registry.session("bob").unwrap().flags();
        assert!(flags.auto_feed);
        assert!(!flags.auto_reconnect);
        assert!(
            connector
                .latest("bob")
                .unwrap()
                .is_held(ControlState::Jump)
        );
    }
}
