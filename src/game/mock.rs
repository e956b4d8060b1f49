//! Mock and simulated game connections
//!
//! Used by the test suite to drive lifecycle events by hand, and by the
//! binary when no protocol client is plugged in: the simulated mode spawns
//! after a short delay, slowly gets hungry, and ends when asked to quit.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::connection::{ConnectionEventSink, Connector, GameConnection};
use super::types::{
    ConnectOptions, ConnectionError, ControlState, EquipSlot, GameEvent, InventoryItem, MAX_FOOD,
    SessionId,
};

/// Action recorded by a mock connection
#[derive(Debug, Clone, PartialEq)]
pub enum MockAction {
    Chat(String),
    Control(ControlState, bool),
    Equip(String, EquipSlot),
    Consume,
    Quit,
}

#[derive(Debug)]
struct MockState {
    food: u32,
    inventory: Vec<InventoryItem>,
    held: Option<String>,
    controls: HashSet<ControlState>,
    actions: Vec<MockAction>,
    closed: bool,
    fail_equip: bool,
    fail_consume: bool,
}

/// Mock connection that records actions and forwards injected events
pub struct MockConnection {
    options: ConnectOptions,
    sink: ConnectionEventSink,
    state: Mutex<MockState>,
    quit_signal: Notify,
}

impl MockConnection {
    fn new(options: ConnectOptions, sink: ConnectionEventSink) -> Self {
        Self {
            options,
            sink,
            state: Mutex::new(MockState {
                food: MAX_FOOD,
                inventory: Vec::new(),
                held: None,
                controls: HashSet::new(),
                actions: Vec::new(),
                closed: false,
                fail_equip: false,
                fail_consume: false,
            }),
            quit_signal: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session_id(&self) -> SessionId {
        self.sink.session_id()
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Inject a lifecycle event as if the server produced it
    pub fn emit(&self, event: GameEvent) {
        self.sink.emit(event);
    }

    pub fn set_food(&self, food: u32) {
        self.state().food = food;
    }

    pub fn give_item(&self, item: InventoryItem) {
        self.state().inventory.push(item);
    }

    pub fn fail_equip(&self, fail: bool) {
        self.state().fail_equip = fail;
    }

    pub fn fail_consume(&self, fail: bool) {
        self.state().fail_consume = fail;
    }

    pub fn actions(&self) -> Vec<MockAction> {
        self.state().actions.clone()
    }

    /// Chat lines sent so far, in order
    pub fn chat_log(&self) -> Vec<String> {
        self.state()
            .actions
            .iter()
            .filter_map(|action| match action {
                MockAction::Chat(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_held(&self, control: ControlState) -> bool {
        self.state().controls.contains(&control)
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

#[async_trait]
impl GameConnection for MockConnection {
    fn username(&self) -> &str {
        &self.options.username
    }

    fn food(&self) -> u32 {
        self.state().food
    }

    fn inventory(&self) -> Vec<InventoryItem> {
        self.state().inventory.clone()
    }

    fn chat(&self, message: &str) -> Result<(), ConnectionError> {
        let mut state = self.state();
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        debug!("[{}] chat: {}", self.options.username, message);
        state.actions.push(MockAction::Chat(message.to_string()));
        Ok(())
    }

    fn set_control_state(
        &self,
        control: ControlState,
        enabled: bool,
    ) -> Result<(), ConnectionError> {
        let mut state = self.state();
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        if enabled {
            state.controls.insert(control);
        } else {
            state.controls.remove(&control);
        }
        state.actions.push(MockAction::Control(control, enabled));
        Ok(())
    }

    async fn equip(&self, item: &InventoryItem, slot: EquipSlot) -> Result<(), ConnectionError> {
        let mut state = self.state();
        state.actions.push(MockAction::Equip(item.name.clone(), slot));
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        if state.fail_equip {
            return Err(ConnectionError::ActionFailed(format!(
                "cannot equip {}",
                item.name
            )));
        }
        if !state.inventory.iter().any(|held| held.name == item.name) {
            return Err(ConnectionError::ItemNotFound(item.name.clone()));
        }
        state.held = Some(item.name.clone());
        Ok(())
    }

    async fn consume(&self) -> Result<(), ConnectionError> {
        let mut state = self.state();
        state.actions.push(MockAction::Consume);
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        if state.fail_consume {
            return Err(ConnectionError::ActionFailed("consuming cancelled".to_string()));
        }
        let Some(held) = state.held.clone() else {
            return Err(ConnectionError::ActionFailed("nothing in hand".to_string()));
        };
        if let Some(index) = state.inventory.iter().position(|item| item.name == held) {
            let item = &mut state.inventory[index];
            item.count = item.count.saturating_sub(1);
            if item.count == 0 {
                state.inventory.remove(index);
                state.held = None;
            }
        }
        state.food = MAX_FOOD;
        Ok(())
    }

    fn quit(&self) {
        {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.actions.push(MockAction::Quit);
        }
        self.quit_signal.notify_one();
        self.sink.emit(GameEvent::End {
            reason: "disconnect.quitting".to_string(),
        });
    }
}

/// Timing for the simulated mode
#[derive(Debug, Clone, Copy)]
pub struct Simulation {
    pub spawn_delay: Duration,
    pub health_interval: Duration,
}

/// Connector producing mock connections
#[derive(Default)]
pub struct MockConnector {
    simulation: Option<Simulation>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    /// Connections stay silent until a test injects events
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections spawn on their own and tick health until they quit
    pub fn simulated(simulation: Simulation) -> Self {
        Self {
            simulation: Some(simulation),
            connections: Mutex::new(Vec::new()),
        }
    }

    fn connections_guard(&self) -> MutexGuard<'_, Vec<Arc<MockConnection>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every connection opened so far, oldest first
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections_guard().clone()
    }

    /// Most recent connection opened for `username`
    pub fn latest(&self, username: &str) -> Option<Arc<MockConnection>> {
        self.connections_guard()
            .iter()
            .rev()
            .find(|conn| conn.options.username == username)
            .cloned()
    }

    pub fn connect_count(&self, username: &str) -> usize {
        self.connections_guard()
            .iter()
            .filter(|conn| conn.options.username == username)
            .count()
    }

    fn spawn_simulation(connection: Arc<MockConnection>, simulation: Simulation) {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(simulation.spawn_delay) => {}
                _ = connection.quit_signal.notified() => return,
            }
            info!("[{}] simulated spawn", connection.options.username);
            {
                let mut state = connection.state();
                if state.inventory.is_empty() {
                    state.inventory.push(InventoryItem::new("bread", 16, 36));
                }
            }
            connection.emit(GameEvent::Spawn);

            let mut ticker = tokio::time::interval(simulation.health_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let food = {
                            let mut state = connection.state();
                            state.food = state.food.saturating_sub(1);
                            state.food
                        };
                        connection.emit(GameEvent::Health { health: 20.0, food });
                    }
                    _ = connection.quit_signal.notified() => break,
                }
            }
        });
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        options: ConnectOptions,
        events: ConnectionEventSink,
    ) -> Arc<dyn GameConnection> {
        debug!(
            "Mock connect {}@{}:{} (version {})",
            options.username, options.host, options.port, options.version
        );
        let connection = Arc::new(MockConnection::new(options, events));
        self.connections_guard().push(connection.clone());

        if let Some(simulation) = self.simulation {
            Self::spawn_simulation(connection.clone(), simulation);
        }

        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::AuthMode;
    use tokio::sync::mpsc;

    fn options(username: &str) -> ConnectOptions {
        ConnectOptions {
            host: "localhost".to_string(),
            port: 25565,
            username: username.to_string(),
            password: "pw".to_string(),
            auth: AuthMode::Offline,
            version: "1.18.2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_quit_emits_end_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = MockConnector::new();
        let conn = connector.connect(options("alice"), ConnectionEventSink::new(SessionId(1), "alice", tx));

        conn.quit();
        conn.quit();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.event, GameEvent::End { .. }));
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.chat("hi"), Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_equip_and_consume_restore_food() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MockConnector::new();
        connector.connect(options("bob"), ConnectionEventSink::new(SessionId(2), "bob", tx));
        let conn = connector.latest("bob").unwrap();
        conn.set_food(5);
        conn.give_item(InventoryItem::new("bread", 1, 36));

        let bread = conn.inventory()[0].clone();
        conn.equip(&bread, EquipSlot::Hand).await.unwrap();
        conn.consume().await.unwrap();

        assert_eq!(conn.food(), MAX_FOOD);
        assert!(conn.inventory().is_empty());
        assert_eq!(
            conn.actions(),
            vec![
                MockAction::Equip("bread".to_string(), EquipSlot::Hand),
                MockAction::Consume
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_connection_spawns() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = MockConnector::simulated(Simulation {
            spawn_delay: Duration::from_millis(500),
            health_interval: Duration::from_secs(10),
        });
        connector.connect(options("carol"), ConnectionEventSink::new(SessionId(3), "carol", tx));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, GameEvent::Spawn);

        let second = rx.recv().await.unwrap();
        assert_eq!(
            second.event,
            GameEvent::Health {
                health: 20.0,
                food: MAX_FOOD - 1
            }
        );
        assert_eq!(connector.connect_count("carol"), 1);
    }
}
