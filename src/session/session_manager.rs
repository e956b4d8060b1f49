//! Session Manager: the single loop that owns the registry
//!
//! Control commands, connection lifecycle events and timer expirations are all
//! handled here one at a time, so the registry never needs a lock.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::game::{ConnectionEvent, Connector};

use super::broadcaster::EventBroadcaster;
use super::control_surface::{ControlCommand, ControlStats, ControlSurface};
use super::registry::SessionRegistry;

/// Manager loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub commands_processed: u64,
    pub connection_events_processed: u64,
    pub timers_fired: u64,
}

pub struct SessionManager {
    state: ManagerState,
    stats: SessionStats,
    registry: SessionRegistry,
    control: ControlSurface,
    broadcaster: EventBroadcaster,
    command_tx: mpsc::UnboundedSender<ControlCommand>,
    command_rx: mpsc::UnboundedReceiver<ControlCommand>,
    connection_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SessionManager {
    pub fn new(config: &Config, connector: Arc<dyn Connector>) -> Self {
        info!("Creating new SessionManager");

        let broadcaster = EventBroadcaster::new(config.observer.event_buffer);
        let (registry, connection_rx) =
            SessionRegistry::new(config.server.clone(), connector, broadcaster.clone());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            state: ManagerState::Starting,
            stats: SessionStats::default(),
            registry,
            control: ControlSurface::new(),
            broadcaster,
            command_tx,
            command_rx,
            connection_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Sender observers use to submit commands
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ControlCommand> {
        self.command_tx.clone()
    }

    /// Handle for requesting shutdown from another task
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn broadcaster(&self) -> EventBroadcaster {
        self.broadcaster.clone()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn control_stats(&self) -> &ControlStats {
        self.control.stats()
    }

    /// Run until shutdown is requested
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting session loop");
        self.state = ManagerState::Running;

        while self.state == ManagerState::Running {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    self.shutdown();
                }

                Some(command) = self.command_rx.recv() => {
                    self.stats.commands_processed += 1;
                    let outcome = self.control.dispatch(&mut self.registry, command);
                    debug!("Command outcome: {:?}", outcome);
                }

                Some(event) = self.connection_rx.recv() => {
                    self.stats.connection_events_processed += 1;
                    self.registry.handle_connection_event(event);
                }

                fired = self.registry.next_timer() => {
                    self.stats.timers_fired += 1;
                    self.registry.handle_timer(fired);
                }
            }
        }

        info!("Session loop terminated");
        Ok(())
    }

    /// Close every session and cancel every timer
    pub fn shutdown(&mut self) {
        if self.state == ManagerState::Terminated {
            return;
        }
        info!("Initiating graceful shutdown");
        self.state = ManagerState::ShuttingDown;

        let closed = self.registry.shutdown();

        self.state = ManagerState::Terminated;
        info!(
            "Shutdown completed: {} sessions closed, {} commands, {} connection events, {} timers fired",
            closed,
            self.stats.commands_processed,
            self.stats.connection_events_processed,
            self.stats.timers_fired
        );
    }

    /// Request shutdown
    pub fn request_shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .try_send(())
            .map_err(|e| anyhow::anyhow!("Failed to send shutdown signal: {}", e))
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.state == ManagerState::Running {
            warn!("SessionManager dropped without proper shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameEvent, MockConnector};
    use crate::session::broadcaster::ObserverEvent;
    use crate::session::control_surface::AltCredentials;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_loop_applies_commands_and_events() {
        let connector = Arc::new(MockConnector::new());
        let mut manager = SessionManager::new(&Config::default(), connector.clone());
        let commands = manager.command_sender();
        let shutdown = manager.shutdown_handle();
        let mut observer = manager.broadcaster().subscribe();

        let loop_task = tokio::spawn(async move {
            manager.run().await.unwrap();
            manager
        });

        commands
            .send(ControlCommand::AddAlt(AltCredentials {
                username: "alice".to_string(),
                password: "pw".to_string(),
            }))
            .unwrap();

        // Wait until the loop created the connection, then spawn it
        let conn = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(conn) = connector.latest("alice") {
                    break conn;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        conn.emit(GameEvent::Spawn);

        let event = timeout(Duration::from_secs(5), observer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ObserverEvent::BotSpawned {
                username: "alice".to_string()
            }
        );

        shutdown.send(()).await.unwrap();
        let manager = loop_task.await.unwrap();
        assert_eq!(manager.state(), ManagerState::Terminated);
        assert!(manager.registry().is_empty());
        assert!(conn.is_closed());
        assert_eq!(manager.stats().commands_processed, 1);
    }
}
