//! Periodic chat macros, one recurring timer per macro entry
//!
//! Timers live in a single `DelayQueue` owned by the scheduler. Cancelling an
//! entry removes its key from the queue, so a cancelled timer can never be
//! yielded afterwards. Definitions and timers are separate: `suspend` drops the
//! timers and the connection binding but keeps the definitions, `clear` drops
//! both.

use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, warn};

use crate::game::GameConnection;

/// Shortest interval a macro may repeat at
pub const MIN_MACRO_INTERVAL: Duration = Duration::from_secs(1);

/// Longest interval a macro may repeat at, well inside the timer wheel's range
pub const MAX_MACRO_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MacroError {
    #[error("Invalid macro cooldown: {0} minutes")]
    InvalidCooldown(f64),

    #[error("Macro command must not be empty")]
    EmptyCommand,
}

/// Convert a cooldown in (possibly fractional) minutes to a timer interval
pub fn cooldown_interval(minutes: f64) -> Result<Duration, MacroError> {
    if !minutes.is_finite() || minutes <= 0.0 {
        return Err(MacroError::InvalidCooldown(minutes));
    }
    let interval = Duration::try_from_secs_f64(minutes * 60.0)
        .map_err(|_| MacroError::InvalidCooldown(minutes))?;
    if interval > MAX_MACRO_INTERVAL {
        return Err(MacroError::InvalidCooldown(minutes));
    }
    Ok(interval.max(MIN_MACRO_INTERVAL))
}

/// Public view of a registered macro
#[derive(Debug, Clone, PartialEq)]
pub struct MacroInfo {
    pub command: String,
    pub cooldown_minutes: f64,
}

#[derive(Debug)]
struct MacroEntry {
    id: u64,
    command: String,
    cooldown_minutes: f64,
    interval: Duration,
    timer: Option<delay_queue::Key>,
}

#[derive(Default)]
struct MacroSet {
    connection: Option<Arc<dyn GameConnection>>,
    entries: Vec<MacroEntry>,
}

#[derive(Debug, Clone)]
struct MacroTick {
    username: String,
    entry_id: u64,
}

/// A macro whose interval elapsed
pub struct MacroFire {
    pub username: String,
    pub command: String,
    pub connection: Arc<dyn GameConnection>,
}

pub struct MacroScheduler {
    sets: HashMap<String, MacroSet>,
    queue: DelayQueue<MacroTick>,
    next_id: u64,
}

impl MacroScheduler {
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
            queue: DelayQueue::new(),
            next_id: 1,
        }
    }

    /// Register a macro and start its timer against `connection`
    ///
    /// `connection` is bound only when the alt has no bound connection yet.
    pub fn add(
        &mut self,
        username: &str,
        connection: Arc<dyn GameConnection>,
        command: impl Into<String>,
        cooldown_minutes: f64,
    ) -> Result<MacroInfo, MacroError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(MacroError::EmptyCommand);
        }
        let interval = cooldown_interval(cooldown_minutes)?;

        // Suspended entries stay idle until the next `resume`; only the new one is armed
        let set = self.sets.entry(username.to_string()).or_default();
        if set.connection.is_none() {
            set.connection = Some(connection);
        }

        let id = self.next_id;
        self.next_id += 1;
        let key = self.queue.insert(
            MacroTick {
                username: username.to_string(),
                entry_id: id,
            },
            interval,
        );

        let set = self.sets.entry(username.to_string()).or_default();
        set.entries.push(MacroEntry {
            id,
            command: command.clone(),
            cooldown_minutes,
            interval,
            timer: Some(key),
        });

        info!(
            "Macro added for {}: '{}' every {:?}",
            username, command, interval
        );

        Ok(MacroInfo {
            command,
            cooldown_minutes,
        })
    }

    /// Bind `connection` and arm every suspended entry; returns how many were armed
    pub fn resume(&mut self, username: &str, connection: Arc<dyn GameConnection>) -> usize {
        let set = self.sets.entry(username.to_string()).or_default();
        set.connection = Some(connection);

        let mut armed = 0;
        for entry in set.entries.iter_mut().filter(|e| e.timer.is_none()) {
            entry.timer = Some(self.queue.insert(
                MacroTick {
                    username: username.to_string(),
                    entry_id: entry.id,
                },
                entry.interval,
            ));
            armed += 1;
        }

        if armed > 0 {
            info!("Resumed {} macros for {}", armed, username);
        }
        armed
    }

    /// Cancel every timer for `username` but keep the definitions
    pub fn suspend(&mut self, username: &str) -> usize {
        let Some(set) = self.sets.get_mut(username) else {
            return 0;
        };
        set.connection = None;

        let mut cancelled = 0;
        for entry in set.entries.iter_mut() {
            if let Some(key) = entry.timer.take() {
                self.queue.remove(&key);
                cancelled += 1;
            }
        }

        if set.entries.is_empty() {
            self.sets.remove(username);
        }
        if cancelled > 0 {
            debug!("Suspended {} macro timers for {}", cancelled, username);
        }
        cancelled
    }

    /// Cancel and forget every macro for `username`; returns how many were removed
    pub fn clear(&mut self, username: &str) -> usize {
        self.suspend(username);
        let removed = self
            .sets
            .remove(username)
            .map(|set| set.entries.len())
            .unwrap_or(0);
        if removed > 0 {
            info!("Cleared {} macros for {}", removed, username);
        }
        removed
    }

    /// Registered macros for `username`, in insertion order
    pub fn macros(&self, username: &str) -> Vec<MacroInfo> {
        self.sets
            .get(username)
            .map(|set| {
                set.entries
                    .iter()
                    .map(|entry| MacroInfo {
                        command: entry.command.clone(),
                        cooldown_minutes: entry.cooldown_minutes,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_macros(&self, username: &str) -> bool {
        self.sets
            .get(username)
            .is_some_and(|set| !set.entries.is_empty())
    }

    /// Number of timers currently armed for `username`
    pub fn armed_count(&self, username: &str) -> usize {
        self.sets
            .get(username)
            .map(|set| set.entries.iter().filter(|e| e.timer.is_some()).count())
            .unwrap_or(0)
    }

    /// Total number of armed timers
    pub fn pending_timers(&self) -> usize {
        self.queue.len()
    }

    /// Yield the next macro whose interval elapsed and re-arm it
    pub fn poll_fire(&mut self, cx: &mut Context<'_>) -> Poll<MacroFire> {
        loop {
            let tick = match self.queue.poll_expired(cx) {
                Poll::Ready(Some(expired)) => expired.into_inner(),
                Poll::Ready(None) | Poll::Pending => return Poll::Pending,
            };

            let Some(set) = self.sets.get_mut(&tick.username) else {
                warn!("Expired macro tick without a macro set: {}", tick.username);
                continue;
            };
            let Some(connection) = set.connection.clone() else {
                warn!("Expired macro tick for unbound set: {}", tick.username);
                continue;
            };
            let Some(entry) = set.entries.iter_mut().find(|e| e.id == tick.entry_id) else {
                warn!("Expired macro tick for unknown entry of {}", tick.username);
                continue;
            };

            entry.timer = Some(self.queue.insert(tick.clone(), entry.interval));
            return Poll::Ready(MacroFire {
                username: tick.username,
                command: entry.command.clone(),
                connection,
            });
        }
    }
}

impl Default for MacroScheduler {
    fn default() -> Self {
        Self::new()
    }
}
