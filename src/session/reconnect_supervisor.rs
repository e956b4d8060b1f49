//! Delayed session recreation, at most one pending timer per username

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, warn};

/// Pause after an unexpected disconnect before an auto-reconnect attempt
pub const AUTO_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pause between tearing down a session and re-authenticating on request,
/// giving the server time to release the username
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct PendingReconnect {
    credential: String,
    fires_at: DateTime<Utc>,
    key: delay_queue::Key,
}

/// A reconnect timer that elapsed and consumed itself
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectDue {
    pub username: String,
    pub credential: String,
}

pub struct ReconnectSupervisor {
    pending: HashMap<String, PendingReconnect>,
    queue: DelayQueue<String>,
}

impl ReconnectSupervisor {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            queue: DelayQueue::new(),
        }
    }

    /// Schedule a recreation; no-op returning false if one is already pending
    pub fn arm(&mut self, username: &str, credential: &str, delay: Duration) -> bool {
        if self.pending.contains_key(username) {
            debug!("Reconnect already pending for {}, ignoring arm", username);
            return false;
        }

        let key = self.queue.insert(username.to_string(), delay);
        let fires_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.pending.insert(
            username.to_string(),
            PendingReconnect {
                credential: credential.to_string(),
                fires_at,
                key,
            },
        );

        info!("Reconnect armed for {} in {:?}", username, delay);
        true
    }

    /// Drop a pending timer; returns whether one existed
    pub fn cancel(&mut self, username: &str) -> bool {
        match self.pending.remove(username) {
            Some(pending) => {
                self.queue.remove(&pending.key);
                info!("Reconnect cancelled for {}", username);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, username: &str) -> bool {
        self.pending.contains_key(username)
    }

    /// Wall-clock time the pending timer for `username` is due
    pub fn fires_at(&self, username: &str) -> Option<DateTime<Utc>> {
        self.pending.get(username).map(|pending| pending.fires_at)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cancel everything, used on shutdown
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        self.queue.clear();
        count
    }

    /// Yield the next elapsed timer, removing it from the pending set
    pub fn poll_due(&mut self, cx: &mut Context<'_>) -> Poll<ReconnectDue> {
        loop {
            let username = match self.queue.poll_expired(cx) {
                Poll::Ready(Some(expired)) => expired.into_inner(),
                Poll::Ready(None) | Poll::Pending => return Poll::Pending,
            };

            match self.pending.remove(&username) {
                Some(pending) => {
                    return Poll::Ready(ReconnectDue {
                        username,
                        credential: pending.credential,
                    });
                }
                None => warn!("Expired reconnect timer without pending entry: {}", username),
            }
        }
    }
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
