//! Session handle: one alt's connection, credential and behaviour flags

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::game::{GameConnection, SessionId};

/// Lifecycle state of a single session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Ended => write!(f, "ended"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("Invalid transition for {username}: {from} -> {to}")]
    InvalidTransition {
        username: String,
        from: SessionState,
        to: SessionState,
    },
}

/// Per-session behaviour toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BehaviorFlags {
    pub auto_feed: bool,
    pub auto_reconnect: bool,
}

pub struct SessionHandle {
    id: SessionId,
    username: String,
    credential: String,
    connection: Arc<dyn GameConnection>,
    flags: BehaviorFlags,
    state: SessionState,
    created_at: DateTime<Utc>,
    /// Set while an equip/consume sequence is in flight
    feeding: Arc<AtomicBool>,
    /// Cancelled when the handle leaves the registry; background tasks select on it
    tasks: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        username: impl Into<String>,
        credential: impl Into<String>,
        connection: Arc<dyn GameConnection>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            credential: credential.into(),
            connection,
            flags: BehaviorFlags::default(),
            state: SessionState::Connecting,
            created_at: Utc::now(),
            feeding: Arc::new(AtomicBool::new(false)),
            tasks: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn connection(&self) -> &Arc<dyn GameConnection> {
        &self.connection
    }

    pub fn flags(&self) -> BehaviorFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut BehaviorFlags {
        &mut self.flags
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Token that is cancelled once the session is torn down
    pub fn task_token(&self) -> CancellationToken {
        self.tasks.clone()
    }

    /// Stop every background task bound to this session
    pub fn cancel_tasks(&self) {
        self.tasks.cancel();
    }

    /// Connecting -> Active
    pub fn activate(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Active)
    }

    /// Connecting | Active -> Ended
    pub fn end(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Ended)
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        let allowed = matches!(
            (self.state, to),
            (SessionState::Connecting, SessionState::Active)
                | (SessionState::Connecting, SessionState::Ended)
                | (SessionState::Active, SessionState::Ended)
        );
        if !allowed {
            return Err(SessionError::InvalidTransition {
                username: self.username.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Claim the feeding slot; `None` while a feed is already running
    pub fn try_begin_feeding(&self) -> Option<FeedingGuard> {
        self.feeding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FeedingGuard {
                flag: self.feeding.clone(),
            })
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("flags", &self.flags)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Releases the feeding slot when dropped
pub struct FeedingGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for FeedingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{ConnectionEventSink, Connector, MockConnector};
    use crate::game::types::{AuthMode, ConnectOptions};
    use tokio::sync::mpsc;

    fn handle(username: &str) -> SessionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MockConnector::new();
        let options = ConnectOptions {
            host: "localhost".to_string(),
            port: 25565,
            username: username.to_string(),
            password: "pw".to_string(),
            auth: AuthMode::Offline,
            version: "1.18.2".to_string(),
        };
        let connection = connector.connect(options, ConnectionEventSink::new(SessionId(1), username, tx));
        SessionHandle::new(SessionId(1), username, "pw", connection)
    }

    #[test]
    fn test_new_handle_is_connecting() {
        let h = handle("alice");
        assert_eq!(h.state(), SessionState::Connecting);
        assert_eq!(h.flags(), BehaviorFlags::default());
        assert_eq!(h.credential(), "pw");
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut h = handle("alice");
        h.activate().unwrap();
        assert!(h.is_active());
        h.end().unwrap();
        assert_eq!(h.state(), SessionState::Ended);

        // Ended is terminal
        assert!(h.activate().is_err());
        assert!(h.end().is_err());
    }

    #[test]
    fn test_connecting_can_end_directly() {
        let mut h = handle("bob");
        h.end().unwrap();
        assert_eq!(h.state(), SessionState::Ended);
    }

    #[test]
    fn test_active_is_not_reentered() {
        let mut h = handle("carol");
        h.activate().unwrap();
        let err = h.activate().unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                username: "carol".to_string(),
                from: SessionState::Active,
                to: SessionState::Active,
            }
        );
    }

    #[test]
    fn test_feeding_guard_is_exclusive() {
        let h = handle("dave");
        let guard = h.try_begin_feeding();
        assert!(guard.is_some());
        assert!(h.try_begin_feeding().is_none());
        drop(guard);
        assert!(h.try_begin_feeding().is_some());
    }

    #[test]
    fn test_cancel_tasks_reaches_cloned_tokens() {
        let h = handle("erin");
        let token = h.task_token();
        assert!(!token.is_cancelled());
        h.cancel_tasks();
        assert!(token.is_cancelled());
        assert!(h.task_token().is_cancelled());
    }
}
