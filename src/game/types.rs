//! Game client data types shared by the connection seam and the session layer

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Food level reported by the game server when a player is fully fed
pub const MAX_FOOD: u32 = 20;

/// Monotonic identifier for one connection instance
///
/// A fresh id is allocated every time a session is created, so events from a
/// connection that has already been torn down can be told apart from events
/// of its successor under the same username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Authentication mode passed to the protocol client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Offline,
    Microsoft,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Offline => write!(f, "offline"),
            AuthMode::Microsoft => write!(f, "microsoft"),
        }
    }
}

/// Everything the protocol client needs to open one connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub auth: AuthMode,
    pub version: String,
}

/// Input states that can be held down on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    Jump,
    Sneak,
}

/// Equipment slot for the equip action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipSlot {
    Hand,
    OffHand,
}

/// Inventory item as reported by the protocol client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub name: String,
    pub count: u32,
    pub slot: u16,
}

impl InventoryItem {
    pub fn new(name: impl Into<String>, count: u32, slot: u16) -> Self {
        Self {
            name: name.into(),
            count,
            slot,
        }
    }
}

/// Lifecycle events emitted by a game connection
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// The player entered the world (also emitted after every respawn)
    Spawn,
    /// Periodic health/food update
    Health { health: f32, food: u32 },
    /// The server kicked the player; an `End` normally follows
    Kicked { reason: String },
    /// Transport or protocol error
    Error { message: String },
    /// The connection closed, for any reason
    End { reason: String },
}

impl GameEvent {
    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::Spawn => "spawn",
            GameEvent::Health { .. } => "health",
            GameEvent::Kicked { .. } => "kicked",
            GameEvent::Error { .. } => "error",
            GameEvent::End { .. } => "end",
        }
    }
}

/// Errors produced by game connection actions
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("Connection is closed")]
    Closed,

    #[error("Not spawned yet")]
    NotSpawned,

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
