//! Game client integration module
//!
//! Defines the narrow seam the session layer uses to talk to a game protocol
//! client, plus a mock/simulated client for tests and offline runs.

pub mod connection;
pub mod mock;
pub mod types;

// Re-export commonly used types
pub use connection::{ConnectionEvent, ConnectionEventSink, Connector, GameConnection};
pub use mock::{MockConnector, Simulation};
pub use types::*;
