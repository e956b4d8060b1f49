//! Observer transport module
//!
//! Serves the WebSocket endpoint observer consoles connect to.

pub mod websocket;

pub use websocket::ObserverServer;
