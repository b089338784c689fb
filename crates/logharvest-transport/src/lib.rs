//! logharvest Transport
//!
//! The collector connection: a WebSocket delivery channel and the manager
//! that supervises it with heartbeats and fixed-interval reconnects.

pub mod connection;
pub mod websocket;

pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState};
pub use websocket::{WsChannel, WsConnector};
