//! logharvest Core
//!
//! Configuration, errors, wire events, line reassembly, and the collaborator
//! traits shared by the logharvest crates.

pub mod config;
pub mod error;
pub mod event;
pub mod line_splitter;
pub mod traits;

// Re-export commonly used types
pub use config::{Config, Encoding, LogFileSpec};
pub use error::{HarvestError, Result, SourceError, TransportError};
pub use event::{HistoryResponse, InboundEvent, OutboundEvent, Payload};
pub use line_splitter::{split_lines, LineSplitter};
pub use traits::{
    ConnectionEvent, ConnectionEvents, Connector, DeliveryChannel, Outbox, TransportEvent,
};
