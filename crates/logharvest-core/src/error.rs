use thiserror::Error;

/// Core error types for logharvest
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("A node named '{node}' is already registered with the collector")]
    NodeAlreadyExists { node: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the collector connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Not connected to the collector")]
    NotConnected,

    #[error("Connection is not writable: {0}")]
    NotWritable(String),

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors raised while reading a log source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read '{label}': {message}")]
    Read { label: String, message: String },

    #[error("Remote command for '{label}' failed: {message}")]
    RemoteCommand { label: String, message: String },

    #[error("File watch error: {0}")]
    Watch(String),
}

/// Result type alias for logharvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;
