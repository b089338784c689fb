//! logharvest Ingestion
//!
//! Tailed log sources: local files followed by size growth, and remote files
//! streamed through `ssh ... tail -f`. Both answer history requests.

pub mod courier;
pub mod history;
pub mod local;
pub mod remote;

#[cfg(test)]
mod test_support;

pub use courier::{Courier, SourceContext};
pub use local::LocalSource;
pub use remote::RemoteSource;

use logharvest_core::LogFileSpec;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One tailed source, local or remote
pub enum LogSource {
    Local(LocalSource),
    Remote(RemoteSource),
}

impl LogSource {
    /// Build the source described by a config entry
    pub fn from_spec(label: &str, spec: &LogFileSpec, ctx: Arc<SourceContext>) -> Self {
        match spec {
            LogFileSpec::Local(path) => LogSource::Local(LocalSource::new(label, path.clone(), ctx)),
            LogFileSpec::Remote { host, path } => {
                LogSource::Remote(RemoteSource::new(label, host.clone(), path.clone(), ctx))
            }
        }
    }

    pub fn label(&self) -> &str {
        match self {
            LogSource::Local(s) => s.label(),
            LogSource::Remote(s) => s.label(),
        }
    }

    /// Where the source lives, for log messages
    pub fn location(&self) -> String {
        match self {
            LogSource::Local(s) => s.path().display().to_string(),
            LogSource::Remote(s) => format!("{}:{}", s.host(), s.path()),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, LogSource::Remote(_))
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            LogSource::Local(s) => s.is_enabled(),
            LogSource::Remote(s) => s.is_enabled(),
        }
    }

    pub fn watch(&mut self) {
        match self {
            LogSource::Local(s) => s.watch(),
            LogSource::Remote(s) => s.watch(),
        }
    }

    pub fn enable(&self) {
        match self {
            LogSource::Local(s) => s.enable(),
            LogSource::Remote(s) => s.enable(),
        }
    }

    pub fn disable(&self) {
        match self {
            LogSource::Local(s) => s.disable(),
            LogSource::Remote(s) => s.disable(),
        }
    }

    pub fn send_log(&self, msg: String) {
        match self {
            LogSource::Local(s) => s.send_log(msg),
            LogSource::Remote(s) => s.send_log(msg),
        }
    }

    pub fn ping(&self) {
        match self {
            LogSource::Local(s) => s.ping(),
            LogSource::Remote(s) => s.ping(),
        }
    }

    /// Read the history window in the background and answer the request
    pub fn send_history(&self, client_id: Value, history_id: Value) -> JoinHandle<()> {
        match self {
            LogSource::Local(s) => s.send_history(client_id, history_id),
            LogSource::Remote(s) => s.send_history(client_id, history_id),
        }
    }
}
