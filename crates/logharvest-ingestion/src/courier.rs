use logharvest_core::config::{Config, ServerConfig, SshConfig};
use logharvest_core::{Encoding, HistoryResponse, OutboundEvent, Outbox, SourceError};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Settings and delivery path shared by every source of a node
pub struct SourceContext {
    /// Node name stamped on every event
    pub node: String,
    /// Event name for log lines
    pub message_type: String,
    pub encoding: Encoding,
    pub history_length: u64,
    pub poll_interval: Duration,
    /// Wait before respawning an exited remote tail
    pub respawn_delay: Duration,
    pub ssh: SshConfig,
    pub outbox: Arc<dyn Outbox>,
    /// Lines handed to the outbox, across all sources
    pub messages_sent: Arc<AtomicU64>,
}

impl SourceContext {
    pub fn from_config(config: &Config, server: &ServerConfig, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            node: config.general.instance_name.clone(),
            message_type: server.message_type.clone(),
            encoding: config.general.encoding,
            history_length: config.harvester.history_length,
            poll_interval: config.harvester.poll_interval(),
            respawn_delay: config.harvester.reconnect_interval(),
            ssh: config.ssh.clone(),
            outbox,
            messages_sent: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Sends events on behalf of one labelled source
#[derive(Clone)]
pub struct Courier {
    label: Arc<str>,
    ctx: Arc<SourceContext>,
}

impl Courier {
    pub fn new(label: &str, ctx: Arc<SourceContext>) -> Self {
        Self {
            label: Arc::from(label),
            ctx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn context(&self) -> &SourceContext {
        &self.ctx
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.outbox.is_connected()
    }

    /// Forward one complete line
    pub fn send_log(&self, msg: String) {
        self.ctx.outbox.send(OutboundEvent::log(
            &self.ctx.message_type,
            &self.ctx.node,
            &self.label,
            msg,
        ));
        self.ctx.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Liveness signal for this source
    pub fn ping(&self) {
        self.ctx.outbox.send(OutboundEvent::ping(&self.ctx.node, &self.label));
    }

    /// Answer a history request. A failed read answers with no lines and the error.
    pub fn send_history(
        &self,
        client_id: Value,
        history_id: Value,
        lines: Result<Vec<String>, SourceError>,
    ) {
        let (lines, error) = match lines {
            Ok(lines) => {
                debug!(label = %self.label, lines = lines.len(), "Sending history");
                (lines, None)
            }
            Err(e) => {
                warn!(label = %self.label, error = %e, "History unavailable");
                (Vec::new(), Some(e.to_string()))
            }
        };

        self.ctx.outbox.send(OutboundEvent::history(HistoryResponse {
            node: self.ctx.node.clone(),
            history_id,
            client_id,
            log_file: self.label.to_string(),
            lines,
            error,
        }));
    }
}
