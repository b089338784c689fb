//! Wire events exchanged with the collector.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ANNOUNCE_NODE: &str = "announce_node";
pub const PING: &str = "ping";
pub const HISTORY_RESPONSE: &str = "history_response";

/// An event sent from the node to the collector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub event: String,
    #[serde(rename = "data")]
    pub payload: Payload,
}

/// Payload of an outbound event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Announce(AnnounceNode),
    Log(LogLine),
    Ping(Ping),
    History(HistoryResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnounceNode {
    pub client_type: String,
    pub logs: Vec<String>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub node: String,
    pub log_file: String,
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ping {
    pub node: String,
    pub log_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryResponse {
    pub node: String,
    pub history_id: Value,
    pub client_id: Value,
    pub log_file: String,
    /// Newest line first
    pub lines: Vec<String>,
    /// Set when the source could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutboundEvent {
    pub fn announce(node: &str, labels: Vec<String>) -> Self {
        Self {
            event: ANNOUNCE_NODE.to_string(),
            payload: Payload::Announce(AnnounceNode {
                client_type: "node".to_string(),
                logs: labels,
                label: node.to_string(),
            }),
        }
    }

    /// A log line, sent under the configured message type
    pub fn log(message_type: &str, node: &str, label: &str, msg: String) -> Self {
        Self {
            event: message_type.to_string(),
            payload: Payload::Log(LogLine {
                node: node.to_string(),
                log_file: label.to_string(),
                msg,
            }),
        }
    }

    pub fn ping(node: &str, label: &str) -> Self {
        Self {
            event: PING.to_string(),
            payload: Payload::Ping(Ping {
                node: node.to_string(),
                log_file: label.to_string(),
            }),
        }
    }

    pub fn history(response: HistoryResponse) -> Self {
        Self {
            event: HISTORY_RESPONSE.to_string(),
            payload: Payload::History(response),
        }
    }

    /// Encode as a text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A control event sent from the collector to the node.
///
/// Payloads of events that carry nothing are ignored, whatever their shape.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Heartbeat,
    NodeAlreadyExists,
    EnableLog {
        log_file: String,
    },
    DisableLog {
        log_file: String,
    },
    HistoryRequest {
        log_file: String,
        client_id: Value,
        history_id: Value,
    },
}

/// Raw `{"event", "data"}` frame before the payload is interpreted
#[derive(Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct TargetPayload {
    log_file: String,
}

#[derive(Deserialize)]
struct HistoryPayload {
    log_file: String,
    #[serde(default)]
    client_id: Value,
    #[serde(default)]
    history_id: Value,
}

impl InboundFrame {
    fn into_event(self) -> Result<InboundEvent, String> {
        let payload_error = |e: serde_json::Error| format!("invalid '{}' payload: {}", self.event, e);

        match self.event.as_str() {
            "heartbeat" => Ok(InboundEvent::Heartbeat),
            "node_already_exists" => Ok(InboundEvent::NodeAlreadyExists),
            "enable_log" => {
                let TargetPayload { log_file } =
                    serde_json::from_value(self.data).map_err(payload_error)?;
                Ok(InboundEvent::EnableLog { log_file })
            }
            "disable_log" => {
                let TargetPayload { log_file } =
                    serde_json::from_value(self.data).map_err(payload_error)?;
                Ok(InboundEvent::DisableLog { log_file })
            }
            "history_request" => {
                let HistoryPayload {
                    log_file,
                    client_id,
                    history_id,
                } = serde_json::from_value(self.data).map_err(payload_error)?;
                Ok(InboundEvent::HistoryRequest {
                    log_file,
                    client_id,
                    history_id,
                })
            }
            other => Err(format!("unknown event '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for InboundEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        InboundFrame::deserialize(deserializer)?
            .into_event()
            .map_err(de::Error::custom)
    }
}

impl InboundEvent {
    /// Decode a text frame
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Label the event targets, if any
    pub fn log_file(&self) -> Option<&str> {
        match self {
            InboundEvent::EnableLog { log_file }
            | InboundEvent::DisableLog { log_file }
            | InboundEvent::HistoryRequest { log_file, .. } => Some(log_file),
            InboundEvent::Heartbeat | InboundEvent::NodeAlreadyExists => None,
        }
    }
}
