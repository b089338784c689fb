use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::HarvestError;

/// Main configuration for a harvester node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Collector connection. Required; there is no usable default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Timers and history window
    pub harvester: HarvesterConfig,

    /// Remote shell settings for remote sources
    pub ssh: SshConfig,

    /// Tailed sources, keyed by label
    pub log_files: BTreeMap<String, LogFileSpec>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, HarvestError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarvestError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, HarvestError> {
        toml::from_str(content)
            .map_err(|e| HarvestError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String, HarvestError> {
        toml::to_string_pretty(self)
            .map_err(|e| HarvestError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// A filled-in configuration used by `--print-config`
    pub fn sample() -> Self {
        let mut log_files = BTreeMap::new();
        log_files.insert(
            "app".to_string(),
            LogFileSpec::Local(PathBuf::from("/var/log/app.log")),
        );
        log_files.insert(
            "db".to_string(),
            LogFileSpec::Remote {
                host: "db01".to_string(),
                path: "/var/log/postgresql/postgresql.log".to_string(),
            },
        );

        Self {
            general: GeneralConfig {
                instance_name: "web-01".to_string(),
                ..GeneralConfig::default()
            },
            server: Some(ServerConfig::default()),
            log_files,
            ..Self::default()
        }
    }

    /// Check the settings the harvester cannot run without.
    ///
    /// Returns the server section so callers don't have to unwrap it again.
    pub fn validate(&self) -> Result<&ServerConfig, HarvestError> {
        let server = self
            .server
            .as_ref()
            .ok_or_else(|| HarvestError::Config("Missing server configuration".to_string()))?;

        if self.general.instance_name.trim().is_empty() {
            return Err(HarvestError::Config(
                "Missing general.instance_name".to_string(),
            ));
        }
        if server.host.trim().is_empty() {
            return Err(HarvestError::Config("Missing server.host".to_string()));
        }
        if server.message_type.trim().is_empty() {
            return Err(HarvestError::Config(
                "server.message_type must not be empty".to_string(),
            ));
        }

        let h = &self.harvester;
        if h.heartbeat_period_secs == 0 || h.heartbeat_fails == 0 {
            return Err(HarvestError::Config(
                "Heartbeat period and allowed failures must be positive".to_string(),
            ));
        }
        if h.reconnect_interval_secs == 0 || h.poll_interval_ms == 0 {
            return Err(HarvestError::Config(
                "Reconnect and poll intervals must be positive".to_string(),
            ));
        }
        if h.history_length == 0 {
            return Err(HarvestError::Config(
                "harvester.history_length must be positive".to_string(),
            ));
        }
        if self.general.status_frequency_secs == 0 {
            return Err(HarvestError::Config(
                "general.status_frequency_secs must be positive".to_string(),
            ));
        }

        for (label, spec) in &self.log_files {
            if label.trim().is_empty() {
                return Err(HarvestError::Config("Log file labels must not be empty".to_string()));
            }
            if let LogFileSpec::Remote { host, path } = spec {
                if host.trim().is_empty() || path.trim().is_empty() {
                    return Err(HarvestError::Config(format!(
                        "Remote log file '{}' needs both host and path",
                        label
                    )));
                }
            }
        }

        Ok(server)
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Node name announced to the collector; must be unique cluster-wide
    pub instance_name: String,

    /// Internal log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Character encoding of tailed files
    pub encoding: Encoding,

    /// Seconds between status reports
    pub status_frequency_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            log_level: "info".to_string(),
            encoding: Encoding::Utf8,
            status_frequency_secs: 60,
        }
    }
}

impl GeneralConfig {
    pub fn status_frequency(&self) -> Duration {
        Duration::from_secs(self.status_frequency_secs)
    }
}

/// Collector connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host, optionally with a scheme (`ws://`, `wss://`, `http://`, `https://`)
    pub host: String,
    pub port: u16,
    /// Request path of the collector endpoint
    pub path: String,
    /// Event name used for log lines
    pub message_type: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "ws://localhost".to_string(),
            port: 28778,
            path: "/".to_string(),
            message_type: "log".to_string(),
        }
    }
}

impl ServerConfig {
    /// Full WebSocket URL of the collector
    pub fn url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        let host = if let Some(rest) = host.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if let Some(rest) = host.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if host.contains("://") {
            host.to_string()
        } else {
            format!("ws://{}", host)
        };

        let path = if self.path.is_empty() || self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}:{}{}", host, self.port, path)
    }
}

/// Timer and history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Expected interval between collector heartbeats
    pub heartbeat_period_secs: u64,
    /// Missed heartbeats tolerated before reconnecting
    pub heartbeat_fails: u32,
    /// Delay before each reconnect attempt
    pub reconnect_interval_secs: u64,
    /// History window: bytes for local files, lines for remote files
    pub history_length: u64,
    /// Size poll period for local files
    pub poll_interval_ms: u64,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_secs: 20,
            heartbeat_fails: 3,
            reconnect_interval_secs: 5,
            history_length: 100_000,
            poll_interval_ms: 1000,
        }
    }
}

impl HarvesterConfig {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Remote shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote shell executable
    pub program: String,
    /// Never prompt for passwords or passphrases
    pub batch_mode: bool,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            batch_mode: true,
            connect_timeout_secs: 10,
        }
    }
}

impl SshConfig {
    /// Option tokens passed before the host argument
    pub fn cli_options(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if self.batch_mode {
            opts.push("-o".to_string());
            opts.push("BatchMode=yes".to_string());
        }
        if self.connect_timeout_secs > 0 {
            opts.push("-o".to_string());
            opts.push(format!("ConnectTimeout={}", self.connect_timeout_secs));
        }
        opts
    }
}

/// One tailed source: a bare path is local, a table with a host is remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogFileSpec {
    Local(PathBuf),
    Remote { host: String, path: String },
}

/// Character encoding used to decode complete lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    #[serde(alias = "binary", alias = "iso-8859-1")]
    Latin1,
    Ascii,
}

impl Encoding {
    /// Decode one line. Invalid sequences are replaced, never dropped.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
        }
    }
}
