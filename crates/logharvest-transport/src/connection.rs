use logharvest_core::config::HarvesterConfig;
use logharvest_core::{
    ConnectionEvent, ConnectionEvents, Connector, DeliveryChannel, InboundEvent, OutboundEvent,
    Outbox, TransportError, TransportEvent,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Timers driving heartbeat supervision and reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub reconnect_interval: Duration,
    pub heartbeat_period: Duration,
    pub heartbeat_fails: u32,
}

impl ConnectionSettings {
    /// Silence longer than this means the connection is dead
    pub fn heartbeat_threshold(&self) -> Duration {
        self.heartbeat_period * self.heartbeat_fails
    }
}

impl From<&HarvesterConfig> for ConnectionSettings {
    fn from(config: &HarvesterConfig) -> Self {
        Self {
            reconnect_interval: config.reconnect_interval(),
            heartbeat_period: config.heartbeat_period(),
            heartbeat_fails: config.heartbeat_fails,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
}

struct Shared {
    state: ConnectionState,
    /// Set while a reconnect cycle is scheduled or running
    reconnecting: bool,
    last_heartbeat: Option<Instant>,
    channel: Option<Arc<dyn DeliveryChannel>>,
    generation: u64,
    reconnect_attempts: u64,
}

/// Owns the collector connection.
///
/// Every send goes through here: a failed send marks the connection down and
/// starts a reconnect cycle. At most one cycle is in flight at a time.
pub struct ConnectionManager {
    node: String,
    labels: Vec<String>,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    shared: Mutex<Shared>,
    this: Weak<ConnectionManager>,
}

impl ConnectionManager {
    /// Create the manager and the receiver its connections report into.
    ///
    /// Events from the receiver must be fed back through [`handle`](Self::handle).
    pub fn new(
        node: &str,
        labels: Vec<String>,
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new_cyclic(|this| Self {
            node: node.to_string(),
            labels,
            settings,
            connector,
            events_tx,
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                reconnecting: false,
                last_heartbeat: None,
                channel: None,
                generation: 0,
                reconnect_attempts: 0,
            }),
            this: this.clone(),
        });
        (manager, events_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.lock().reconnecting
    }

    /// Identifier of the newest connection
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Reconnect attempts scheduled so far
    pub fn reconnect_attempts(&self) -> u64 {
        self.lock().reconnect_attempts
    }

    /// Open a new connection, replacing the current one.
    ///
    /// The state lock is held across `open`, so no event of the new generation
    /// is handled before its channel is in place.
    pub fn connect(&self) {
        let mut shared = self.lock();
        shared.generation += 1;
        let generation = shared.generation;
        info!(node = %self.node, generation, "Connecting to collector");

        let channel = self
            .connector
            .open(ConnectionEvents::new(generation, self.events_tx.clone()));
        shared.channel = Some(channel);
    }

    /// Apply one connection event.
    ///
    /// Lifecycle events and heartbeats are consumed here. Any other control
    /// event is handed back for the caller to dispatch.
    pub fn handle(&self, event: ConnectionEvent) -> Option<InboundEvent> {
        let ConnectionEvent { generation, kind } = event;
        match kind {
            TransportEvent::Message(InboundEvent::Heartbeat) => {
                self.record_heartbeat();
                None
            }
            TransportEvent::Message(inbound) => Some(inbound),
            _ if generation != self.generation() => {
                debug!(generation, "Ignoring event from a replaced connection");
                None
            }
            TransportEvent::Connected => {
                self.on_connected();
                None
            }
            TransportEvent::Error(reason) => {
                warn!(reason = %reason, "Collector connection failed");
                self.on_lost();
                None
            }
            TransportEvent::Closed => {
                warn!("Collector closed the connection");
                self.on_lost();
                None
            }
        }
    }

    fn on_connected(&self) {
        {
            let mut shared = self.lock();
            shared.state = ConnectionState::Connected;
            shared.reconnecting = false;
            shared.last_heartbeat = Some(Instant::now());
        }
        info!(node = %self.node, logs = self.labels.len(), "Connected to collector, announcing node");
        self.send(OutboundEvent::announce(&self.node, self.labels.clone()));
    }

    fn on_lost(&self) {
        self.mark_disconnected();
        self.reconnect(false);
    }

    /// Returns whether the connection was up before
    fn mark_disconnected(&self) -> bool {
        let mut shared = self.lock();
        let was_connected = shared.state == ConnectionState::Connected;
        shared.state = if shared.reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        };
        was_connected
    }

    pub fn record_heartbeat(&self) {
        debug!("Received collector heartbeat");
        self.lock().last_heartbeat = Some(Instant::now());
    }

    /// Reconnect if no heartbeat arrived within the tolerated window.
    ///
    /// Returns true when the check failed.
    pub fn check_heartbeat(&self) -> bool {
        let threshold = self.settings.heartbeat_threshold();
        let failed = match self.lock().last_heartbeat {
            Some(at) => at.elapsed() > threshold,
            None => true,
        };

        if failed {
            warn!(
                threshold_secs = threshold.as_secs(),
                "Failed heartbeat check, reconnecting..."
            );
            self.mark_disconnected();
            self.reconnect(false);
        }
        failed
    }

    /// Schedule a reconnect cycle.
    ///
    /// The cycle waits one reconnect interval, opens a connection, and checks
    /// again half an interval later; if still down it forces another cycle.
    /// Without `force` the call is a no-op while a cycle is in flight.
    pub fn reconnect(&self, force: bool) {
        {
            let mut shared = self.lock();
            if shared.reconnecting && !force {
                debug!("Reconnect already in progress");
                return;
            }
            shared.reconnecting = true;
            shared.reconnect_attempts += 1;
            if shared.state != ConnectionState::Connected {
                shared.state = ConnectionState::Reconnecting;
            }
        }

        let Some(manager) = self.this.upgrade() else {
            return;
        };
        let delay = self.settings.reconnect_interval;
        info!(delay_secs = delay.as_secs(), "Reconnecting to collector...");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.is_connected() {
                manager.lock().reconnecting = false;
                return;
            }

            manager.connect();

            tokio::time::sleep(delay / 2).await;
            if !manager.is_connected() {
                debug!("Collector still unreachable");
                manager.reconnect(true);
            }
        });
    }
}

impl Outbox for ConnectionManager {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    fn send(&self, event: OutboundEvent) {
        let channel = self.lock().channel.clone();
        let result = match channel {
            Some(channel) => channel.emit(&event),
            None => Err(TransportError::NotConnected),
        };

        if let Err(e) = result {
            if self.mark_disconnected() {
                error!(event = %event.event, error = %e, "Unable to send message over socket");
            } else {
                debug!(event = %event.event, error = %e, "Dropped message while disconnected");
            }
            self.reconnect(false);
        }
    }
}
