use logharvest_core::{
    Config, ConnectionEvent, Connector, HarvestError, InboundEvent, Result,
};
use logharvest_ingestion::{LogSource, SourceContext};
use logharvest_transport::{ConnectionManager, ConnectionSettings};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Node-side agent: tails every configured source and ships it to the collector
pub struct Harvester {
    node: String,
    sources: BTreeMap<String, LogSource>,
    manager: Arc<ConnectionManager>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    messages_sent: Arc<AtomicU64>,
    status_frequency: Duration,
}

impl Harvester {
    /// Validate the configuration and build one source per configured label.
    ///
    /// Nothing is opened or spawned until [`run`](Self::run).
    pub fn new(config: &Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let server = config.validate()?;
        let node = config.general.instance_name.clone();
        let labels: Vec<String> = config.log_files.keys().cloned().collect();

        let (manager, events) = ConnectionManager::new(
            &node,
            labels,
            ConnectionSettings::from(&config.harvester),
            connector,
        );

        let ctx = Arc::new(SourceContext::from_config(config, server, manager.clone()));
        let messages_sent = ctx.messages_sent.clone();

        let sources = config
            .log_files
            .iter()
            .map(|(label, spec)| (label.clone(), LogSource::from_spec(label, spec, ctx.clone())))
            .collect();

        Ok(Self {
            node,
            sources,
            manager,
            events,
            messages_sent,
            status_frequency: config.general.status_frequency(),
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn source(&self, label: &str) -> Option<&LogSource> {
        self.sources.get(label)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.sources.values().filter(|s| s.is_enabled()).count()
    }

    /// Log lines handed to the connection so far
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Connect, start watching, and process events until a fatal one arrives.
    ///
    /// Only `node_already_exists` ends the loop with an error.
    pub async fn run(&mut self) -> Result<()> {
        info!(node = %self.node, sources = self.sources.len(), "Starting harvester");
        self.manager.connect();

        for source in self.sources.values_mut() {
            source.watch();
            info!(
                label = %source.label(),
                location = %source.location(),
                remote = source.is_remote(),
                "Watching"
            );
        }

        let heartbeat_period = self.manager.settings().heartbeat_period;
        let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut status = interval_at(Instant::now() + self.status_frequency, self.status_frequency);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event)?,
                    None => return Ok(()),
                },
                _ = heartbeat.tick() => {
                    self.manager.check_heartbeat();
                }
                _ = status.tick() => self.report_status(),
            }
        }
    }

    /// Feed one connection event through the manager and dispatch what it
    /// hands back
    pub fn handle_event(&self, event: ConnectionEvent) -> Result<()> {
        match self.manager.handle(event) {
            Some(inbound) => self.dispatch(inbound),
            None => Ok(()),
        }
    }

    /// Act on a control event from the collector
    pub fn dispatch(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::NodeAlreadyExists => {
                return Err(HarvestError::NodeAlreadyExists {
                    node: self.node.clone(),
                });
            }
            InboundEvent::Heartbeat => self.manager.record_heartbeat(),
            InboundEvent::EnableLog { log_file } => {
                if let Some(source) = self.lookup(&log_file) {
                    info!(label = %log_file, "Enabling log");
                    source.enable();
                }
            }
            InboundEvent::DisableLog { log_file } => {
                if let Some(source) = self.lookup(&log_file) {
                    info!(label = %log_file, "Disabling log");
                    source.disable();
                }
            }
            InboundEvent::HistoryRequest {
                log_file,
                client_id,
                history_id,
            } => {
                if let Some(source) = self.lookup(&log_file) {
                    debug!(label = %log_file, %client_id, %history_id, "History requested");
                    // Answered from a background task
                    let _ = source.send_history(client_id, history_id);
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, label: &str) -> Option<&LogSource> {
        let source = self.sources.get(label);
        if source.is_none() {
            debug!(label = %label, "Ignoring event for unknown log file");
        }
        source
    }

    fn report_status(&self) {
        info!(
            node = %self.node,
            sources = self.source_count(),
            enabled = self.enabled_count(),
            messages_sent = self.messages_sent(),
            connection = ?self.manager.state(),
            "Status"
        );
    }
}
