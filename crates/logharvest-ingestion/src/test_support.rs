use crate::courier::SourceContext;
use logharvest_core::config::{Config, ServerConfig, SshConfig};
use logharvest_core::{OutboundEvent, Outbox, Payload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outbox that records everything sent through it
#[derive(Default)]
pub struct RecordingOutbox {
    connected: AtomicBool,
    sent: Mutex<Vec<OutboundEvent>>,
}

impl RecordingOutbox {
    pub fn connected() -> Arc<Self> {
        let outbox = Self::default();
        outbox.set_connected(true);
        Arc::new(outbox)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|e| match e.payload {
                Payload::Log(line) => Some(line.msg),
                _ => None,
            })
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.sent().iter().filter(|e| matches!(e.payload, Payload::Ping(_))).count()
    }

    pub fn histories(&self) -> Vec<logharvest_core::HistoryResponse> {
        self.sent()
            .into_iter()
            .filter_map(|e| match e.payload {
                Payload::History(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Outbox for RecordingOutbox {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, event: OutboundEvent) {
        self.sent.lock().unwrap().push(event);
    }
}

/// Context with fast timers, delivering into `outbox`
pub fn context(outbox: Arc<RecordingOutbox>) -> Arc<SourceContext> {
    let mut config = Config::sample();
    config.harvester.poll_interval_ms = 20;
    config.harvester.reconnect_interval_secs = 1;
    let server = ServerConfig::default();
    let mut ctx = SourceContext::from_config(&config, &server, outbox);
    ctx.ssh = SshConfig {
        program: "sh".to_string(),
        batch_mode: false,
        connect_timeout_secs: 0,
    };
    ctx.respawn_delay = Duration::from_millis(200);
    Arc::new(ctx)
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
