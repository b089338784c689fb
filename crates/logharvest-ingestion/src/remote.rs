use crate::courier::{Courier, SourceContext};
use crate::history::{self, shell_quote};
use logharvest_core::LineSplitter;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 16 * 1024;

/// A log file on another host, streamed by a long-lived `ssh ... tail -f`
pub struct RemoteSource {
    courier: Courier,
    host: String,
    path: String,
    enabled: Arc<AtomicBool>,
    /// The one data handler of this source, created once and reused by
    /// every enable/disable
    receiver: Arc<RemoteReceiver>,
    slot: Arc<ListenerSlot>,
    watch: Option<JoinHandle<()>>,
}

impl RemoteSource {
    pub fn new(label: &str, host: String, path: String, ctx: Arc<SourceContext>) -> Self {
        let courier = Courier::new(label, ctx);
        Self {
            receiver: Arc::new(RemoteReceiver::new(courier.clone())),
            courier,
            host,
            path,
            enabled: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(ListenerSlot::default()),
            watch: None,
        }
    }

    pub fn label(&self) -> &str {
        self.courier.label()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the tail subprocess. It is respawned whenever it exits.
    pub fn watch(&mut self) {
        if self.is_watching() {
            return;
        }

        let tail = RemoteTail {
            courier: self.courier.clone(),
            host: self.host.clone(),
            path: self.path.clone(),
            slot: self.slot.clone(),
        };
        self.watch = Some(tokio::spawn(tail.run()));
    }

    /// Attach the data handler to the subprocess output
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.slot.attach(&self.receiver);
    }

    /// Detach the same handler that `enable` attached
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.slot.detach(&self.receiver);
    }

    /// Handle one chunk of subprocess output
    pub fn receive_data(&self, chunk: &[u8]) {
        self.receiver.receive_data(chunk);
    }

    pub fn send_log(&self, msg: String) {
        self.courier.send_log(msg);
    }

    pub fn ping(&self) {
        self.courier.ping();
    }

    /// Answer with the last `history_length` lines, fetched with a one-shot `tail`
    pub fn send_history(&self, client_id: Value, history_id: Value) -> JoinHandle<()> {
        let courier = self.courier.clone();
        let host = self.host.clone();
        let path = self.path.clone();
        tokio::spawn(async move {
            let ctx = courier.context();
            let lines = history::read_remote(
                courier.label(),
                &ctx.ssh,
                &host,
                &path,
                ctx.history_length,
                ctx.encoding,
            )
            .await;
            courier.send_history(client_id, history_id, lines);
        })
    }
}

impl Drop for RemoteSource {
    fn drop(&mut self) {
        if let Some(handle) = self.watch.take() {
            // Dropping the task drops the child, which kills it
            handle.abort();
        }
    }
}

/// Turns subprocess output into pings and log lines
struct RemoteReceiver {
    courier: Courier,
    splitter: Mutex<LineSplitter>,
}

impl RemoteReceiver {
    fn new(courier: Courier) -> Self {
        Self {
            courier,
            splitter: Mutex::new(LineSplitter::new()),
        }
    }

    fn splitter(&self) -> MutexGuard<'_, LineSplitter> {
        self.splitter.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn receive_data(&self, chunk: &[u8]) {
        self.courier.ping();
        let encoding = self.courier.context().encoding;
        let mut splitter = self.splitter();
        for line in splitter.push(chunk) {
            self.courier.send_log(encoding.decode(&line));
        }
    }
}

/// Where the subprocess reader finds its data handler, if one is attached
#[derive(Default)]
struct ListenerSlot {
    listener: Mutex<Option<Arc<RemoteReceiver>>>,
}

impl ListenerSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<RemoteReceiver>>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attach(&self, receiver: &Arc<RemoteReceiver>) {
        let mut listener = self.lock();
        if listener.as_ref().is_some_and(|l| Arc::ptr_eq(l, receiver)) {
            return;
        }
        // Output seen while detached was discarded, so any old fragment is stale
        receiver.splitter().reset();
        *listener = Some(receiver.clone());
    }

    fn detach(&self, receiver: &Arc<RemoteReceiver>) {
        let mut listener = self.lock();
        if listener.as_ref().is_some_and(|l| Arc::ptr_eq(l, receiver)) {
            *listener = None;
        }
    }

    fn current(&self) -> Option<Arc<RemoteReceiver>> {
        self.lock().clone()
    }

    #[cfg(test)]
    fn is_attached(&self) -> bool {
        self.lock().is_some()
    }
}

/// The watch task: owns the subprocess and feeds the attached listener
struct RemoteTail {
    courier: Courier,
    host: String,
    path: String,
    slot: Arc<ListenerSlot>,
}

impl RemoteTail {
    /// `replay` is how many existing lines `tail` prints before following
    fn spawn_child(&self, replay: u32) -> std::io::Result<Child> {
        let ssh = &self.courier.context().ssh;
        Command::new(&ssh.program)
            .args(ssh.cli_options())
            .arg(&self.host)
            .arg(format!("tail -n {} -f {}", replay, shell_quote(&self.path)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    async fn run(self) {
        let label = self.courier.label().to_string();
        let respawn_delay = self.courier.context().respawn_delay;

        // Only the first spawn replays the last line; after a respawn it was
        // already delivered
        let mut replay = 1;
        loop {
            match self.spawn_child(replay) {
                Ok(mut child) => {
                    info!(label = %label, host = %self.host, path = %self.path, "Remote tail started");
                    if let Some(mut stdout) = child.stdout.take() {
                        let mut buf = vec![0u8; READ_CHUNK];
                        loop {
                            match stdout.read(&mut buf).await {
                                Ok(0) => break,
                                Ok(n) => self.dispatch(&buf[..n]),
                                Err(e) => {
                                    warn!(label = %label, error = %e, "Failed reading remote tail");
                                    break;
                                }
                            }
                        }
                    }
                    match child.wait().await {
                        Ok(status) => warn!(label = %label, host = %self.host, %status, "Remote tail exited"),
                        Err(e) => warn!(label = %label, error = %e, "Remote tail lost"),
                    }
                    replay = 0;
                    self.drop_fragment();
                }
                Err(e) => {
                    warn!(
                        label = %label,
                        program = %self.courier.context().ssh.program,
                        error = %e,
                        "Failed to spawn remote tail"
                    );
                }
            }

            tokio::time::sleep(respawn_delay).await;
            debug!(label = %label, "Respawning remote tail");
        }
    }

    /// The next process starts a fresh stream; a dead process's fragment
    /// must not prefix its first line
    fn drop_fragment(&self) {
        if let Some(listener) = self.slot.current() {
            listener.splitter().reset();
        }
    }

    fn dispatch(&self, chunk: &[u8]) {
        if let Some(listener) = self.slot.current() {
            listener.receive_data(chunk);
        }
    }
}
