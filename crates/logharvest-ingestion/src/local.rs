use crate::courier::{Courier, SourceContext};
use crate::history;
use logharvest_core::{LineSplitter, SourceError};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 64 * 1024;

/// A log file on this machine, tailed by size growth
pub struct LocalSource {
    courier: Courier,
    path: PathBuf,
    enabled: Arc<AtomicBool>,
    watch: Option<JoinHandle<()>>,
}

impl LocalSource {
    pub fn new(label: &str, path: PathBuf, ctx: Arc<SourceContext>) -> Self {
        Self {
            courier: Courier::new(label, ctx),
            path,
            enabled: Arc::new(AtomicBool::new(false)),
            watch: None,
        }
    }

    pub fn label(&self) -> &str {
        self.courier.label()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start tracking the file. Calling it again keeps the running watch.
    pub fn watch(&mut self) {
        if self.is_watching() {
            return;
        }

        let courier = self.courier.clone();
        let path = self.path.clone();
        let enabled = self.enabled.clone();
        self.watch = Some(tokio::spawn(async move {
            let tail = LocalTail::start(courier, path, enabled).await;
            tail.run().await;
        }));
    }

    /// Begin forwarding new lines
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Stop forwarding new lines; the watch keeps running
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn send_log(&self, msg: String) {
        self.courier.send_log(msg);
    }

    pub fn ping(&self) {
        self.courier.ping();
    }

    /// Answer with the last `history_length` bytes of the file, newest line first
    pub fn send_history(&self, client_id: Value, history_id: Value) -> JoinHandle<()> {
        let courier = self.courier.clone();
        let path = self.path.clone();
        tokio::spawn(async move {
            let ctx = courier.context();
            let lines =
                history::read_local(courier.label(), &path, ctx.history_length, ctx.encoding)
                    .await;
            courier.send_history(client_id, history_id, lines);
        })
    }
}

impl Drop for LocalSource {
    fn drop(&mut self) {
        if let Some(handle) = self.watch.take() {
            handle.abort();
        }
    }
}

/// State owned by the watch task: the size cursor and the line fragment
struct LocalTail {
    courier: Courier,
    path: PathBuf,
    enabled: Arc<AtomicBool>,
    cursor: u64,
    splitter: LineSplitter,
}

impl LocalTail {
    /// Begin at the current end of the file. A missing file counts as empty.
    async fn start(courier: Courier, path: PathBuf, enabled: Arc<AtomicBool>) -> Self {
        let cursor = current_size(&path).await;
        Self {
            courier,
            path,
            enabled,
            cursor,
            splitter: LineSplitter::new(),
        }
    }

    async fn run(mut self) {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(100);

        // Change notifications only trigger a size check; the poll tick below
        // covers platforms or filesystems where they never arrive.
        let _watcher = match self.file_watcher(tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(label = %self.courier.label(), error = %e, "Falling back to polling");
                None
            }
        };

        let mut ticker = tokio::time::interval(self.courier.context().poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    match event {
                        Ok(event) if self.concerns(&event) => self.check().await,
                        Ok(_) => {}
                        Err(e) => debug!(label = %self.courier.label(), error = %e, "File watch error"),
                    }
                }
                _ = ticker.tick() => self.check().await,
            }
        }
    }

    fn file_watcher(
        &self,
        tx: mpsc::Sender<notify::Result<Event>>,
    ) -> Result<RecommendedWatcher, SourceError> {
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                // Runs on the notify thread; a full queue only loses a
                // trigger, and the next poll tick catches up.
                let _ = tx.try_send(res);
            },
            Config::default(),
        )
        .map_err(|e| SourceError::Watch(format!("Failed to create file watcher: {}", e)))?;

        // Watch the directory so the file may be created or replaced later
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                SourceError::Watch(format!("Failed to watch {}: {}", dir.display(), e))
            })?;

        Ok(watcher)
    }

    fn concerns(&self, event: &Event) -> bool {
        event
            .paths
            .iter()
            .any(|p| p == &self.path || p.file_name() == self.path.file_name())
    }

    async fn check(&mut self) {
        let size = current_size(&self.path).await;
        self.observe(size).await;
    }

    /// React to the file now being `new_size` bytes long.
    ///
    /// Growth sends a ping and, while enabled, the completed lines. Any range
    /// that is skipped also drops the fragment so it never joins unrelated data.
    async fn observe(&mut self, new_size: u64) {
        if new_size < self.cursor {
            info!(
                label = %self.courier.label(),
                path = %self.path.display(),
                "File truncated, reading from start"
            );
            self.cursor = 0;
            self.splitter.reset();
        }
        if new_size == self.cursor {
            return;
        }

        let prev = self.cursor;
        self.cursor = new_size;

        if !self.courier.is_connected() {
            self.splitter.reset();
            return;
        }

        self.courier.ping();

        if !self.enabled.load(Ordering::SeqCst) {
            self.splitter.reset();
            return;
        }

        if let Err(e) = self.read_range(prev, new_size).await {
            warn!(label = %self.courier.label(), error = %e, "Failed to read new lines");
            self.splitter.reset();
        }
    }

    /// Read `[start, end)` and forward every completed line
    async fn read_range(&mut self, start: u64, end: u64) -> Result<(), SourceError> {
        let read_error = |e: std::io::Error| SourceError::Read {
            label: self.courier.label().to_string(),
            message: format!("{}: {}", self.path.display(), e),
        };

        let mut file = File::open(&self.path).await.map_err(read_error)?;
        file.seek(SeekFrom::Start(start)).await.map_err(read_error)?;
        let mut reader = file.take(end - start);

        let mut buf = vec![0u8; READ_CHUNK];
        let mut lines_sent = 0;
        loop {
            let n = reader.read(&mut buf).await.map_err(read_error)?;
            if n == 0 {
                break;
            }
            let encoding = self.courier.context().encoding;
            for line in self.splitter.push(&buf[..n]) {
                self.courier.send_log(encoding.decode(&line));
                lines_sent += 1;
            }
        }

        debug!(label = %self.courier.label(), lines = lines_sent, "Forwarded new lines");
        Ok(())
    }
}

async fn current_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, wait_for, RecordingOutbox};
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    async fn tail_for(outbox: &Arc<RecordingOutbox>, file: &NamedTempFile) -> (LocalTail, Arc<AtomicBool>) {
        let courier = Courier::new("app", context(outbox.clone()));
        let enabled = Arc::new(AtomicBool::new(false));
        let tail = LocalTail::start(courier, file.path().to_path_buf(), enabled.clone()).await;
        (tail, enabled)
    }

    fn append(file: &mut NamedTempFile, text: &str) -> u64 {
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
        std::fs::metadata(file.path()).unwrap().len()
    }

    #[tokio::test]
    async fn test_growth_delivers_complete_lines_and_keeps_fragment() {
        let outbox = RecordingOutbox::connected();
        let mut file = NamedTempFile::new().unwrap();
        let (mut tail, enabled) = tail_for(&outbox, &file).await;
        enabled.store(true, Ordering::SeqCst);
        assert_eq!(tail.cursor, 0);

        let size = append(&mut file, "alpha\nbeta\nga");
        tail.observe(size).await;
        assert_eq!(outbox.logs(), vec!["alpha", "beta"]);
        assert_eq!(tail.splitter.fragment(), b"ga");

        let size = append(&mut file, "mma\n");
        tail.observe(size).await;
        assert_eq!(outbox.logs(), vec!["alpha", "beta", "gamma"]);
        assert_eq!(outbox.ping_count(), 2);
    }

    #[tokio::test]
    async fn test_starts_at_end_of_existing_file() {
        let outbox = RecordingOutbox::connected();
        let mut file = NamedTempFile::new().unwrap();
        append(&mut file, "old line\n");
        let (mut tail, enabled) = tail_for(&outbox, &file).await;
        enabled.store(true, Ordering::SeqCst);
        assert_eq!(tail.cursor, 9);

        let size = append(&mut file, "new line\n");
        tail.observe(size).await;
        assert_eq!(outbox.logs(), vec!["new line"]);
    }

    #[tokio::test]
    async fn test_disabled_source_pings_but_sends_no_lines() {
        let outbox = RecordingOutbox::connected();
        let mut file = NamedTempFile::new().unwrap();
        let (mut tail, enabled) = tail_for(&outbox, &file).await;

        let size = append(&mut file, "hidden\npart");
        tail.observe(size).await;
        assert!(outbox.logs().is_empty());
        assert_eq!(outbox.ping_count(), 1);
        assert!(tail.splitter.fragment().is_empty());

        // Re-enabling picks up from the next append, without the stale fragment
        enabled.store(true, Ordering::SeqCst);
        let size = append(&mut file, "ial\nvisible\n");
        tail.observe(size).await;
        assert_eq!(outbox.logs(), vec!["ial", "visible"]);

        enabled.store(false, Ordering::SeqCst);
        let size = append(&mut file, "after disable\n");
        tail.observe(size).await;
        assert_eq!(outbox.logs(), vec!["ial", "visible"]);
        assert_eq!(outbox.ping_count(), 3);
    }

    #[tokio::test]
    async fn test_disconnected_growth_is_skipped() {
        let outbox = RecordingOutbox::connected();
        outbox.set_connected(false);
        let mut file = NamedTempFile::new().unwrap();
        let (mut tail, enabled) = tail_for(&outbox, &file).await;
        enabled.store(true, Ordering::SeqCst);

        let size = append(&mut file, "lost\n");
        tail.observe(size).await;
        assert!(outbox.sent().is_empty());
        assert_eq!(tail.cursor, size);

        outbox.set_connected(true);
        let size = append(&mut file, "kept\n");
        tail.observe(size).await;
        assert_eq!(outbox.logs(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_zero() {
        let outbox = RecordingOutbox::connected();
        let mut file = NamedTempFile::new().unwrap();
        let (mut tail, enabled) = tail_for(&outbox, &file).await;
        enabled.store(true, Ordering::SeqCst);

        let size = append(&mut file, "first run line\nfrag");
        tail.observe(size).await;
        assert_eq!(outbox.logs(), vec!["first run line"]);

        std::fs::write(file.path(), "rotated\n").unwrap();
        tail.observe(8).await;
        assert_eq!(outbox.logs(), vec!["first run line", "rotated"]);
        assert_eq!(tail.cursor, 8);
    }

    #[tokio::test]
    async fn test_unchanged_size_does_nothing() {
        let outbox = RecordingOutbox::connected();
        let mut file = NamedTempFile::new().unwrap();
        let (mut tail, _) = tail_for(&outbox, &file).await;
        let size = append(&mut file, "x\n");
        tail.observe(size).await;
        outbox.clear();

        tail.observe(size).await;
        assert!(outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_watch_task_follows_appends() {
        let outbox = RecordingOutbox::connected();
        let mut file = NamedTempFile::new().unwrap();
        let mut source = LocalSource::new("app", file.path().to_path_buf(), context(outbox.clone()));
        source.enable();
        source.watch();
        assert!(source.is_watching());

        // Let the task record the starting size before appending
        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&mut file, "one\ntwo\n");

        assert!(wait_for(Duration::from_secs(5), || outbox.logs().len() >= 2).await);
        assert_eq!(outbox.logs(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_send_history_reverses_lines() {
        let outbox = RecordingOutbox::connected();
        let mut file = NamedTempFile::new().unwrap();
        append(&mut file, "a\nb\nc\n");
        let source = LocalSource::new("app", file.path().to_path_buf(), context(outbox.clone()));

        source.send_history(json!("client-1"), json!(42)).await.unwrap();

        let histories = outbox.histories();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].lines, vec!["c", "b", "a"]);
        assert_eq!(histories[0].log_file, "app");
        assert_eq!(histories[0].client_id, json!("client-1"));
        assert_eq!(histories[0].history_id, json!(42));
        assert_eq!(histories[0].node, "web-01");
        assert!(histories[0].error.is_none());
    }

    #[tokio::test]
    async fn test_send_history_of_missing_file_answers_empty() {
        let outbox = RecordingOutbox::connected();
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSource::new("app", dir.path().join("missing.log"), context(outbox.clone()));

        source.send_history(json!(1), json!(2)).await.unwrap();

        let histories = outbox.histories();
        assert_eq!(histories.len(), 1);
        assert!(histories[0].lines.is_empty());
        assert!(histories[0].error.is_some());
    }

    #[test]
    fn test_send_log_counts_messages() {
        let outbox = RecordingOutbox::connected();
        let ctx = context(outbox.clone());
        let source = LocalSource::new("app", PathBuf::from("/tmp/x.log"), ctx.clone());
        source.send_log("hello".to_string());
        source.ping();

        assert_eq!(outbox.logs(), vec!["hello"]);
        assert_eq!(outbox.ping_count(), 1);
        assert_eq!(ctx.messages_sent.load(Ordering::Relaxed), 1);
    }
}
