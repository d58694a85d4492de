//! Debounced ingest queue.
//!
//! Paths arrive in bursts (a multi-file drop, a shell launch per file,
//! forwarded command lines). [`IngestQueue::enqueue`] never blocks. Every
//! arrival restarts the debounce timer, and expansion runs on a blocking
//! thread, one enqueue at a time and in arrival order. Expanded files join a
//! deduplicated pending set. When the timer fires with no expansion
//! outstanding, the pending set is frozen into a [`Batch`] and handed to the
//! batch runner.
//!
//! Batches go through a channel of depth one to a single worker loop, and the
//! coordinator never dispatches while a batch is in flight. Paths arriving
//! while a batch runs keep accumulating; when the batch finishes a fresh
//! debounce cycle starts for them.
//!
//! ```text
//!  enqueue ──► expand (blocking, FIFO) ──► pending ──► debounce ──► worker ──► run_batch (blocking)
//!                                                 ▲                                   │
//!                                                 └────────── re-arm on done ◄────────┘
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::paths::path_key;
use crate::pipeline::{Batch, ReportSink, expand_paths, run_batch};
use crate::undo::UndoSession;

enum Command {
    Enqueue(Vec<PathBuf>),
    Shutdown,
}

enum Internal {
    Expanded(Vec<PathBuf>),
    BatchDone,
}

#[derive(Debug, Clone, Copy, Default)]
struct Status {
    /// Enqueue commands the coordinator has taken in.
    received: u64,
    /// Nothing pending, expanding or running.
    idle: bool,
}

/// Collects paths and runs them in debounced, non-overlapping batches.
///
/// Must be created inside a Tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use exif_strip::pipeline::BatchEvent;
/// use exif_strip::queue::IngestQueue;
/// use std::path::PathBuf;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn demo() {
/// let sink = Arc::new(|event: &BatchEvent| {
///     if let BatchEvent::Processed(result) = event {
///         println!("{result}");
///     }
/// });
/// let queue = IngestQueue::new(Duration::from_millis(150), None, sink);
/// queue.enqueue(vec![PathBuf::from("/photos/a.jpg")]);
/// queue.enqueue(vec![PathBuf::from("/photos/trip")]);
/// queue.wait_idle().await;
/// queue.shutdown().await;
/// # }
/// ```
pub struct IngestQueue {
    commands: mpsc::UnboundedSender<Command>,
    sent: AtomicU64,
    status: watch::Receiver<Status>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl IngestQueue {
    pub fn new(
        debounce: Duration,
        undo: Option<Arc<UndoSession>>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status {
            received: 0,
            idle: true,
        });

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (expand_tx, expand_rx) = mpsc::unbounded_channel();

        tokio::spawn(work(batch_rx, undo, sink, internal_tx.clone()));
        tokio::spawn(expand(expand_rx, internal_tx));
        let coordinator = Coordinator::new(debounce, batch_tx, status_tx, expand_tx, internal_rx);
        let handle = tokio::spawn(coordinator.run(command_rx));

        Self {
            commands,
            sent: AtomicU64::new(0),
            status,
            coordinator: Mutex::new(Some(handle)),
        }
    }

    /// Queue files and/or directories for stripping. Returns immediately.
    pub fn enqueue(&self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.commands.send(Command::Enqueue(paths)).is_err() {
            log::warn!("Ingest queue is shut down; dropping paths");
        }
    }

    /// Wait until everything enqueued so far has been expanded and processed.
    pub async fn wait_idle(&self) {
        let target = self.sent.load(Ordering::SeqCst);
        let mut status = self.status.clone();
        // An error means the coordinator is gone, which is idle too.
        let _ = status
            .wait_for(|s| s.received >= target && s.idle)
            .await;
    }

    /// Flush pending paths immediately, wait for the running batch and stop.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = match self.coordinator.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Ingest coordinator failed: {e}");
            }
        }
    }
}

/// Single worker loop: runs each batch to completion, then reports back.
async fn work(
    mut batches: mpsc::Receiver<Batch>,
    undo: Option<Arc<UndoSession>>,
    sink: Arc<dyn ReportSink>,
    done: mpsc::UnboundedSender<Internal>,
) {
    while let Some(batch) = batches.recv().await {
        let id = batch.id;
        let undo = undo.clone();
        let sink = Arc::clone(&sink);
        let run = tokio::task::spawn_blocking(move || {
            run_batch(&batch, undo.as_deref(), sink.as_ref());
        });
        if let Err(e) = run.await {
            log::error!("Batch {id} panicked: {e}");
        }
        if done.send(Internal::BatchDone).is_err() {
            break;
        }
    }
}

/// Expands enqueued paths one request at a time, so results land in
/// arrival order.
async fn expand(
    mut requests: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    done: mpsc::UnboundedSender<Internal>,
) {
    while let Some(paths) = requests.recv().await {
        let files = match tokio::task::spawn_blocking(move || expand_paths(&paths)).await {
            Ok(files) => files,
            Err(e) => {
                log::error!("Path expansion panicked: {e}");
                Vec::new()
            }
        };
        if done.send(Internal::Expanded(files)).is_err() {
            break;
        }
    }
}

struct Coordinator {
    debounce: Duration,
    batches: mpsc::Sender<Batch>,
    status: watch::Sender<Status>,
    expansions: mpsc::UnboundedSender<Vec<PathBuf>>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    pending: Vec<PathBuf>,
    pending_keys: HashSet<String>,
    deadline: Option<Instant>,
    expanding: usize,
    busy: bool,
    closing: bool,
    received: u64,
    next_batch: u64,
}

impl Coordinator {
    fn new(
        debounce: Duration,
        batches: mpsc::Sender<Batch>,
        status: watch::Sender<Status>,
        expansions: mpsc::UnboundedSender<Vec<PathBuf>>,
        internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) -> Self {
        Self {
            debounce,
            batches,
            status,
            expansions,
            internal_rx,
            pending: Vec::new(),
            pending_keys: HashSet::new(),
            deadline: None,
            expanding: 0,
            busy: false,
            closing: false,
            received: 0,
            next_batch: 1,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                cmd = commands.recv(), if !self.closing => match cmd {
                    Some(Command::Enqueue(paths)) => {
                        self.received += 1;
                        self.expand(paths);
                        self.arm();
                    }
                    Some(Command::Shutdown) | None => {
                        log::debug!("Ingest queue closing");
                        self.closing = true;
                    }
                },
                Some(event) = self.internal_rx.recv() => match event {
                    Internal::Expanded(files) => {
                        self.expanding -= 1;
                        self.add_pending(files);
                    }
                    Internal::BatchDone => {
                        self.busy = false;
                        if !self.pending.is_empty() {
                            self.arm();
                        }
                    }
                },
                _ = timer => {
                    self.deadline = None;
                    self.fire();
                }
            }

            if self.closing && !self.busy && self.expanding == 0 {
                if self.pending.is_empty() {
                    self.publish();
                    break;
                }
                self.deadline = None;
                self.fire();
            }
            self.publish();
        }
    }

    fn expand(&mut self, paths: Vec<PathBuf>) {
        if self.expansions.send(paths).is_err() {
            log::error!("Path expander unavailable, dropping paths");
            return;
        }
        self.expanding += 1;
    }

    fn add_pending(&mut self, files: Vec<PathBuf>) {
        let before = self.pending.len();
        for file in files {
            if self.pending_keys.insert(path_key(&file)) {
                self.pending.push(file);
            }
        }
        log::debug!(
            "Queued {} new file(s), {} pending",
            self.pending.len() - before,
            self.pending.len()
        );
        if !self.pending.is_empty() {
            self.arm();
        }
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.debounce);
    }

    fn fire(&mut self) {
        if self.busy || self.expanding > 0 || self.pending.is_empty() {
            // A finishing batch or a landing expansion re-arms the timer.
            return;
        }

        let batch = Batch {
            id: self.next_batch,
            files: std::mem::take(&mut self.pending),
        };
        self.pending_keys.clear();
        self.next_batch += 1;
        // Depth one plus the busy flag: the channel is always empty here.
        if let Err(e) = self.batches.try_send(batch) {
            log::error!("Batch worker unavailable, dropping batch: {e}");
            return;
        }
        self.busy = true;
    }

    fn publish(&self) {
        let idle = self.pending.is_empty() && self.expanding == 0 && !self.busy;
        self.status.send_replace(Status {
            received: self.received,
            idle,
        });
    }
}

/// Decode a path list forwarded by a second instance: UTF-16, one path per
/// line, `\r` and a trailing NUL tolerated. Only paths that exist are kept.
pub fn decode_forwarded_paths(payload: &[u16]) -> Vec<PathBuf> {
    String::from_utf16_lossy(payload)
        .split('\n')
        .map(|line| line.trim_end_matches(['\r', '\0']).trim())
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|p| Path::exists(p))
        .collect()
}

/// Encode paths for [`decode_forwarded_paths`].
pub fn encode_forwarded_paths<P: AsRef<Path>>(paths: &[P]) -> Vec<u16> {
    let joined = paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    joined.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BatchEvent;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tempfile::TempDir;

    const CLEAN_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

    type Events = Arc<Mutex<Vec<BatchEvent>>>;

    fn recording_sink() -> (Events, Arc<dyn ReportSink>) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let ev = Arc::clone(&events);
        let sink: Arc<dyn ReportSink> =
            Arc::new(move |e: &BatchEvent| ev.lock().unwrap().push(e.clone()));
        (events, sink)
    }

    fn started(events: &Events) -> Vec<(u64, usize)> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Started { batch, files, .. } => Some((*batch, *files)),
                _ => None,
            })
            .collect()
    }

    fn photos(dir: &TempDir, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let p = dir.path().join(format!("p{i}.jpg"));
                fs::write(&p, CLEAN_JPEG).unwrap();
                p
            })
            .collect()
    }

    // ── debounce ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn burst_within_window_is_one_batch() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 3);
        let (events, sink) = recording_sink();
        let queue = IngestQueue::new(Duration::from_millis(300), None, sink);

        for f in &files {
            queue.enqueue(vec![f.clone()]);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        queue.wait_idle().await;

        assert_eq!(started(&events), vec![(1, 3)]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn separate_enqueues_after_idle_are_separate_batches() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 2);
        let (events, sink) = recording_sink();
        let queue = IngestQueue::new(Duration::from_millis(50), None, sink);

        queue.enqueue(vec![files[0].clone()]);
        queue.wait_idle().await;
        queue.enqueue(vec![files[1].clone()]);
        queue.wait_idle().await;

        assert_eq!(started(&events), vec![(1, 1), (2, 1)]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn duplicates_in_window_are_queued_once() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 1);
        let (events, sink) = recording_sink();
        let queue = IngestQueue::new(Duration::from_millis(200), None, sink);

        queue.enqueue(vec![files[0].clone()]);
        queue.enqueue(vec![files[0].clone(), dir.path().to_path_buf()]);
        queue.wait_idle().await;

        assert_eq!(started(&events), vec![(1, 1)]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn nothing_to_expand_stays_idle() {
        let dir = TempDir::new().unwrap();
        let (events, sink) = recording_sink();
        let queue = IngestQueue::new(Duration::from_millis(50), None, sink);

        queue.enqueue(vec![dir.path().join("missing.jpg")]);
        queue.wait_idle().await;

        assert!(events.lock().unwrap().is_empty());
        queue.shutdown().await;
    }

    /// `subdirs` folders of `per_dir` clean photos under `dir/name`.
    fn photo_tree(dir: &TempDir, name: &str, subdirs: usize, per_dir: usize) -> PathBuf {
        let root = dir.path().join(name);
        for d in 0..subdirs {
            let sub = root.join(format!("d{d:03}"));
            fs::create_dir_all(&sub).unwrap();
            for i in 0..per_dir {
                fs::write(sub.join(format!("p{i:03}.jpg")), CLEAN_JPEG).unwrap();
            }
        }
        root
    }

    fn processed_paths(events: &Events) -> Vec<PathBuf> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Processed(r) => Some(r.path.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn slow_expansion_inside_window_joins_the_same_batch() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 1);
        let tree = photo_tree(&dir, "tree", 60, 200);
        let (events, sink) = recording_sink();
        let queue = IngestQueue::new(Duration::from_millis(40), None, sink);

        queue.enqueue(vec![files[0].clone()]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The walk outlasts the window; the timer must wait for it.
        queue.enqueue(vec![tree]);
        queue.wait_idle().await;

        assert_eq!(started(&events), vec![(1, 12001)]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn expansions_land_in_arrival_order() {
        let dir = TempDir::new().unwrap();
        let tree = photo_tree(&dir, "tree", 30, 50);
        let single = dir.path().join("a_single.jpg");
        fs::write(&single, CLEAN_JPEG).unwrap();
        let (events, sink) = recording_sink();
        let queue = IngestQueue::new(Duration::from_millis(300), None, sink);

        queue.enqueue(vec![tree.clone()]);
        queue.enqueue(vec![single.clone()]);
        queue.wait_idle().await;

        assert_eq!(started(&events), vec![(1, 1501)]);
        let order = processed_paths(&events);
        assert!(order[0].starts_with(&tree));
        assert_eq!(order.last(), Some(&single));
        queue.shutdown().await;
    }

    // ── single flight ────────────────────────────────────────────────

    #[tokio::test]
    async fn batches_never_overlap() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 2);

        let running = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let batches = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn ReportSink> = {
            let (running, overlaps, batches) =
                (Arc::clone(&running), Arc::clone(&overlaps), Arc::clone(&batches));
            Arc::new(move |e: &BatchEvent| match e {
                BatchEvent::Started { .. } => {
                    if running.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    batches.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(200));
                }
                BatchEvent::Finished(_) => running.store(false, Ordering::SeqCst),
                _ => {}
            })
        };
        let queue = IngestQueue::new(Duration::from_millis(30), None, sink);

        queue.enqueue(vec![files[0].clone()]);
        // Let the first batch start, then enqueue while it runs.
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.enqueue(vec![files[1].clone()]);
        queue.wait_idle().await;

        assert_eq!(batches.load(Ordering::SeqCst), 2);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_without_waiting() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 1);
        let (events, sink) = recording_sink();
        let queue = IngestQueue::new(Duration::from_secs(3600), None, sink);

        queue.enqueue(files.clone());
        queue.shutdown().await;

        assert_eq!(started(&events), vec![(1, 1)]);
    }

    // ── forwarded payloads ───────────────────────────────────────────

    #[test]
    fn decodes_forwarded_lines() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 2);
        let text = format!(
            "{}\r\n{}\r\n{}\0",
            files[0].display(),
            dir.path().join("missing.jpg").display(),
            files[1].display()
        );
        let payload: Vec<u16> = text.encode_utf16().collect();
        assert_eq!(decode_forwarded_paths(&payload), files);
    }

    #[test]
    fn forwarded_payload_round_trips() {
        let dir = TempDir::new().unwrap();
        let files = photos(&dir, 3);
        assert_eq!(decode_forwarded_paths(&encode_forwarded_paths(&files)), files);
        assert!(decode_forwarded_paths(&[]).is_empty());
    }
}
