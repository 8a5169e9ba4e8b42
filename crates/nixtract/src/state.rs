//! Shared state owned by the traversal coordinator.
//!
//! Section 3 ("Ownership"): the coordinator exclusively owns the queue,
//! the two/three dedup sets, and the output stream with its write lock.
//! Worker and reader tasks only ever see `Arc`-shared handles into this
//! state; every mutation goes through a thread-safe container.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// A concurrent set with an atomic add-if-absent primitive.
///
/// Section 5: "The check-then-add on `queued_output_paths` must be
/// atomic... an implementation must use an atomic add-if-absent." A
/// short `std::sync::Mutex` critical section satisfies that; none of
/// the call sites hold the lock across an `.await`.
#[derive(Debug, Default)]
pub struct DedupSet {
    inner: Mutex<HashSet<String>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key` if it is not already present. Returns `true` when
    /// this call performed the insertion (the key was new).
    pub fn insert_if_absent(&self, key: &str) -> bool {
        let mut set = self.inner.lock().unwrap();
        set.insert(key.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The JSONL output stream, guarded by a single write lock so that
/// each record's bytes and trailing newline land contiguously (I5).
pub struct OutputSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

impl OutputSink {
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(io::stdout()))
    }

    pub fn file(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Write one record's bytes followed by a newline, as a single
    /// critical section under the write lock.
    pub fn write_record(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(bytes)?;
        writer.write_all(b"\n")
    }
}

impl OutputSink {
    #[cfg(test)]
    pub fn from_vec() -> (Self, Arc<Mutex<Vec<u8>>>) {
        struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);
        impl Write for SharedVecWriter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Self::from_writer(Box::new(SharedVecWriter(buf.clone())));
        (sink, buf)
    }
}

/// Shared, cross-task state for one extraction run.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub queue_tx: UnboundedSender<String>,
    /// Items sent minus items dequeued. `UnboundedReceiver` has no `len()`,
    /// so the drive loop needs this to evaluate "queue is non-empty"
    /// independent of whether its last dequeue attempt returned an item.
    queue_len: Arc<AtomicUsize>,
    pub queued_output_paths: Arc<DedupSet>,
    pub visited_output_paths: Arc<DedupSet>,
    pub attempted_attribute_paths: Arc<DedupSet>,
    pub output: Arc<OutputSink>,
}

impl SharedState {
    pub fn new(output: OutputSink) -> (Self, UnboundedReceiver<String>) {
        let (queue_tx, queue_rx) = tokio::sync::mpsc::unbounded_channel();
        let state = Self {
            queue_tx,
            queue_len: Arc::new(AtomicUsize::new(0)),
            queued_output_paths: Arc::new(DedupSet::new()),
            visited_output_paths: Arc::new(DedupSet::new()),
            attempted_attribute_paths: Arc::new(DedupSet::new()),
            output: Arc::new(output),
        };
        (state, queue_rx)
    }

    /// Enqueue `attribute_path` unconditionally (used for the initial root path).
    pub fn enqueue(&self, attribute_path: &str) {
        if self.queue_tx.send(attribute_path.to_string()).is_ok() {
            self.queue_len.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record that the coordinator pulled one item off the queue.
    pub fn mark_dequeued(&self) {
        self.queue_len.fetch_sub(1, Ordering::SeqCst);
    }

    /// Whether any enqueued item has not yet been dequeued.
    pub fn queue_is_empty(&self) -> bool {
        self.queue_len.load(Ordering::SeqCst) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_set_insert_if_absent_only_wins_once() {
        let set = DedupSet::new();
        assert!(set.insert_if_absent("a"));
        assert!(!set.insert_if_absent("a"));
        assert!(set.insert_if_absent("b"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn dedup_set_contains_reflects_inserts() {
        let set = DedupSet::new();
        assert!(!set.contains("a"));
        set.insert_if_absent("a");
        assert!(set.contains("a"));
    }

    #[test]
    fn output_sink_writes_record_plus_newline() {
        let (sink, buf) = OutputSink::from_vec();
        sink.write_record(b"{\"a\":1}").unwrap();
        sink.write_record(b"{\"b\":2}").unwrap();
        let contents = buf.lock().unwrap().clone();
        assert_eq!(contents, b"{\"a\":1}\n{\"b\":2}\n".to_vec());
    }

    #[test]
    fn output_sink_file_writes_records_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let sink = OutputSink::file(&path).unwrap();
        sink.write_record(b"{\"a\":1}").unwrap();
        sink.write_record(b"{\"b\":2}").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"a\":1}\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn shared_state_enqueue_delivers_to_receiver() {
        let (state, mut rx) = SharedState::new(OutputSink::from_vec().0);
        state.enqueue("root.child");
        let received = rx.recv().await.unwrap();
        assert_eq!(received, "root.child");
    }

    #[tokio::test]
    async fn queue_len_tracks_enqueue_and_dequeue() {
        let (state, mut rx) = SharedState::new(OutputSink::from_vec().0);
        assert!(state.queue_is_empty());

        state.enqueue("a");
        state.enqueue("b");
        assert!(!state.queue_is_empty());

        rx.recv().await.unwrap();
        state.mark_dequeued();
        assert!(!state.queue_is_empty());

        rx.recv().await.unwrap();
        state.mark_dequeued();
        assert!(state.queue_is_empty());
    }
}
