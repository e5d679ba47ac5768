//! Progress reporting for chunked transfers.
//!
//! Workers update lock-free atomic counters; a reporter task polls them on an
//! interval and hands a [`ProgressSnapshot`] to a callback. The callback never
//! runs on a worker, so slow rendering cannot stall a transfer.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::state::TransferState;

/// Default interval between progress reports.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback invoked by the reporter with the latest snapshot.
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Point-in-time view of a transfer's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes on disk across all chunks, including earlier sessions.
    pub bytes_done: u64,
    /// Total bytes of the resource.
    pub total_bytes: u64,
    /// Bytes received over the network in this session.
    pub session_bytes: u64,
    /// Chunks whose transfer is complete.
    pub chunks_completed: usize,
    /// Number of chunks in the plan.
    pub total_chunks: usize,
}

/// Shared progress counters for one transfer.
#[derive(Debug)]
pub struct ProgressCounters {
    chunk_bytes: Vec<AtomicU64>,
    chunks_completed: AtomicUsize,
    session_bytes: AtomicU64,
    total_bytes: u64,
    done: AtomicBool,
}

impl ProgressCounters {
    /// Counters for a fresh transfer of `total_bytes` in `total_chunks` chunks.
    pub fn new(total_chunks: usize, total_bytes: u64) -> Self {
        Self {
            chunk_bytes: (0..total_chunks).map(|_| AtomicU64::new(0)).collect(),
            chunks_completed: AtomicUsize::new(0),
            session_bytes: AtomicU64::new(0),
            total_bytes,
            done: AtomicBool::new(false),
        }
    }

    /// Counters seeded with what a (possibly reloaded) state already records.
    pub fn from_state(state: &TransferState) -> Self {
        let counters = Self::new(state.chunks.len(), state.total_size);
        for chunk in &state.chunks {
            let bytes = if chunk.completed {
                chunk.len()
            } else {
                chunk.downloaded
            };
            counters.chunk_bytes[chunk.index].store(bytes, Ordering::Relaxed);
        }
        counters
            .chunks_completed
            .store(state.completed_count, Ordering::Relaxed);
        counters
    }

    /// Record `bytes` freshly received for a chunk.
    pub fn add_bytes(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.chunk_bytes.get(index) {
            counter.fetch_add(bytes, Ordering::Relaxed);
            self.session_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Set how many bytes of a chunk are on disk without counting them as
    /// session traffic (used when resuming from an existing artifact).
    pub fn set_chunk_bytes(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.chunk_bytes.get(index) {
            counter.store(bytes, Ordering::Relaxed);
        }
    }

    /// Mark a chunk complete with its final byte count.
    pub fn mark_completed(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.chunk_bytes.get(index) {
            counter.store(bytes, Ordering::Relaxed);
            self.chunks_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Bytes on disk for a chunk.
    pub fn chunk_bytes(&self, index: usize) -> u64 {
        self.chunk_bytes
            .get(index)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current aggregated view.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_done: self
                .chunk_bytes
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .sum(),
            total_bytes: self.total_bytes,
            session_bytes: self.session_bytes.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            total_chunks: self.chunk_bytes.len(),
        }
    }

    /// Signal the reporter to emit a final snapshot and stop.
    pub fn signal_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Whether [`signal_done`](Self::signal_done) was called.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Background task that polls [`ProgressCounters`] and reports snapshots.
pub struct ProgressReporter {
    handle: JoinHandle<()>,
    counters: Arc<ProgressCounters>,
}

impl ProgressReporter {
    /// Spawn a reporter on the current tokio runtime.
    pub fn start(
        counters: Arc<ProgressCounters>,
        callback: ProgressCallback,
        poll_interval: Duration,
    ) -> Self {
        let polled = Arc::clone(&counters);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            while !polled.is_done() {
                ticker.tick().await;
                callback(polled.snapshot());
            }
            callback(polled.snapshot());
        });

        Self { handle, counters }
    }

    /// Spawn a reporter with [`DEFAULT_POLL_INTERVAL`].
    pub fn start_default(counters: Arc<ProgressCounters>, callback: ProgressCallback) -> Self {
        Self::start(counters, callback, DEFAULT_POLL_INTERVAL)
    }

    /// Stop the reporter after one final report.
    pub async fn stop(self) {
        self.counters.signal_done();
        self.handle.await.ok();
    }
}
