//! Bounded worker pool driving the chunk transfers of one run.
//!
//! The dispatcher walks the plan in ascending index order and feeds a bounded
//! queue; a fixed number of workers drain it. Each chunk moves through
//!
//! ```text
//! Pending -> (complete artifact?) -> Skipped
//!         -> (partial artifact?)  -> Resuming -> Fetching -> Done
//!                                                       \-> Retry -> Fetching
//!                                                       \-> Failed
//! ```
//!
//! The first fatal chunk error cancels the run token so every sibling stops
//! at its next suspension point. The scheduler only returns once every worker
//! has unwound, and it persists the state before reporting any outcome.

mod retry;
mod worker;

pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetch::{FetchError, RangeFetcher};
use crate::progress::ProgressCounters;
use crate::state::{StateError, StateStore};
use crate::transport::RangeTransport;
use worker::{ChunkOutcome, ChunkWorker, WorkItem};

/// Default number of chunks in flight.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Errors that end a transfer run.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A chunk exhausted its retries. Other chunks' progress is kept.
    #[error("chunk {index} failed after {attempts} attempt(s): {source}")]
    ChunkFailed {
        index: usize,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    /// The run was cancelled before every chunk completed.
    #[error("transfer cancelled")]
    Cancelled,

    /// The state could not be persisted.
    #[error(transparent)]
    State(#[from] StateError),

    /// A local chunk artifact could not be inspected or renamed.
    #[error("chunk artifact {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Counts of what a completed run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Chunks whose bytes were fetched in this run.
    pub fetched: usize,
    /// Chunks found complete on disk and recorded without a request.
    pub skipped: usize,
    /// Completed chunks resubmitted for a pending hook.
    pub hooks_resubmitted: usize,
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum chunks in flight (minimum 1).
    pub concurrency: usize,
    /// Per-chunk retry policy.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    fetched: AtomicUsize,
    skipped: AtomicUsize,
    hooks_resubmitted: AtomicUsize,
    interrupted: AtomicBool,
}

impl RunCounters {
    fn record(&self, outcome: ChunkOutcome) {
        let counter = match outcome {
            ChunkOutcome::Fetched => &self.fetched,
            ChunkOutcome::Skipped => &self.skipped,
            ChunkOutcome::HookResubmitted => &self.hooks_resubmitted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            fetched: self.fetched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            hooks_resubmitted: self.hooks_resubmitted.load(Ordering::Relaxed),
        }
    }
}

/// Runs every outstanding chunk of a [`StateStore`] through a worker pool.
pub struct TransferScheduler<T: RangeTransport> {
    worker: ChunkWorker<T>,
    config: SchedulerConfig,
}

impl<T: RangeTransport> TransferScheduler<T> {
    /// Create a scheduler for the transfer recorded in `store`.
    pub fn new(
        transport: Arc<T>,
        store: Arc<StateStore>,
        progress: Arc<ProgressCounters>,
        config: SchedulerConfig,
    ) -> Self {
        let url = store.url();
        Self {
            worker: ChunkWorker {
                fetcher: RangeFetcher::new(transport),
                store,
                progress,
                retry: config.retry,
                url,
                hooks: None,
            },
            config: SchedulerConfig {
                concurrency: config.concurrency.max(1),
                ..config
            },
        }
    }

    /// Hand every completed chunk index to `queue`, and resubmit chunks whose
    /// hook is still pending.
    ///
    /// The queue should hold at least one slot per chunk so workers never
    /// block on it.
    pub fn with_hook_queue(mut self, queue: mpsc::Sender<usize>) -> Self {
        self.worker.hooks = Some(queue);
        self
    }

    /// Transfer every outstanding chunk.
    ///
    /// Consumes the scheduler so the hook queue sender is dropped when the
    /// run ends. State is saved before any result is returned.
    pub async fn run(self, cancel: &CancellationToken) -> Result<TransferSummary, TransferError> {
        let token = cancel.child_token();
        let store = Arc::clone(&self.worker.store);
        let items = self.work_items();
        let concurrency = self.config.concurrency.min(items.len()).max(1);

        info!(
            chunks = store.chunk_count(),
            outstanding = items.len(),
            concurrency,
            "Starting transfer"
        );

        let (tx, rx) = mpsc::channel::<WorkItem>(concurrency);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let worker = Arc::new(self.worker);
        let counters = Arc::new(RunCounters::default());
        let first_error: Arc<Mutex<Option<TransferError>>> = Arc::new(Mutex::new(None));

        let mut workers = JoinSet::new();
        for id in 0..concurrency {
            workers.spawn(worker_loop(
                id,
                Arc::clone(&worker),
                Arc::clone(&rx),
                token.clone(),
                Arc::clone(&counters),
                Arc::clone(&first_error),
            ));
        }
        drop(rx);

        for item in items {
            let index = item.index();
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(chunk = index, "Dispatch stopped by cancellation");
                    counters.interrupted.store(true, Ordering::SeqCst);
                    break;
                }
                sent = tx.send(item) => {
                    if sent.is_err() {
                        debug!(chunk = index, "All workers gone, dispatch stopped");
                        counters.interrupted.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Transfer worker task failed");
                token.cancel();
                first_error
                    .lock()
                    .get_or_insert(TransferError::Worker(e.to_string()));
            }
        }
        drop(worker);

        let save_result = store.save_async().await;

        if let Some(err) = first_error.lock().take() {
            if let Err(save_err) = save_result {
                warn!(error = %save_err, "Failed to save state after chunk failure");
            }
            return Err(err);
        }
        save_result?;

        if counters.interrupted.load(Ordering::SeqCst) {
            info!(
                completed = store.completed_count(),
                chunks = store.chunk_count(),
                "Transfer interrupted, progress saved"
            );
            return Err(TransferError::Cancelled);
        }

        let summary = counters.summary();
        info!(
            fetched = summary.fetched,
            skipped = summary.skipped,
            hooks_resubmitted = summary.hooks_resubmitted,
            "Transfer finished"
        );
        Ok(summary)
    }

    /// Outstanding work in ascending index order.
    fn work_items(&self) -> Vec<WorkItem> {
        let hooks_enabled = self.worker.hooks.is_some();
        self.worker
            .store
            .snapshot()
            .chunks
            .iter()
            .filter_map(|chunk| {
                if !chunk.completed {
                    Some(WorkItem::Fetch(chunk.range()))
                } else if hooks_enabled && !chunk.post_part_completed {
                    Some(WorkItem::HookOnly(chunk.index))
                } else {
                    None
                }
            })
            .collect()
    }
}

async fn worker_loop<T: RangeTransport>(
    id: usize,
    worker: Arc<ChunkWorker<T>>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    token: CancellationToken,
    counters: Arc<RunCounters>,
    first_error: Arc<Mutex<Option<TransferError>>>,
) {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = queue.recv() => item,
            }
        };
        let Some(item) = next else {
            break;
        };

        match worker.process(item, &token).await {
            Ok(outcome) => counters.record(outcome),
            Err(TransferError::Cancelled) => {
                counters.interrupted.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                error!(worker = id, error = %e, "Fatal chunk error, cancelling run");
                first_error.lock().get_or_insert(e);
                token.cancel();
                break;
            }
        }
    }

    if token.is_cancelled() {
        counters.interrupted.store(true, Ordering::SeqCst);
    }
    debug!(worker = id, "Transfer worker exiting");
}
