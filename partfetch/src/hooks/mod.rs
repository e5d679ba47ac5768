//! Post-completion hook pipeline.
//!
//! Once a chunk's bytes are committed, its index is queued here and a
//! separate worker pool runs the configured command for it. Hook outcomes are
//! recorded in the [`StateStore`] and persisted; failures are logged and
//! counted but never fail the transfer. Chunks whose hook did not succeed are
//! resubmitted on the next run.

mod command;
mod runner;

pub use command::{HookCommand, Placeholders, BASE_PLACEHOLDER, INDEX_PLACEHOLDER, PART_PLACEHOLDER};
pub use runner::{HookOutput, HookRunner, ShellRunner};

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::StateStore;

/// Worker count used when hook concurrency is given as 0.
pub const DEFAULT_HOOK_CONCURRENCY: usize = 10;

/// Errors from a single hook execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// The shell could not be started.
    #[error("failed to start hook '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("hook '{command}' exited with status {status}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
}

/// Hook settings for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    /// Command template.
    pub command: HookCommand,
    /// Worker count; 0 selects [`DEFAULT_HOOK_CONCURRENCY`].
    pub concurrency: usize,
}

impl HookConfig {
    /// Effective number of hook workers.
    pub fn workers(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_HOOK_CONCURRENCY
        } else {
            self.concurrency
        }
    }
}

/// Outcome counts of a pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookReport {
    /// Hooks that exited successfully.
    pub succeeded: usize,
    /// Hooks that failed to start or exited unsuccessfully.
    pub failed: usize,
}

#[derive(Debug, Default)]
struct HookCounters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

struct HookWorker<R: HookRunner> {
    store: Arc<StateStore>,
    command: HookCommand,
    runner: Arc<R>,
    counters: HookCounters,
}

impl<R: HookRunner> HookWorker<R> {
    async fn run_one(&self, index: usize) {
        let part = self.store.complete_path(index);
        let placeholders = Placeholders::for_chunk(&part, index, &self.store.prefix());
        let line = self.command.render(&placeholders);

        info!(chunk = index, command = %line, "Running hook");

        let success = match self.runner.run(&line).await {
            Ok(output) => {
                if !output.output.is_empty() {
                    info!(chunk = index, output = %output.output, "Hook output");
                }
                info!(chunk = index, "Hook completed");
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                if let HookError::Failed { output, .. } = &e {
                    if !output.is_empty() {
                        warn!(chunk = index, output = %output, "Hook output");
                    }
                }
                warn!(chunk = index, error = %e, "Hook failed");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        };

        self.store.mark_hook_complete(index, success);
        if let Err(e) = self.store.save_async().await {
            warn!(chunk = index, error = %e, "Failed to save state after hook");
        }
    }
}

/// A running pool of hook workers fed by a queue of chunk indices.
pub struct HookPipeline<R: HookRunner> {
    sender: mpsc::Sender<usize>,
    workers: JoinSet<()>,
    worker: Arc<HookWorker<R>>,
}

impl<R: HookRunner> HookPipeline<R> {
    /// Spawn the pool. The queue holds one slot per chunk of `store`.
    ///
    /// After `cancel` fires, workers stop taking new indices; hooks already
    /// running are allowed to finish.
    pub fn start(
        store: Arc<StateStore>,
        config: &HookConfig,
        runner: Arc<R>,
        cancel: &CancellationToken,
    ) -> Self {
        let capacity = store.chunk_count().max(1);
        let (sender, receiver) = mpsc::channel::<usize>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let worker = Arc::new(HookWorker {
            store,
            command: config.command.clone(),
            runner,
            counters: HookCounters::default(),
        });

        let count = config.workers();
        debug!(workers = count, capacity, "Starting hook pipeline");

        let mut workers = JoinSet::new();
        for id in 0..count {
            let worker = Arc::clone(&worker);
            let receiver = Arc::clone(&receiver);
            let cancel = cancel.clone();
            workers.spawn(async move {
                loop {
                    let next = {
                        let mut receiver = receiver.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            index = receiver.recv() => index,
                        }
                    };
                    let Some(index) = next else {
                        break;
                    };
                    worker.run_one(index).await;
                }
                debug!(worker = id, "Hook worker exiting");
            });
        }

        Self {
            sender,
            workers,
            worker,
        }
    }

    /// A handle for submitting completed chunk indices.
    pub fn queue(&self) -> mpsc::Sender<usize> {
        self.sender.clone()
    }

    /// Close the queue and wait for every queued hook to finish.
    ///
    /// Every other [`queue`](Self::queue) handle must be dropped first, or
    /// this waits for them.
    pub async fn finish(self) -> HookReport {
        let Self {
            sender,
            mut workers,
            worker,
        } = self;
        drop(sender);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Hook worker task failed");
            }
        }

        let report = HookReport {
            succeeded: worker.counters.succeeded.load(Ordering::Relaxed),
            failed: worker.counters.failed.load(Ordering::Relaxed),
        };
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Hook pipeline finished"
        );
        report
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Hook runner that records commands instead of running them.

    use parking_lot::Mutex;

    use super::*;

    pub struct RecordingRunner {
        pub commands: Mutex<Vec<String>>,
        fail_containing: Option<String>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                fail_containing: None,
            }
        }

        /// Fail every command containing `needle`.
        pub fn failing_on(needle: &str) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                fail_containing: Some(needle.to_string()),
            }
        }

        pub fn sorted(&self) -> Vec<String> {
            let mut commands = self.commands.lock().clone();
            commands.sort();
            commands
        }
    }

    impl HookRunner for RecordingRunner {
        fn run<'a>(
            &'a self,
            command: &'a str,
        ) -> futures::future::BoxFuture<'a, Result<HookOutput, HookError>> {
            self.commands.lock().push(command.to_string());
            let fail = self
                .fail_containing
                .as_deref()
                .is_some_and(|needle| command.contains(needle));
            Box::pin(async move {
                if fail {
                    Err(HookError::Failed {
                        command: command.to_string(),
                        status: "1".to_string(),
                        output: String::new(),
                    })
                } else {
                    Ok(HookOutput::default())
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RecordingRunner;
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<StateStore> {
        let store = StateStore::create(dir.path(), "http://x/f.bin", 3000, 1000, "f.bin").unwrap();
        for index in 0..3 {
            store.mark_transfer_complete(index, 1000);
        }
        Arc::new(store)
    }

    fn config(template: &str, concurrency: usize) -> HookConfig {
        HookConfig {
            command: HookCommand::new(template).unwrap(),
            concurrency,
        }
    }

    #[test]
    fn test_zero_concurrency_uses_default() {
        assert_eq!(config("x", 0).workers(), DEFAULT_HOOK_CONCURRENCY);
        assert_eq!(config("x", 3).workers(), 3);
    }

    #[tokio::test]
    async fn test_pipeline_runs_and_records_hooks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runner = Arc::new(RecordingRunner::new());

        let pipeline = HookPipeline::start(
            Arc::clone(&store),
            &config("process {idx} {base}", 2),
            Arc::clone(&runner),
            &CancellationToken::new(),
        );
        let queue = pipeline.queue();
        for index in 0..3 {
            queue.try_send(index).unwrap();
        }
        drop(queue);

        let report = pipeline.finish().await;

        assert_eq!(report, HookReport { succeeded: 3, failed: 0 });
        assert_eq!(
            runner.sorted(),
            vec!["process 0 f.bin", "process 1 f.bin", "process 2 f.bin"]
        );
        assert!(store.pending_hooks().is_empty());

        let saved = StateStore::load(dir.path(), "f.bin").unwrap().unwrap();
        assert!(saved.pending_hooks().is_empty());
    }

    #[tokio::test]
    async fn test_failed_hook_stays_pending() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runner = Arc::new(RecordingRunner::failing_on("1"));

        let pipeline = HookPipeline::start(
            Arc::clone(&store),
            &config("run {idx}", 0),
            runner,
            &CancellationToken::new(),
        );
        let queue = pipeline.queue();
        for index in 0..3 {
            queue.try_send(index).unwrap();
        }
        drop(queue);

        let report = pipeline.finish().await;

        assert_eq!(report, HookReport { succeeded: 2, failed: 1 });
        assert_eq!(store.pending_hooks(), vec![1]);
    }

    #[tokio::test]
    async fn test_part_placeholder_points_at_complete_artifact() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runner = Arc::new(RecordingRunner::new());

        let pipeline = HookPipeline::start(
            Arc::clone(&store),
            &config("{part}", 1),
            Arc::clone(&runner),
            &CancellationToken::new(),
        );
        pipeline.queue().try_send(2).unwrap();
        pipeline.finish().await;

        let expected = dir.path().join("f.bin.000002.part");
        assert_eq!(runner.sorted(), vec![expected.to_string_lossy().into_owned()]);
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_takes_no_new_hooks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runner = Arc::new(RecordingRunner::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let pipeline = HookPipeline::start(
            Arc::clone(&store),
            &config("run {idx}", 2),
            Arc::clone(&runner),
            &cancel,
        );
        pipeline.queue().try_send(0).unwrap();
        let report = pipeline.finish().await;

        assert_eq!(report, HookReport::default());
        assert!(runner.sorted().is_empty());
        assert_eq!(store.pending_hooks(), vec![0, 1, 2]);
    }
}
