//! Resumable download entry point.
//!
//! [`Downloader`] composes the pieces of a run: it resolves the name prefix,
//! loads or creates the durable state, probes the resource size, drives the
//! [`TransferScheduler`] together with the optional hook pipeline, and
//! finally removes the state file (or keeps it while hooks are pending) and
//! optionally merges the artifacts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use partfetch::download::{DownloadOutcome, DownloadRequest, Downloader};
//! use partfetch::transport::{ReqwestTransport, TransportConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ReqwestTransport::new(&TransportConfig::default())?);
//! let downloader = Downloader::new(transport);
//!
//! let mut request = DownloadRequest::new("https://example.com/file.iso");
//! request.concurrency = 4;
//!
//! match downloader.download(&request, &CancellationToken::new()).await? {
//!     DownloadOutcome::Completed(report) => println!("done: {}", report.prefix),
//!     DownloadOutcome::Interrupted { .. } => println!("interrupted, rerun to resume"),
//! }
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::format_size;
use crate::hooks::{HookConfig, HookPipeline, HookReport, HookRunner, ShellRunner};
use crate::merge::{MergeError, MergeOptions, MergeReport, Merger};
use crate::plan::PlanError;
use crate::progress::{ProgressCallback, ProgressCounters, ProgressReporter};
use crate::scheduler::{
    RetryPolicy, SchedulerConfig, TransferError, TransferScheduler, TransferSummary,
    DEFAULT_CONCURRENCY,
};
use crate::state::{naming, StateError, StateStore};
use crate::transport::{RangeTransport, TransportError};

/// Default chunk size (100 MB).
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1000 * 1000;

/// Errors that abort a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The requested chunk plan is invalid.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The size probe failed.
    #[error("failed to determine content length: {0}")]
    Probe(#[source] TransportError),

    /// The state could not be loaded, validated or persisted.
    #[error(transparent)]
    State(#[from] StateError),

    /// A chunk failed fatally or the run could not be completed.
    #[error(transparent)]
    Transfer(TransferError),

    /// Merging after the download failed.
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    /// A background merge task panicked or was cancelled.
    #[error("merge task failed: {0}")]
    Task(String),

    /// The output directory or stale artifacts could not be prepared.
    #[error("failed to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Everything needed to run one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Resource URL.
    pub url: String,
    /// Bytes per chunk for a fresh plan. A resumed state keeps its own.
    pub chunk_size: u64,
    /// Chunks in flight.
    pub concurrency: usize,
    /// Retries per chunk after the first attempt.
    pub max_retries: u32,
    /// Discard existing state and artifacts and start over.
    pub force_restart: bool,
    /// Known total size; skips the probe.
    pub total_size: Option<u64>,
    /// Optional post-completion hook.
    pub hook: Option<HookConfig>,
    /// Directory for artifacts, the state file and the merged output.
    pub output_dir: PathBuf,
    /// Merge the artifacts into `<output_dir>/<prefix>` once complete.
    pub merge_after: bool,
}

impl DownloadRequest {
    /// Request with default settings for `url` into the current directory.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: RetryPolicy::default().max_retries,
            force_restart: false,
            total_size: None,
            hook: None,
            output_dir: PathBuf::from("."),
            merge_after: false,
        }
    }

    /// Artifact name prefix derived from the URL.
    pub fn prefix(&self) -> String {
        naming::prefix_from_url(&self.url)
    }
}

/// Summary of a completed download.
#[derive(Debug)]
pub struct DownloadReport {
    /// Artifact name prefix.
    pub prefix: String,
    /// Resource size in bytes.
    pub total_size: u64,
    /// Number of chunks in the plan.
    pub chunks: usize,
    /// What the scheduler did in this run.
    pub transfer: TransferSummary,
    /// Hook outcomes, when a hook was configured.
    pub hooks: Option<HookReport>,
    /// The state file was kept because some hooks are still pending.
    pub state_retained: bool,
    /// Merge results, when merging was requested.
    pub merged: Option<MergeReport>,
}

/// How a download ended without error.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Every chunk is on disk.
    Completed(DownloadReport),
    /// Cancelled; progress was saved and a rerun resumes.
    Interrupted {
        /// Chunks complete at the time of the interruption.
        completed_chunks: usize,
        /// Number of chunks in the plan.
        total_chunks: usize,
    },
}

/// Runs resumable chunked downloads over a [`RangeTransport`].
pub struct Downloader<T: RangeTransport, R: HookRunner = ShellRunner> {
    transport: Arc<T>,
    runner: Arc<R>,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl<T: RangeTransport> Downloader<T, ShellRunner> {
    /// Downloader running hooks through the platform shell.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            runner: Arc::new(ShellRunner),
            retry: RetryPolicy::default(),
            progress: None,
        }
    }
}

impl<T: RangeTransport, R: HookRunner> Downloader<T, R> {
    /// Use a different hook runner.
    pub fn with_runner<R2: HookRunner>(self, runner: Arc<R2>) -> Downloader<T, R2> {
        Downloader {
            transport: self.transport,
            runner,
            retry: self.retry,
            progress: self.progress,
        }
    }

    /// Override the backoff timing. The retry count still comes from the
    /// request.
    pub fn with_backoff(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Receive periodic progress snapshots while a download runs.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run (or resume) the download described by `request`.
    ///
    /// Cancelling `cancel` stops the run cooperatively; the saved state lets
    /// a later call with the same request resume.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let dir = request.output_dir.as_path();
        let prefix = request.prefix();

        if request.chunk_size == 0 {
            return Err(PlanError::InvalidChunkSize(0).into());
        }
        if request.total_size == Some(0) {
            return Err(PlanError::InvalidTotalSize(0).into());
        }

        fs::create_dir_all(dir).map_err(|source| DownloadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let existing = if request.force_restart {
            let removed = clean_artifacts(dir, &prefix)?;
            if removed > 0 {
                info!(prefix = %prefix, removed, "Forced restart, removed previous artifacts");
            }
            None
        } else {
            StateStore::load(dir, &prefix)?
        };

        let total_size = match request.total_size {
            Some(size) => size,
            None => {
                let probe = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Ok(DownloadOutcome::Interrupted {
                            completed_chunks: existing.as_ref().map_or(0, |s| s.completed_count()),
                            total_chunks: existing.as_ref().map_or(0, |s| s.chunk_count()),
                        });
                    }
                    probe = self.transport.content_length(&request.url) => probe,
                };
                probe.map_err(DownloadError::Probe)?
            }
        };

        let store = match existing {
            Some(store) => {
                store.ensure_matches(&request.url, total_size)?;
                info!(
                    prefix = %prefix,
                    completed = store.completed_count(),
                    chunks = store.chunk_count(),
                    "Resuming from saved state"
                );
                store
            }
            None => {
                StateStore::create(dir, &request.url, total_size, request.chunk_size, &prefix)?
            }
        };
        let store = Arc::new(store);
        store.save_async().await?;

        let state = store.snapshot();
        info!(
            url = %request.url,
            prefix = %prefix,
            size = %format_size(total_size),
            chunk_size = %format_size(state.chunk_size),
            chunks = state.chunks.len(),
            jobs = request.concurrency,
            "Starting download"
        );

        let counters = Arc::new(ProgressCounters::from_state(&state));
        let reporter = self.progress.as_ref().map(|callback| {
            ProgressReporter::start_default(Arc::clone(&counters), Arc::clone(callback))
        });

        let pipeline = request.hook.as_ref().map(|hook| {
            HookPipeline::start(Arc::clone(&store), hook, Arc::clone(&self.runner), cancel)
        });

        let mut scheduler = TransferScheduler::new(
            Arc::clone(&self.transport),
            Arc::clone(&store),
            Arc::clone(&counters),
            SchedulerConfig {
                concurrency: request.concurrency,
                retry: RetryPolicy {
                    max_retries: request.max_retries,
                    ..self.retry
                },
            },
        );
        if let Some(pipeline) = &pipeline {
            scheduler = scheduler.with_hook_queue(pipeline.queue());
        }

        let result = scheduler.run(cancel).await;

        let hooks = match pipeline {
            Some(pipeline) => {
                if result.is_ok() {
                    info!("Waiting for hooks to complete");
                }
                Some(pipeline.finish().await)
            }
            None => None,
        };

        if let Some(reporter) = reporter {
            reporter.stop().await;
        }

        let transfer = match result {
            Ok(summary) => summary,
            Err(TransferError::Cancelled) => {
                return Ok(DownloadOutcome::Interrupted {
                    completed_chunks: store.completed_count(),
                    total_chunks: store.chunk_count(),
                });
            }
            Err(e) => return Err(DownloadError::Transfer(e)),
        };

        let pending = store.pending_hooks();
        let state_retained = request.hook.is_some() && !pending.is_empty();
        if state_retained {
            store.save_async().await?;
            warn!(
                pending = pending.len(),
                path = %store.path().display(),
                "Some hooks did not succeed, keeping state file so they rerun next time"
            );
        } else {
            store.delete()?;
            debug!(path = %store.path().display(), "Removed state file");
        }

        info!(prefix = %prefix, size = %format_size(total_size), "Download complete");

        let merged = if request.merge_after {
            Some(merge_prefix(dir, &prefix).await?)
        } else {
            None
        };

        Ok(DownloadOutcome::Completed(DownloadReport {
            prefix,
            total_size,
            chunks: state.chunks.len(),
            transfer,
            hooks,
            state_retained,
            merged,
        }))
    }
}

/// Merge `<dir>/<prefix>.*.part` into `<dir>/<prefix>` on the blocking pool.
async fn merge_prefix(dir: &Path, prefix: &str) -> Result<MergeReport, DownloadError> {
    let merger = Merger::new(MergeOptions::for_prefix(dir, prefix));
    let mut report = tokio::task::spawn_blocking(move || merger.merge())
        .await
        .map_err(|e| DownloadError::Task(e.to_string()))??;

    if let Some(position) = report.groups.iter().position(|g| g.result.is_err()) {
        let failed = report.groups.swap_remove(position);
        if let Err(e) = failed.result {
            return Err(DownloadError::Merge(e));
        }
    }
    Ok(report)
}

/// Remove the state file and every partial and complete artifact of `prefix`.
///
/// Returns the number of files removed.
fn clean_artifacts(dir: &Path, prefix: &str) -> Result<usize, DownloadError> {
    let mut targets = vec![naming::state_file_path(dir, prefix)];

    for pattern in [
        naming::partial_pattern(dir, prefix),
        naming::complete_pattern(dir, prefix),
    ] {
        let entries = glob::glob(&pattern).map_err(|e| DownloadError::Io {
            path: PathBuf::from(&pattern),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })?;
        targets.extend(entries.filter_map(Result::ok));
    }

    let mut removed = 0;
    for path in targets {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(DownloadError::Io { path, source }),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::mock::RecordingRunner;
    use crate::hooks::HookCommand;
    use crate::transport::mock::{Behavior, MockTransport};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    const URL: &str = "http://example.com/files/data.bin?sig=1";

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn request(dir: &TempDir) -> DownloadRequest {
        DownloadRequest {
            chunk_size: 1000,
            max_retries: 0,
            output_dir: dir.path().to_path_buf(),
            ..DownloadRequest::new(URL)
        }
    }

    fn downloader(mock: &Arc<MockTransport>) -> Downloader<MockTransport> {
        Downloader::new(Arc::clone(mock)).with_backoff(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
    }

    fn completed(outcome: DownloadOutcome) -> DownloadReport {
        match outcome {
            DownloadOutcome::Completed(report) => report,
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_and_merge() {
        let dir = TempDir::new().unwrap();
        let bytes = data(2500);
        let mock = Arc::new(MockTransport::new(bytes.clone()));

        let mut request = request(&dir);
        request.concurrency = 3;
        request.merge_after = true;

        let report = completed(
            downloader(&mock)
                .download(&request, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(report.prefix, "data.bin");
        assert_eq!(report.chunks, 3);
        assert_eq!(report.transfer.fetched, 3);
        assert!(!report.state_retained);
        assert!(report.merged.unwrap().is_success());
        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), bytes);
        assert!(!naming::state_file_path(dir.path(), "data.bin").exists());
        assert_eq!(mock.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_merge_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::new(data(2500)));
        std::fs::create_dir(dir.path().join("data.bin")).unwrap();

        let mut request = request(&dir);
        request.merge_after = true;

        let err = downloader(&mock)
            .download(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Merge(MergeError::Write { .. })));
        for index in 0..3 {
            assert!(dir.path().join(naming::complete_name("data.bin", index)).exists());
        }
    }

    #[tokio::test]
    async fn test_explicit_size_skips_probe() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::new(data(1500)));

        let mut request = request(&dir);
        request.total_size = Some(1500);

        completed(
            downloader(&mock)
                .download(&request, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(mock.probes.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("data.bin.000001.part").exists());
    }

    #[tokio::test]
    async fn test_failed_run_resumes_without_refetching() {
        let dir = TempDir::new().unwrap();
        let bytes = data(3000);

        let failing = Arc::new(
            MockTransport::new(bytes.clone()).on_start(2000, vec![Behavior::Status(503)]),
        );
        let err = downloader(&failing)
            .download(&request(&dir), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Transfer(TransferError::ChunkFailed { index: 2, .. })
        ));
        assert!(naming::state_file_path(dir.path(), "data.bin").exists());

        let healthy = Arc::new(MockTransport::new(bytes));
        let report = completed(
            downloader(&healthy)
                .download(&request(&dir), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(healthy.recorded(), vec![(2000, 2999)]);
        assert_eq!(report.transfer.fetched, 1);
    }

    #[tokio::test]
    async fn test_mismatched_state_is_rejected_unless_forced() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::create(dir.path(), URL, 999, 1000, "data.bin").unwrap();
        store.save().unwrap();
        std::fs::write(dir.path().join("data.bin.000000.part"), b"stale").unwrap();

        let mock = Arc::new(MockTransport::new(data(2000)));
        let err = downloader(&mock)
            .download(&request(&dir), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::State(StateError::Mismatch { .. })));

        let mut forced = request(&dir);
        forced.force_restart = true;
        let report = completed(
            downloader(&mock)
                .download(&forced, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(report.transfer.fetched, 2);
        assert_eq!(
            std::fs::read(dir.path().join("data.bin.000000.part")).unwrap().len(),
            1000
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::new(data(2000)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut request = request(&dir);
        request.total_size = Some(2000);

        let outcome = downloader(&mock).download(&request, &cancel).await.unwrap();

        assert!(matches!(
            outcome,
            DownloadOutcome::Interrupted {
                completed_chunks: 0,
                total_chunks: 2
            }
        ));
        assert!(naming::state_file_path(dir.path(), "data.bin").exists());
    }

    #[tokio::test]
    async fn test_pending_hooks_keep_state_and_rerun() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::new(data(2000)));

        let mut request = request(&dir);
        request.hook = Some(HookConfig {
            command: HookCommand::new("process {base} {idx}").unwrap(),
            concurrency: 2,
        });

        let failing = Arc::new(RecordingRunner::failing_on(" 1"));
        let report = completed(
            downloader(&mock)
                .with_runner(Arc::clone(&failing))
                .download(&request, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert!(report.state_retained);
        assert_eq!(report.hooks, Some(HookReport { succeeded: 1, failed: 1 }));
        assert!(naming::state_file_path(dir.path(), "data.bin").exists());

        let healthy = Arc::new(RecordingRunner::new());
        let report = completed(
            downloader(&mock)
                .with_runner(Arc::clone(&healthy))
                .download(&request, &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert!(!report.state_retained);
        assert_eq!(report.transfer.hooks_resubmitted, 1);
        assert_eq!(healthy.sorted(), vec!["process data.bin 1"]);
        assert!(!naming::state_file_path(dir.path(), "data.bin").exists());
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_plan_error() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTransport::new(data(10)));

        let mut request = request(&dir);
        request.chunk_size = 0;

        let err = downloader(&mock)
            .download(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::Plan(PlanError::InvalidChunkSize(0))
        ));
        assert_eq!(mock.probes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clean_artifacts() {
        let dir = TempDir::new().unwrap();
        for name in [
            "f.000000.part",
            "f.000001.tmp",
            ".f-state.json",
            "g.000000.part",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        assert_eq!(clean_artifacts(dir.path(), "f").unwrap(), 3);
        assert!(dir.path().join("g.000000.part").exists());
    }
}
