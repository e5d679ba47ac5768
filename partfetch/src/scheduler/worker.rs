//! Per-chunk processing: skip, resume, fetch, retry, promote.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use super::TransferError;
use crate::fetch::{ChunkFile, FetchError, RangeFetcher};
use crate::plan::ChunkRange;
use crate::progress::ProgressCounters;
use crate::state::StateStore;
use crate::transport::RangeTransport;

/// Buffer size for writing chunk data (64KB).
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A unit of work handed from the dispatcher to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkItem {
    /// The chunk's bytes are not yet known to be complete.
    Fetch(ChunkRange),
    /// The chunk is complete but its hook still has to run.
    HookOnly(usize),
}

impl WorkItem {
    pub(crate) fn index(&self) -> usize {
        match self {
            WorkItem::Fetch(range) => range.index,
            WorkItem::HookOnly(index) => *index,
        }
    }
}

/// What a worker did with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkOutcome {
    /// Bytes were fetched over the network.
    Fetched,
    /// The bytes were already on disk and the chunk was promoted or recorded.
    Skipped,
    /// The chunk was only resubmitted to the hook pipeline.
    HookResubmitted,
}

/// Shared context of the scheduler's workers.
pub(crate) struct ChunkWorker<T: RangeTransport> {
    pub(crate) fetcher: RangeFetcher<T>,
    pub(crate) store: Arc<StateStore>,
    pub(crate) progress: Arc<ProgressCounters>,
    pub(crate) retry: RetryPolicy,
    pub(crate) url: String,
    pub(crate) hooks: Option<mpsc::Sender<usize>>,
}

impl<T: RangeTransport> ChunkWorker<T> {
    /// Process one work item to completion, failure or cancellation.
    pub(crate) async fn process(
        &self,
        item: WorkItem,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, TransferError> {
        match item {
            WorkItem::HookOnly(index) => {
                debug!(chunk = index, "Resubmitting pending hook");
                self.hand_off(index);
                Ok(ChunkOutcome::HookResubmitted)
            }
            WorkItem::Fetch(range) => self.process_chunk(range, cancel).await,
        }
    }

    async fn process_chunk(
        &self,
        range: ChunkRange,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, TransferError> {
        let index = range.index;
        let file = ChunkFile::new(
            self.store.partial_path(index),
            self.store.complete_path(index),
        );

        let complete = file.is_complete().await.map_err(|source| TransferError::Io {
            path: file.complete_path().to_path_buf(),
            source,
        })?;
        if complete {
            debug!(chunk = index, "Complete artifact present, skipping");
            self.finish(index, range.len()).await?;
            return Ok(ChunkOutcome::Skipped);
        }

        let fetched = self.fetch_with_retry(&range, &file, cancel).await?;

        file.promote()
            .await
            .map_err(|source| TransferError::Io {
                path: file.complete_path().to_path_buf(),
                source,
            })?;

        self.finish(index, range.len()).await?;

        if fetched {
            info!(chunk = index, bytes = range.len(), "Chunk complete");
            Ok(ChunkOutcome::Fetched)
        } else {
            Ok(ChunkOutcome::Skipped)
        }
    }

    /// Bring the partial artifact up to the full range.
    ///
    /// Returns `false` when the partial artifact already held the whole
    /// range and no request was made.
    async fn fetch_with_retry(
        &self,
        range: &ChunkRange,
        file: &ChunkFile,
        cancel: &CancellationToken,
    ) -> Result<bool, TransferError> {
        let index = range.index;
        let expected = range.len();
        let mut retry = 0;

        loop {
            let mut on_disk = self.partial_len(file).await?;
            if on_disk > expected {
                warn!(
                    chunk = index,
                    on_disk, expected, "Partial artifact larger than chunk, discarding"
                );
                file.discard_partial()
                    .await
                    .map_err(|source| TransferError::Io {
                        path: file.partial_path().to_path_buf(),
                        source,
                    })?;
                on_disk = 0;
            }

            self.progress.set_chunk_bytes(index, on_disk);
            self.store.record_downloaded(index, on_disk);

            if on_disk == expected {
                debug!(chunk = index, "Partial artifact already holds the full range");
                return Ok(retry > 0);
            }

            let resume_at = range.start + on_disk;
            if on_disk > 0 {
                debug!(chunk = index, resume_at, on_disk, "Resuming chunk");
            }

            match self.fetch_once(file, resume_at, range.end, index, cancel).await {
                Ok(()) => {
                    self.store.record_downloaded(index, expected);
                    return Ok(true);
                }
                Err(FetchError::Cancelled) => {
                    if let Ok(len) = file.partial_len().await {
                        self.store.record_downloaded(index, len);
                    }
                    return Err(TransferError::Cancelled);
                }
                Err(source) if retry >= self.retry.max_retries => {
                    warn!(chunk = index, error = %source, "Chunk failed, giving up");
                    return Err(TransferError::ChunkFailed {
                        index,
                        attempts: retry + 1,
                        source,
                    });
                }
                Err(source) => {
                    retry += 1;
                    let delay = self.retry.backoff(retry);
                    warn!(
                        chunk = index,
                        retry,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "Chunk attempt failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One request appending `resume_at..=end` to the partial artifact.
    ///
    /// Whatever arrived before an error is flushed so the next attempt
    /// resumes after it.
    async fn fetch_once(
        &self,
        file: &ChunkFile,
        resume_at: u64,
        end: u64,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let handle = file.open_append().await.map_err(FetchError::Write)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, handle);
        let progress = &self.progress;

        let result = self
            .fetcher
            .fetch(&self.url, resume_at, end, &mut writer, cancel, |n| {
                progress.add_bytes(index, n)
            })
            .await;

        if result.is_err() {
            if let Err(e) = writer.flush().await {
                debug!(chunk = index, error = %e, "Failed to flush partial artifact after error");
            }
        }

        result.map(|_| ())
    }

    async fn partial_len(&self, file: &ChunkFile) -> Result<u64, TransferError> {
        file.partial_len()
            .await
            .map_err(|source| TransferError::Io {
                path: file.partial_path().to_path_buf(),
                source,
            })
    }

    /// Record a chunk as complete, persist, and hand it to the hooks.
    async fn finish(&self, index: usize, len: u64) -> Result<(), TransferError> {
        if self.store.mark_transfer_complete(index, len) {
            self.progress.mark_completed(index, len);
        } else {
            self.progress.set_chunk_bytes(index, len);
        }
        self.store.save_async().await?;
        self.hand_off(index);
        Ok(())
    }

    fn hand_off(&self, index: usize) {
        let Some(hooks) = &self.hooks else {
            return;
        };
        if let Err(e) = hooks.try_send(index) {
            warn!(
                chunk = index,
                error = %e,
                "Hook queue unavailable, hook stays pending for the next run"
            );
        }
    }
}
