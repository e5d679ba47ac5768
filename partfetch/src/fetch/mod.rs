//! Single-attempt range transfer.
//!
//! [`RangeFetcher`] performs exactly one HTTP range request and streams the
//! body into an append-positioned sink, enforcing that precisely the
//! requested number of bytes is written. Retrying is the scheduler's job.

mod chunk_file;

pub use chunk_file::ChunkFile;

use std::io;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::transport::{RangeTransport, TransportError, STATUS_OK, STATUS_PARTIAL_CONTENT};

/// Errors from a single range transfer attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The requested range is empty or inverted.
    #[error("invalid range {start}-{end}")]
    InvalidRange { start: u64, end: u64 },

    /// The transport failed to deliver a response or body.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a status other than 200 or 206.
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    /// The body ended before the full range arrived.
    #[error("incomplete transfer: expected {expected} bytes, received {received}")]
    IncompleteTransfer { expected: u64, received: u64 },

    /// Writing to the sink failed.
    #[error("failed to write chunk data: {0}")]
    Write(#[source] io::Error),

    /// The run was cancelled while the transfer was in progress.
    #[error("transfer cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this error should end the chunk without further retries.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Performs single range transfers over a [`RangeTransport`].
pub struct RangeFetcher<T: RangeTransport> {
    transport: Arc<T>,
}

impl<T: RangeTransport> Clone for RangeFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: RangeTransport> RangeFetcher<T> {
    /// Create a fetcher over a shared transport.
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Transfer bytes `start..=end` of `url` into `sink`.
    ///
    /// Accepts 206 and 200 responses; for 200 the leading `start` bytes of
    /// the full body are skipped. Writing stops once exactly
    /// `end - start + 1` bytes have been written and any surplus is ignored.
    /// `on_progress` is called with the size of each written piece.
    ///
    /// Returns the number of bytes written. On error the sink may hold a
    /// valid prefix of the range; the caller decides whether to keep it.
    pub async fn fetch<W, F>(
        &self,
        url: &str,
        start: u64,
        end: u64,
        sink: &mut W,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64, FetchError>
    where
        W: AsyncWrite + Unpin + Send,
        F: FnMut(u64) + Send,
    {
        if end < start {
            return Err(FetchError::InvalidRange { start, end });
        }
        let expected = end - start + 1;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.transport.get_range(url, start, end) => response?,
        };

        let mut skip = match response.status {
            STATUS_PARTIAL_CONTENT => 0,
            STATUS_OK => {
                debug!(url, start, "Server ignored range request, skipping leading bytes");
                start
            }
            status => return Err(FetchError::UnexpectedStatus { status }),
        };

        let mut body = response.body;
        let mut written: u64 = 0;

        while written < expected {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                next = body.next() => next,
            };

            let Some(piece) = next else {
                break;
            };
            let piece = piece?;

            let mut data = &piece[..];
            if skip > 0 {
                let dropped = skip.min(data.len() as u64);
                data = &data[dropped as usize..];
                skip -= dropped;
            }

            let wanted = (expected - written).min(data.len() as u64) as usize;
            if wanted == 0 {
                continue;
            }

            sink.write_all(&data[..wanted])
                .await
                .map_err(FetchError::Write)?;
            written += wanted as u64;
            on_progress(wanted as u64);
        }

        sink.flush().await.map_err(FetchError::Write)?;

        if written < expected {
            return Err(FetchError::IncompleteTransfer {
                expected,
                received: written,
            });
        }

        trace!(url, start, end, written, "Range transfer finished");
        Ok(written)
    }
}
