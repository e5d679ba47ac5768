//! HTTP transport abstraction for testability.
//!
//! The engine only needs two operations from the network: a content-length
//! probe and a ranged GET that yields a status code plus a byte stream.
//! [`RangeTransport`] captures exactly that so the fetcher and scheduler can
//! be driven by an in-memory transport in tests.
//!
//! The trait returns boxed futures so it stays dyn-compatible and its futures
//! are `Send`, which the scheduler needs to run fetches on spawned tasks.

mod reqwest_transport;

pub use reqwest_transport::{ReqwestTransport, TransportConfig};

use std::pin::Pin;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::Stream;
use thiserror::Error;

/// HTTP status code for a full-content response.
pub const STATUS_OK: u16 = 200;

/// HTTP status code for a partial-content response.
pub const STATUS_PARTIAL_CONTENT: u16 = 206;

/// Streamed response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),

    /// The request could not be sent or no response arrived.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The request timed out.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The probe got a non-success status.
    #[error("HEAD {url} returned status {status}")]
    ProbeStatus { url: String, status: u16 },

    /// The server did not report a usable content length.
    #[error("server did not provide a content length for {url}")]
    MissingContentLength { url: String },

    /// Reading the response body failed mid-stream.
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Response to a ranged GET.
pub struct RangeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: BodyStream,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Network operations needed by the transfer engine.
pub trait RangeTransport: Send + Sync + 'static {
    /// Total size of the resource in bytes, from a HEAD-style probe.
    fn content_length<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64, TransportError>>;

    /// Issue `GET url` with `Range: bytes=<start>-<end>`.
    ///
    /// The status code is returned as-is; deciding which codes are
    /// acceptable is the caller's job.
    fn get_range<'a>(
        &'a self,
        url: &'a str,
        start: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<RangeResponse, TransportError>>;
}

/// Value of the `Range` header for an inclusive byte range.
pub fn range_header(start: u64, end: u64) -> String {
    format!("bytes={}-{}", start, end)
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport serving a fixed resource.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::stream;
    use parking_lot::Mutex;

    use super::*;

    /// How the mock answers a request for a given range start.
    #[derive(Debug, Clone)]
    pub enum Behavior {
        /// Serve the range normally with 206.
        Normal,
        /// Always answer with this status and an empty body.
        Status(u16),
        /// Serve only this many bytes, then end the stream.
        Truncate(usize),
        /// Serve the whole resource with 200, ignoring the range.
        IgnoreRange,
        /// Fail the request outright.
        Fail,
        /// Serve the range slowly, one small piece per tick.
        Slow(Duration),
    }

    /// Transport mock that records every ranged request.
    pub struct MockTransport {
        data: Vec<u8>,
        behaviors: Mutex<HashMap<u64, Vec<Behavior>>>,
        pub requests: Mutex<Vec<(u64, u64)>>,
        pub probes: AtomicUsize,
        piece_size: usize,
    }

    impl MockTransport {
        pub fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                behaviors: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
                probes: AtomicUsize::new(0),
                piece_size: 64,
            }
        }

        /// Queue behaviors for requests starting at `start`. Once the queue is
        /// drained the last behavior repeats.
        pub fn on_start(self, start: u64, behaviors: Vec<Behavior>) -> Self {
            self.behaviors.lock().insert(start, behaviors);
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }

        pub fn recorded(&self) -> Vec<(u64, u64)> {
            self.requests.lock().clone()
        }

        fn next_behavior(&self, start: u64) -> Behavior {
            let mut behaviors = self.behaviors.lock();
            match behaviors.get_mut(&start) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) => queue.first().cloned().unwrap_or(Behavior::Normal),
                None => Behavior::Normal,
            }
        }

        fn pieces(&self, bytes: &[u8]) -> Vec<Result<Bytes, TransportError>> {
            bytes
                .chunks(self.piece_size)
                .map(|piece| Ok(Bytes::copy_from_slice(piece)))
                .collect()
        }
    }

    impl RangeTransport for MockTransport {
        fn content_length<'a>(
            &'a self,
            _url: &'a str,
        ) -> BoxFuture<'a, Result<u64, TransportError>> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let len = self.data.len() as u64;
            Box::pin(async move { Ok(len) })
        }

        fn get_range<'a>(
            &'a self,
            url: &'a str,
            start: u64,
            end: u64,
        ) -> BoxFuture<'a, Result<RangeResponse, TransportError>> {
            self.requests.lock().push((start, end));
            let behavior = self.next_behavior(start);

            Box::pin(async move {
                let last = (end as usize).min(self.data.len() - 1);
                let slice = &self.data[start as usize..=last];

                let response = match behavior {
                    Behavior::Normal => RangeResponse {
                        status: STATUS_PARTIAL_CONTENT,
                        body: Box::pin(stream::iter(self.pieces(slice))),
                    },
                    Behavior::Status(status) => RangeResponse {
                        status,
                        body: Box::pin(stream::empty()),
                    },
                    Behavior::Truncate(n) => RangeResponse {
                        status: STATUS_PARTIAL_CONTENT,
                        body: Box::pin(stream::iter(self.pieces(&slice[..n.min(slice.len())]))),
                    },
                    Behavior::IgnoreRange => RangeResponse {
                        status: STATUS_OK,
                        body: Box::pin(stream::iter(self.pieces(&self.data))),
                    },
                    Behavior::Fail => {
                        return Err(TransportError::Request {
                            url: url.to_string(),
                            reason: "connection reset".to_string(),
                        })
                    }
                    Behavior::Slow(delay) => {
                        let pieces = self.pieces(slice);
                        let body = stream::unfold(pieces.into_iter(), move |mut it| async move {
                            tokio::time::sleep(delay).await;
                            it.next().map(|piece| (piece, it))
                        });
                        RangeResponse {
                            status: STATUS_PARTIAL_CONTENT,
                            body: Box::pin(body),
                        }
                    }
                };
                Ok(response)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, 999), "bytes=0-999");
        assert_eq!(range_header(1000, 1999), "bytes=1000-1999");
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ProbeStatus {
            url: "http://x".to_string(),
            status: 404,
        };
        assert_eq!(err.to_string(), "HEAD http://x returned status 404");
    }
}
