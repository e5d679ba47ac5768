//! Real transport implementation using reqwest.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::Client;
use tracing::debug;

use super::{range_header, RangeResponse, RangeTransport, TransportError};

/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed between reads of a response body.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Proxy URL applied to every request (http, https or socks5).
    pub proxy: Option<String>,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Per-read timeout while streaming a body.
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// [`RangeTransport`] backed by a shared reqwest client.
///
/// There is no overall request timeout: a chunk may legitimately take a long
/// time, so only connect and read stalls are bounded.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport from `config`.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TransportError::Client(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    fn request_error(url: &str, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else {
            TransportError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl RangeTransport for ReqwestTransport {
    fn content_length<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .head(url)
                .send()
                .await
                .map_err(|e| Self::request_error(url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::ProbeStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            // Read the header directly: the body of a HEAD response is empty,
            // so reqwest's own content_length() reports 0.
            let size = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0);

            if size == 0 {
                return Err(TransportError::MissingContentLength {
                    url: url.to_string(),
                });
            }

            debug!(url, size, "Probed content length");
            Ok(size)
        })
    }

    fn get_range<'a>(
        &'a self,
        url: &'a str,
        start: u64,
        end: u64,
    ) -> BoxFuture<'a, Result<RangeResponse, TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .header(RANGE, range_header(start, end))
                .send()
                .await
                .map_err(|e| Self::request_error(url, e))?;

            let status = response.status().as_u16();
            let body = response
                .bytes_stream()
                .map_err(|e| TransportError::Body(e.to_string()));

            Ok(RangeResponse {
                status,
                body: Box::pin(body),
            })
        })
    }
}
