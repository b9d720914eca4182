//! Single-attempt HTTP transport and the retrying segment fetcher

use crate::config::RetryConfig;
use crate::error::{Error, Result, SegmentError};
use crate::retry::download_with_retry;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for issuing one GET request
///
/// Implementations perform exactly one attempt and never send cookies or
/// other credentials. Retrying is layered on top by [`fetch_segment`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the body at `url`, failing if it takes longer than `timeout`
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<Bytes, SegmentError>;
}

/// Production transport backed by `reqwest`
///
/// The client has no cookie store, so cross-origin segment hosts never see
/// the caller's credentials.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with an optional user agent
    pub fn new(user_agent: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<Bytes, SegmentError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                SegmentError::Timeout { after: timeout }
            } else {
                SegmentError::network(e)
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SegmentError::HttpStatus {
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(classify)
    }
}

/// Download one segment with bounded retries
///
/// Cancellation aborts both an in-flight request and the pause between
/// attempts, yielding [`SegmentError::Cancelled`].
pub async fn fetch_segment(
    transport: &dyn Transport,
    url: &str,
    timeout: Duration,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> std::result::Result<Bytes, SegmentError> {
    let attempts = download_with_retry(retry, || async move {
        tracing::trace!(url, "Requesting segment");
        transport.get(url, timeout).await
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SegmentError::Cancelled),
        result = attempts => result,
    }
}

/// Download the playlist text
///
/// A single attempt; the body must be valid UTF-8.
pub async fn fetch_playlist(
    transport: &dyn Transport,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Segment(SegmentError::Cancelled)),
        result = transport.get(url, timeout) => result?,
    };

    String::from_utf8(body.to_vec())
        .map_err(|_| Error::Format(format!("playlist at {url} is not valid UTF-8")))
}
