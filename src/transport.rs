//! Raw call collaborator.
//!
//! The pipeline never talks to the network directly; it delegates one attempt
//! at a time to a [`Transport`]. The default implementation is backed by
//! `reqwest`, but tests and embedders can supply anything that satisfies the
//! trait. The transport reads the wire body exactly once and returns a
//! cloneable [`RawResponse`], so the materializer never performs a
//! destructive read.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::request::RequestDescriptor;

/// A raw transport response with the body fully read.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body bytes.
    pub body: Bytes,
}

/// Pluggable raw request collaborator: one descriptor in, one raw response
/// out. Implementations map their own failures to [`Error::Network`]; all
/// other classification happens in the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes a single attempt. The cancellation token, when present, is
    /// the caller's signal passed through the full chain; honoring it is the
    /// transport's responsibility.
    async fn call(
        &self,
        request: &RequestDescriptor,
        cancel: Option<&CancellationToken>,
    ) -> Result<RawResponse>;
}

/// Default transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the underlying HTTP client. No request timeout is configured
    /// here; deadlines belong to the pipeline's timeout policy.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "transport send failed");
            Error::network(format!("request failed: {e}"))
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "failed to read response body");
            Error::network(format!("failed to read response body: {e}"))
        })?;

        debug!(
            status = status.as_u16(),
            body_length = body.len(),
            "transport response received"
        );

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn call(
        &self,
        request: &RequestDescriptor,
        cancel: Option<&CancellationToken>,
    ) -> Result<RawResponse> {
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::network("request cancelled")),
                    result = self.send(request) => result,
                }
            }
            None => self.send(request).await,
        }
    }
}
