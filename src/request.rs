//! Request descriptor and per-call options.
//!
//! A [`RequestDescriptor`] is immutable per attempt; the pre-request hook may
//! produce a new descriptor before the policy chain runs, and the chain
//! re-sends the same descriptor on every retry. [`RequestOptions`] carries
//! per-call overrides that win over the client's defaults without rebuilding
//! the client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::hooks::Hooks;
use crate::retry::RetryConfig;
use crate::validation::SchemaValidator;

/// One logical HTTP request to execute through the policy chain.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Absolute target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Request headers, in insertion order.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    /// Creates a descriptor with the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Creates a GET descriptor.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST descriptor.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Creates a PUT descriptor.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Creates a DELETE descriptor.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Adds a header. Invalid names or values are skipped with a warning
    /// rather than failing the whole request construction.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                warn!(header = name, "skipping invalid header");
            }
        }
        self
    }

    /// Sets a JSON body and the matching `Content-Type` header.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(body)
            .map_err(|e| Error::network(format!("failed to encode JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(encoded));
        Ok(self)
    }

    /// Sets a raw body without touching headers.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Host component of the URL, for logging.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
    }

    /// Path component of the URL, for logging.
    pub fn path(&self) -> Option<String> {
        url::Url::parse(&self.url).ok().map(|u| u.path().to_owned())
    }

    /// Query component of the URL, for logging.
    pub fn query(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.query().map(str::to_owned))
    }
}

/// Per-call overrides for a built client.
///
/// Unset fields fall back to the client's defaults; set fields win.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Overrides the per-call timeout.
    pub timeout: Option<Duration>,
    /// Overrides the per-call retry configuration.
    pub retry: Option<RetryConfig>,
    /// Overrides the schema applied to successful JSON responses.
    pub schema: Option<Arc<dyn SchemaValidator>>,
    /// Overrides the lifecycle hooks for this call.
    pub hooks: Option<Hooks>,
    /// Caller-supplied cancellation signal, handed to the transport
    /// untouched by any policy.
    pub cancellation: Option<CancellationToken>,
}

impl RequestOptions {
    /// Creates empty options (all client defaults apply).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a per-call retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets a per-call schema validator.
    pub fn with_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets per-call hooks.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Attaches a cancellation token for this call.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("schema", &self.schema.as_ref().map(|_| "<schema>"))
            .field("hooks", &self.hooks)
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_constructors() {
        let req = RequestDescriptor::get("https://api.example.com/test");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "https://api.example.com/test");
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn test_header_insertion_order_preserved() {
        let req = RequestDescriptor::get("https://example.com")
            .header("x-first", "1")
            .header("x-second", "2");
        let names: Vec<_> = req.headers.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["x-first", "x-second"]);
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let req = RequestDescriptor::get("https://example.com").header("bad\nname", "v");
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let req = RequestDescriptor::post("https://example.com")
            .json(&json!({"a": 1}))
            .unwrap();
        assert_eq!(
            req.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(req.body.unwrap().as_ref(), br#"{"a":1}"#);
    }

    #[test]
    fn test_url_components() {
        let req = RequestDescriptor::get("https://api.example.com/v1/items?page=2");
        assert_eq!(req.host().as_deref(), Some("api.example.com"));
        assert_eq!(req.path().as_deref(), Some("/v1/items"));
        assert_eq!(req.query().as_deref(), Some("page=2"));
    }

    #[test]
    fn test_options_builders() {
        let options = RequestOptions::new()
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryConfig::default());
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert!(options.retry.is_some());
        assert!(options.schema.is_none());
    }
}
