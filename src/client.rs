//! Client builder and the policy chain.
//!
//! The builder collects policy configurations, validates them once, and
//! produces an immutable [`Client`]. Executing a request runs the chain from
//! the outside in:
//!
//! ```text
//! admission retry -> rate limiter -> circuit breaker
//!     -> per-call retry -> timeout -> transport -> materialize
//! ```
//!
//! The rate limiter and circuit breaker are shared by every clone of the
//! client; timeout and retry state is per call. The breaker records exactly
//! one outcome per admitted call, measured across the whole per-call retry
//! scope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent, ErrorFilter,
};
use crate::envelope::{materialize, ResponseEnvelope};
use crate::error::Result;
use crate::hooks::Hooks;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::request::{RequestDescriptor, RequestOptions};
use crate::retry::{RetryConfig, RetryPolicy, RetryPredicate};
use crate::timeout::TimeoutPolicy;
use crate::transport::{ReqwestTransport, Transport};
use crate::validation::SchemaValidator;

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fluent builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    base_headers: HeaderMap,
    timeout: Option<Duration>,
    retry: Option<RetryConfig>,
    retry_predicate: Option<RetryPredicate>,
    admission_retry: Option<RetryConfig>,
    rate_limiter: Option<RateLimiterConfig>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    breaker_error_filter: Option<ErrorFilter>,
    breaker_events: Option<mpsc::UnboundedSender<CircuitBreakerEvent>>,
    schema: Option<Arc<dyn SchemaValidator>>,
    hooks: Hooks,
    transport: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_headers", &self.base_headers.len())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("admission_retry", &self.admission_retry)
            .field("rate_limiter", &self.rate_limiter)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("has_schema", &self.schema.is_some())
            .field("hooks", &self.hooks)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Creates a builder with every policy at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header applied to every request that does not already carry it.
    /// Invalid names or values are skipped with a warning.
    pub fn base_header(mut self, name: &str, value: &str) -> Self {
        use reqwest::header::{HeaderName, HeaderValue};
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.base_headers.insert(name, value);
            }
            _ => {
                warn!(header = name, "skipping invalid base header");
            }
        }
        self
    }

    /// Sets the default per-call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the default per-call retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Replaces the per-call rejection predicate.
    pub fn retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Sets the admission retry configuration used to wait out rate-limit
    /// windows.
    pub fn admission_retry(mut self, config: RetryConfig) -> Self {
        self.admission_retry = Some(config);
        self
    }

    /// Enables the shared rate limiter.
    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limiter = Some(config);
        self
    }

    /// Enables the shared circuit breaker.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Restricts which errors count against the circuit breaker.
    pub fn breaker_error_filter(mut self, filter: ErrorFilter) -> Self {
        self.breaker_error_filter = Some(filter);
        self
    }

    /// Attaches a channel receiving circuit breaker lifecycle events.
    pub fn breaker_events(
        mut self,
        sender: mpsc::UnboundedSender<CircuitBreakerEvent>,
    ) -> Self {
        self.breaker_events = Some(sender);
        self
    }

    /// Sets the schema applied to successful JSON responses.
    pub fn schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the client-wide lifecycle hooks.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replaces the transport. Defaults to [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates every policy configuration and builds the client.
    ///
    /// Hard violations fail with [`Error::Config`]; soft findings are logged
    /// as warnings and the build proceeds.
    pub fn build(self) -> Result<Client> {
        let retry_config = self.retry.unwrap_or_default();
        let admission_config = self.admission_retry.unwrap_or_default();

        for warning in retry_config.validate()?.warnings {
            warn!(policy = "retry", warning = %warning, "configuration warning");
        }
        for warning in admission_config.validate()?.warnings {
            warn!(policy = "admission_retry", warning = %warning, "configuration warning");
        }
        if let Some(config) = &self.rate_limiter {
            for warning in config.validate()?.warnings {
                warn!(policy = "rate_limiter", warning = %warning, "configuration warning");
            }
        }
        if let Some(config) = &self.circuit_breaker {
            for warning in config.validate()?.warnings {
                warn!(policy = "circuit_breaker", warning = %warning, "configuration warning");
            }
        }

        let retry = match self.retry_predicate {
            Some(predicate) => RetryPolicy::with_predicate(retry_config, predicate),
            None => RetryPolicy::new(retry_config),
        };
        let admission =
            RetryPolicy::with_predicate(admission_config, RetryPolicy::admission_predicate());

        let breaker = self.circuit_breaker.map(|config| {
            let mut breaker = CircuitBreaker::new(config);
            if let Some(filter) = self.breaker_error_filter {
                breaker = breaker.with_error_filter(filter);
            }
            if let Some(events) = self.breaker_events {
                breaker = breaker.with_events(events);
            }
            breaker
        });

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        Ok(Client {
            transport,
            base_headers: self.base_headers,
            timeout: TimeoutPolicy::new(self.timeout.unwrap_or(DEFAULT_TIMEOUT)),
            retry,
            admission,
            limiter: self.rate_limiter.map(RateLimiter::new),
            breaker,
            schema: self.schema,
            hooks: self.hooks,
        })
    }
}

/// Immutable request executor produced by [`ClientBuilder`].
///
/// Cheap to clone; clones share the rate limiter and circuit breaker.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    base_headers: HeaderMap,
    timeout: TimeoutPolicy,
    retry: RetryPolicy,
    admission: RetryPolicy,
    limiter: Option<RateLimiter>,
    breaker: Option<CircuitBreaker>,
    schema: Option<Arc<dyn SchemaValidator>>,
    hooks: Hooks,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_headers", &self.base_headers.len())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("rate_limiter", &self.limiter.is_some())
            .field("circuit_breaker", &self.breaker.is_some())
            .field("has_schema", &self.schema.is_some())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Client {
    /// Starts a builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Executes a request with the client's default options.
    pub async fn fetch(&self, request: RequestDescriptor) -> Result<ResponseEnvelope> {
        self.fetch_with(request, RequestOptions::default()).await
    }

    /// Executes a request with per-call overrides.
    pub async fn fetch_with(
        &self,
        mut request: RequestDescriptor,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope> {
        for (name, value) in &self.base_headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }

        let hooks = options.hooks.as_ref().unwrap_or(&self.hooks);
        let request = hooks.apply_pre_request(request);

        let timeout = match options.timeout {
            Some(duration) => TimeoutPolicy::new(duration),
            None => self.timeout,
        };
        let retry = match options.retry {
            Some(config) => self.retry.with_config(config),
            None => self.retry.clone(),
        };
        let schema = options
            .schema
            .as_ref()
            .or(self.schema.as_ref())
            .map(Arc::as_ref);
        let cancel = options.cancellation.as_ref();

        match self
            .run_pipeline(&request, timeout, &retry, schema, cancel)
            .await
        {
            Ok(envelope) => Ok(hooks.apply_post_success(&request, envelope)),
            Err(err) => {
                error!(
                    method = %request.method,
                    url = %request.url,
                    error = %err,
                    "request failed"
                );
                Err(hooks.apply_post_error(&request, err))
            }
        }
    }

    /// Convenience GET.
    pub async fn get(&self, url: impl Into<String>) -> Result<ResponseEnvelope> {
        self.fetch(RequestDescriptor::get(url)).await
    }

    /// Convenience POST with a JSON body.
    pub async fn post<T: Serialize>(
        &self,
        url: impl Into<String>,
        body: &T,
    ) -> Result<ResponseEnvelope> {
        self.fetch(RequestDescriptor::post(url).json(body)?).await
    }

    /// Convenience PUT with a JSON body.
    pub async fn put<T: Serialize>(
        &self,
        url: impl Into<String>,
        body: &T,
    ) -> Result<ResponseEnvelope> {
        self.fetch(RequestDescriptor::put(url).json(body)?).await
    }

    /// Convenience DELETE.
    pub async fn delete(&self, url: impl Into<String>) -> Result<ResponseEnvelope> {
        self.fetch(RequestDescriptor::delete(url)).await
    }

    /// Current circuit breaker state, when a breaker is configured.
    pub async fn circuit_state(&self) -> Option<crate::circuit_breaker::CircuitState> {
        match &self.breaker {
            Some(breaker) => Some(breaker.state().await),
            None => None,
        }
    }

    /// Runs the full policy chain for one logical request.
    async fn run_pipeline(
        &self,
        request: &RequestDescriptor,
        timeout: TimeoutPolicy,
        retry: &RetryPolicy,
        schema: Option<&dyn SchemaValidator>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResponseEnvelope> {
        let this = self;
        self.admission
            .execute(|_| {
                let request = request;
                let retry = retry;
                let schema = schema;
                let cancel = cancel;
                async move {
                    if let Some(limiter) = &this.limiter {
                        limiter.try_acquire().await?;
                    }
                    if let Some(breaker) = &this.breaker {
                        breaker.allow_request().await?;
                    }

                    let started = Instant::now();
                    let result = retry
                        .execute(|attempt| async move {
                            log_attempt(request, attempt);
                            let raw = timeout
                                .execute(this.transport.call(request, cancel))
                                .await?;
                            materialize(raw, schema)
                        })
                        .await;

                    // One outcome per admitted call, spanning the whole
                    // per-call retry scope.
                    if let Some(breaker) = &this.breaker {
                        let elapsed = started.elapsed();
                        match &result {
                            Ok(_) => breaker.record_success(elapsed).await,
                            Err(err) => breaker.record_failure(elapsed, err).await,
                        }
                    }
                    result
                }
            })
            .await
    }
}

fn log_attempt(request: &RequestDescriptor, attempt: u32) {
    debug!(
        attempt,
        method = %request.method,
        host = request.host().as_deref().unwrap_or(""),
        path = request.path().as_deref().unwrap_or(""),
        query = request.query().as_deref().unwrap_or(""),
        headers = request.headers.len(),
        body_bytes = request.body.as_ref().map(|b| b.len()).unwrap_or(0),
        "issuing attempt"
    );
}
