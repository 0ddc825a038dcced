//! Resilient HTTP request executor.
//!
//! Wraps a single pluggable transport call in a chain of resilience
//! policies: per-call timeout, retry with exponential backoff and jitter, a
//! shared fixed-window rate limiter, and a shared sliding-window circuit
//! breaker. Successful responses are materialized into a typed
//! [`ResponseEnvelope`](envelope::ResponseEnvelope) with JSON detection and
//! optional schema validation; every failure is classified into one
//! [`Error`](error::Error) variant.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use steadyfetch::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let client = Client::builder()
//!     .timeout(Duration::from_secs(10))
//!     .retry(RetryConfig::with_attempts(3))
//!     .rate_limiter(RateLimiterConfig::new(20, Duration::from_secs(1)))
//!     .circuit_breaker(CircuitBreakerConfig::default())
//!     .build()?;
//!
//! let envelope = client.get("https://api.example.com/v1/items").await?;
//! if let Some(data) = &envelope.data {
//!     println!("items: {data}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Global suppressions:
// - module_name_repetitions: common library pattern (RetryConfig in retry)
// - missing_errors_doc / missing_panics_doc: too verbose at this scale
// - must_use_candidate: not every return value needs #[must_use]
// - return_self_not_must_use: builder methods return Self without must_use
// - cast_precision_loss / cast_possible_truncation: millisecond math on
//   durations stays well inside f64/u64 range
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

// Re-exports of external dependencies
pub use serde;
pub use serde_json;

pub mod circuit_breaker;
pub mod client;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod rate_limiter;
pub mod request;
pub mod retry;
pub mod timeout;
pub mod transport;
pub mod validation;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent, CircuitState, ErrorFilter,
};
pub use client::{Client, ClientBuilder, DEFAULT_TIMEOUT};
pub use envelope::{materialize, ResponseEnvelope};
pub use error::{ConfigValidationError, Error, Result, ValidationResult};
pub use hooks::Hooks;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use request::{RequestDescriptor, RequestOptions};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy, RetryPredicate};
pub use timeout::TimeoutPolicy;
pub use transport::{RawResponse, ReqwestTransport, Transport};
pub use validation::SchemaValidator;
// Re-export CancellationToken for convenient access
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```rust
/// use steadyfetch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerEvent, CircuitState};
    pub use crate::client::{Client, ClientBuilder};
    pub use crate::envelope::ResponseEnvelope;
    pub use crate::error::{Error, Result};
    pub use crate::hooks::Hooks;
    pub use crate::logging::{init_logging, try_init_logging, LogConfig, LogFormat, LogLevel};
    pub use crate::rate_limiter::RateLimiterConfig;
    pub use crate::request::{RequestDescriptor, RequestOptions};
    pub use crate::retry::{RetryConfig, RetryDecision};
    pub use crate::transport::{RawResponse, Transport};
    pub use crate::validation::SchemaValidator;
    pub use serde::{Deserialize, Serialize};
    pub use tokio_util::sync::CancellationToken;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "steadyfetch");
    }
}
