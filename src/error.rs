//! Unified error taxonomy for the request pipeline.
//!
//! Every failure surfaced by the pipeline is classified into one of the
//! variants below before it reaches the caller; policies classify and rethrow,
//! they never swallow errors or leak raw transport errors.
//!
//! ## Error hierarchy
//!
//! ```text
//! Error
//! ├── HttpResponse     - non-2xx, non-redirect response (carries the envelope)
//! ├── RetryExhausted   - retry budget spent on an HTTP-level failure
//! ├── Timeout          - deadline elapsed before the inner call settled
//! ├── RateLimit        - admission denied, carries time until the window resets
//! ├── CircuitOpen      - circuit breaker rejected the call without an attempt
//! ├── SchemaValidation - JSON body parsed but failed the configured schema
//! ├── Network          - classified transport failure
//! └── Config           - invalid policy configuration at build time
//! ```
//!
//! String fields use `Cow<'static, str>` so static messages allocate nothing,
//! and the large envelope-carrying variants are boxed to keep the enum small.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::envelope::ResponseEnvelope;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Classified pipeline error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport returned a non-success, non-redirect response.
    /// Boxed to keep the enum small; the envelope's body is fully read
    /// before this error is constructed.
    #[error("{}", .0.error_message())]
    HttpResponse(Box<ResponseEnvelope>),

    /// Retry attempts were exhausted on an HTTP-level failure.
    /// Carries the envelope of the final attempt.
    #[error("retry budget exhausted after {attempts} attempts: {}", envelope.error_message())]
    RetryExhausted {
        /// Total number of tries issued (the first try counts as attempt 1).
        attempts: u32,
        /// Response of the last attempt.
        envelope: Box<ResponseEnvelope>,
    },

    /// The configured deadline elapsed before the inner call settled.
    #[error("request timed out after {}ms", duration.as_millis())]
    Timeout {
        /// The configured timeout duration.
        duration: Duration,
    },

    /// Rate limiter denied admission for the current window.
    #[error("rate limit exceeded, window resets in {}ms", retry_after.as_millis())]
    RateLimit {
        /// Time remaining until the window resets and admission is possible.
        retry_after: Duration,
    },

    /// Circuit breaker is open; the call was rejected without an attempt.
    #[error("circuit breaker is open{}", fmt_retry_after(retry_after))]
    CircuitOpen {
        /// Time remaining until the breaker transitions to half-open,
        /// when known.
        retry_after: Option<Duration>,
    },

    /// The response body parsed as JSON but failed schema validation.
    #[error("response failed schema validation: {}", violations.join("; "))]
    SchemaValidation {
        /// Individual validation failures reported by the validator.
        violations: Vec<String>,
    },

    /// Transport-level failure (connection refused, DNS, body read, ...).
    #[error("network error: {0}")]
    Network(Cow<'static, str>),

    /// A policy configuration was rejected at client-build time.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}ms", d.as_millis()),
        None => String::new(),
    }
}

impl Error {
    /// Creates a network error. Accepts both `&'static str` (zero allocation)
    /// and `String`.
    pub fn network(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a timeout error for the given deadline.
    pub fn timeout_after(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a rate limit error carrying the remaining time in the window.
    pub fn rate_limit(retry_after: Duration) -> Self {
        Self::RateLimit { retry_after }
    }

    /// Creates a circuit-open error with an optional time until half-open.
    pub fn circuit_open(retry_after: Option<Duration>) -> Self {
        Self::CircuitOpen { retry_after }
    }

    /// Creates a schema validation error from a list of violations.
    pub fn schema_validation(violations: Vec<String>) -> Self {
        Self::SchemaValidation { violations }
    }

    /// Creates an HTTP response error from a fully materialized envelope.
    pub fn http_response(envelope: ResponseEnvelope) -> Self {
        Self::HttpResponse(Box::new(envelope))
    }

    /// Wraps the envelope of an exhausted HTTP-level failure.
    pub fn retry_exhausted(attempts: u32, envelope: Box<ResponseEnvelope>) -> Self {
        Self::RetryExhausted { attempts, envelope }
    }

    /// Returns `true` if the default retry predicate would consider this
    /// error worth retrying.
    ///
    /// Retryable: network failures, timeouts, rate-limit denials, and HTTP
    /// responses with status 429 or 5xx. Everything else, including schema
    /// validation failures, is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout { .. } | Error::RateLimit { .. } => true,
            Error::HttpResponse(envelope) => {
                let status = envelope.status.as_u16();
                status == 429 || (500..600).contains(&status)
            }
            _ => false,
        }
    }

    /// Returns the wait this error carries, if any: the remaining rate-limit
    /// window, the breaker's time to half-open, or a `Retry-After` header on
    /// an HTTP failure.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after } => Some(*retry_after),
            Error::CircuitOpen { retry_after } => *retry_after,
            Error::HttpResponse(envelope) => envelope.retry_after(),
            Error::RetryExhausted { envelope, .. } => envelope.retry_after(),
            _ => None,
        }
    }

    /// Returns the HTTP status if this error carries a response.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        self.envelope().map(|e| e.status)
    }

    /// Returns the response envelope for HTTP-level failures.
    pub fn envelope(&self) -> Option<&ResponseEnvelope> {
        match self {
            Error::HttpResponse(envelope) => Some(envelope),
            Error::RetryExhausted { envelope, .. } => Some(envelope),
            _ => None,
        }
    }

    /// Returns the remaining window if this is a rate limit error.
    pub fn as_rate_limit(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Returns `Some` if this is a circuit-open rejection.
    pub fn as_circuit_open(&self) -> Option<Option<Duration>> {
        match self {
            Error::CircuitOpen { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Configuration validation error types.
///
/// Raised when a policy configuration is rejected at client-build time.
/// Each variant carries the field name and the offending value so the
/// failure is actionable without a debugger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// Field value exceeds the maximum allowed value.
    #[error("field '{field}' value {value} exceeds maximum {max}")]
    ValueTooHigh {
        /// The name of the configuration field
        field: &'static str,
        /// The actual value that was provided
        value: String,
        /// The maximum allowed value
        max: String,
    },

    /// Field value is below the minimum allowed value.
    #[error("field '{field}' value {value} is below minimum {min}")]
    ValueTooLow {
        /// The name of the configuration field
        field: &'static str,
        /// The actual value that was provided
        value: String,
        /// The minimum allowed value
        min: String,
    },

    /// Field value is invalid for reasons other than range.
    #[error("field '{field}' has invalid value: {reason}")]
    ValueInvalid {
        /// The name of the configuration field
        field: &'static str,
        /// The reason why the value is invalid
        reason: String,
    },
}

impl ConfigValidationError {
    /// Returns the field name associated with this error.
    #[must_use]
    pub fn field_name(&self) -> &'static str {
        match self {
            ConfigValidationError::ValueTooHigh { field, .. }
            | ConfigValidationError::ValueTooLow { field, .. }
            | ConfigValidationError::ValueInvalid { field, .. } => field,
        }
    }

    /// Creates a new `ValueTooHigh` error.
    pub fn too_high<V: fmt::Display, M: fmt::Display>(
        field: &'static str,
        value: V,
        max: M,
    ) -> Self {
        ConfigValidationError::ValueTooHigh {
            field,
            value: value.to_string(),
            max: max.to_string(),
        }
    }

    /// Creates a new `ValueTooLow` error.
    pub fn too_low<V: fmt::Display, M: fmt::Display>(
        field: &'static str,
        value: V,
        min: M,
    ) -> Self {
        ConfigValidationError::ValueTooLow {
            field,
            value: value.to_string(),
            min: min.to_string(),
        }
    }

    /// Creates a new `ValueInvalid` error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigValidationError::ValueInvalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result of a successful configuration validation.
///
/// A valid configuration may still carry warnings for settings that are
/// legal but likely unintended (e.g. a sub-second breaker reset delay).
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings about suboptimal settings.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Creates an empty validation result with no warnings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validation result carrying the given warnings.
    pub fn with_warnings(warnings: Vec<String>) -> Self {
        Self { warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display() {
        let err = Error::network("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_timeout_error_display() {
        let err = Error::timeout_after(Duration::from_millis(5000));
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn test_rate_limit_carries_remaining_window() {
        let err = Error::rate_limit(Duration::from_millis(250));
        assert_eq!(err.as_rate_limit(), Some(Duration::from_millis(250)));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(250)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_circuit_open_retry_after() {
        let err = Error::circuit_open(Some(Duration::from_secs(3)));
        assert_eq!(err.as_circuit_open(), Some(Some(Duration::from_secs(3))));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("3000ms"));

        let err = Error::circuit_open(None);
        assert_eq!(err.as_circuit_open(), Some(None));
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_schema_validation_joins_violations() {
        let err =
            Error::schema_validation(vec!["age: not a number".into(), "name: missing".into()]);
        let text = err.to_string();
        assert!(text.contains("age: not a number; name: missing"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_validation_field_name() {
        let err = ConfigValidationError::too_high("attempts", 15, 10);
        assert_eq!(err.field_name(), "attempts");
        assert!(err.to_string().contains("attempts"));
        assert!(err.to_string().contains("15"));

        let err = ConfigValidationError::too_low("initial_interval_ms", 5, 10);
        assert_eq!(err.field_name(), "initial_interval_ms");

        let err = ConfigValidationError::invalid("factor", "must be at least 1.0");
        assert_eq!(err.field_name(), "factor");
    }

    #[test]
    fn test_config_error_converts_into_pipeline_error() {
        let err: Error = ConfigValidationError::invalid("factor", "nope").into();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation_result_warnings() {
        let result = ValidationResult::new();
        assert!(result.warnings.is_empty());

        let result = ValidationResult::with_warnings(vec!["short window".into()]);
        assert_eq!(result.warnings.len(), 1);
    }
}
