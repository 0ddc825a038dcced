//! Retry policy with exponential backoff and jitter.
//!
//! One policy instance drives one concern: the per-call retry around the
//! timed transport call, or the client-wide admission retry that sleeps out
//! rate-limit windows. On each failure a rejection predicate decides whether
//! to stop, back off, or wait an exact delay the error itself carries.
//!
//! The attempt budget is total tries, not retries: the first try counts as
//! attempt 1. When the budget is spent on an HTTP-level failure the policy
//! signals [`Error::RetryExhausted`] carrying the final response; non-HTTP
//! failures (timeout, rate limit, network) propagate unchanged.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ConfigValidationError, Error, Result, ValidationResult};

/// Outcome of consulting the rejection predicate for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop retrying and propagate the error.
    Stop,
    /// Retry after the computed backoff delay.
    Backoff,
    /// Retry after exactly this delay (e.g. a rate-limit window remainder or
    /// a `Retry-After` header).
    After(Duration),
}

/// Rejection predicate: `(error, attempt number) -> decision`.
pub type RetryPredicate = Arc<dyn Fn(&Error, u32) -> RetryDecision + Send + Sync>;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total tries, the first try counts as attempt 1.
    pub attempts: u32,
    /// Base delay for the first backoff.
    pub initial_interval: Duration,
    /// Upper bound for any computed backoff delay.
    pub max_interval: Duration,
    /// Exponential growth factor applied per attempt.
    pub factor: f64,
    /// Jitter fraction in `[0, 1]`; the actual delay is sampled uniformly in
    /// `[d - d*j, d + d*j]`, floored at zero. Zero disables jitter.
    pub jitter_adjustment: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            factor: 2.0,
            jitter_adjustment: 0.1,
        }
    }
}

impl RetryConfig {
    /// Creates a configuration with the given total attempt budget.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    /// Sets the base backoff interval.
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Sets the backoff cap.
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Sets the exponential growth factor.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, jitter_adjustment: f64) -> Self {
        self.jitter_adjustment = jitter_adjustment;
        self
    }

    /// Validates the retry configuration.
    ///
    /// # Validation Rules
    ///
    /// - `attempts` must be >= 1 and <= 10
    /// - `initial_interval` must be >= 10ms
    /// - `factor` must be >= 1.0
    /// - `jitter_adjustment` must be within `[0, 1]`
    ///
    /// A `max_interval` below `initial_interval` is legal but produces a
    /// warning since it flattens the backoff curve to the cap.
    pub fn validate(&self) -> std::result::Result<ValidationResult, ConfigValidationError> {
        let mut warnings = Vec::new();

        if self.attempts == 0 {
            return Err(ConfigValidationError::too_low("attempts", self.attempts, 1));
        }
        if self.attempts > 10 {
            return Err(ConfigValidationError::too_high(
                "attempts",
                self.attempts,
                10,
            ));
        }
        if self.initial_interval < Duration::from_millis(10) {
            return Err(ConfigValidationError::too_low(
                "initial_interval_ms",
                self.initial_interval.as_millis(),
                10,
            ));
        }
        if self.factor < 1.0 {
            return Err(ConfigValidationError::invalid(
                "factor",
                "factor must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_adjustment) {
            return Err(ConfigValidationError::invalid(
                "jitter_adjustment",
                "jitter_adjustment must be within [0, 1]",
            ));
        }
        if self.max_interval < self.initial_interval {
            warnings.push(format!(
                "max_interval {:?} is below initial_interval {:?}, every delay will be capped",
                self.max_interval, self.initial_interval
            ));
        }

        Ok(ValidationResult::with_warnings(warnings))
    }

    /// Computes the backoff delay for the given attempt (1-based), applying
    /// the cap and jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_millis() as f64
            * self.factor.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_interval.as_millis() as f64);

        let delayed = if self.jitter_adjustment > 0.0 {
            use rand::Rng;
            let mut rng = rand::rngs::ThreadRng::default();
            let jitter = capped * self.jitter_adjustment;
            (capped + rng.random_range(-jitter..=jitter)).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(delayed as u64)
    }
}

/// Ephemeral record of one pass through the inner operation.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    /// 1-based attempt index.
    pub index: u32,
    /// How long the attempt ran before settling.
    pub duration: Duration,
}

/// Retry policy: a configuration plus a rejection predicate.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("predicate", &"<predicate>")
            .finish()
    }
}

impl RetryPolicy {
    /// Creates a policy with the default rejection predicate.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Self::default_predicate(),
        }
    }

    /// Creates a policy with a custom rejection predicate.
    pub fn with_predicate(config: RetryConfig, predicate: RetryPredicate) -> Self {
        Self { config, predicate }
    }

    /// Replaces the configuration, keeping the predicate.
    pub fn with_config(&self, config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Arc::clone(&self.predicate),
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Default rejection predicate for the per-call retry.
    ///
    /// Retries network failures and timeouts with backoff, waits out a
    /// rate-limit window exactly, honors a `Retry-After` header on 429/5xx
    /// responses, backs off on 429/5xx otherwise, and stops for everything
    /// else (including schema validation failures).
    pub fn default_predicate() -> RetryPredicate {
        Arc::new(|error: &Error, _attempt: u32| match error {
            Error::Network(_) | Error::Timeout { .. } => RetryDecision::Backoff,
            Error::RateLimit { retry_after } => RetryDecision::After(*retry_after),
            Error::HttpResponse(envelope) => {
                let status = envelope.status.as_u16();
                if status == 429 || (500..600).contains(&status) {
                    match envelope.retry_after() {
                        Some(wait) => RetryDecision::After(wait),
                        None => RetryDecision::Backoff,
                    }
                } else {
                    RetryDecision::Stop
                }
            }
            _ => RetryDecision::Stop,
        })
    }

    /// Rejection predicate for rate-limit admission: sleeps exactly the
    /// remaining window on denial, stops for everything else.
    pub fn admission_predicate() -> RetryPredicate {
        Arc::new(|error: &Error, _attempt: u32| match error {
            Error::RateLimit { retry_after } => RetryDecision::After(*retry_after),
            _ => RetryDecision::Stop,
        })
    }

    /// Executes the operation under this policy.
    ///
    /// The operation receives the 1-based attempt index. Backoff delays are
    /// non-blocking waits; other calls on the same client keep progressing.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let budget = self.config.attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            match operation(attempt).await {
                Ok(value) => {
                    debug!(attempt, "attempt succeeded");
                    return Ok(value);
                }
                Err(error) => {
                    let record = Attempt {
                        index: attempt,
                        duration: started.elapsed(),
                    };

                    let decision = (self.predicate)(&error, attempt);
                    if decision == RetryDecision::Stop {
                        debug!(
                            attempt = record.index,
                            attempt_ms = record.duration.as_millis() as u64,
                            error = %error,
                            "failure is not retryable"
                        );
                        return Err(error);
                    }
                    if attempt >= budget {
                        return Err(Self::exhaust(budget, error));
                    }

                    let delay = match decision {
                        RetryDecision::Backoff => self.config.backoff_delay(attempt),
                        RetryDecision::After(wait) => wait,
                        RetryDecision::Stop => unreachable!(),
                    };

                    warn!(
                        attempt = record.index,
                        attempt_ms = record.duration.as_millis() as u64,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Wraps an exhausted HTTP-level failure; other errors pass through
    /// unchanged so retry never relabels a timeout or rate-limit denial.
    fn exhaust(attempts: u32, error: Error) -> Error {
        match error {
            Error::HttpResponse(envelope) => Error::retry_exhausted(attempts, envelope),
            other => other,
        }
    }
}
