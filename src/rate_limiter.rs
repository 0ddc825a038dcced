//! Fixed-window rate limiter.
//!
//! Admission control shared by every call issued through the same built
//! client: `limit_for_period` admissions per `limit_period` window. Callers
//! beyond quota are not queued internally; denial surfaces as
//! [`Error::RateLimit`] carrying the remaining time in the window, and the
//! companion admission retry is responsible for sleeping it out and
//! re-attempting. This keeps backpressure explicit rather than hidden in an
//! internal queue.
//!
//! Concurrent admissions may race for the last unit of quota; either may
//! win. Each decision is computed from a consistent snapshot taken under the
//! state lock, which is never held across an await.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ConfigValidationError, Error, Result, ValidationResult};

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Admissions allowed per window.
    pub limit_for_period: u32,
    /// Window length.
    pub limit_period: Duration,
}

impl RateLimiterConfig {
    /// Creates a configuration admitting `limit_for_period` calls per
    /// `limit_period`.
    pub fn new(limit_for_period: u32, limit_period: Duration) -> Self {
        Self {
            limit_for_period,
            limit_period,
        }
    }

    /// Validates the rate limiter configuration.
    ///
    /// # Validation Rules
    ///
    /// - `limit_for_period` must be > 0
    /// - `limit_period` must be >= 10ms
    pub fn validate(&self) -> std::result::Result<ValidationResult, ConfigValidationError> {
        let mut warnings = Vec::new();

        if self.limit_for_period == 0 {
            return Err(ConfigValidationError::too_low(
                "limit_for_period",
                self.limit_for_period,
                1,
            ));
        }
        if self.limit_period < Duration::from_millis(10) {
            return Err(ConfigValidationError::too_low(
                "limit_period_ms",
                self.limit_period.as_millis(),
                10,
            ));
        }
        if self.limit_period < Duration::from_millis(100) {
            warnings.push(format!(
                "limit_period {:?} is very short, admission windows will churn rapidly",
                self.limit_period
            ));
        }

        Ok(ValidationResult::with_warnings(warnings))
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // Default: 10 admissions per second
        Self::new(10, Duration::from_secs(1))
    }
}

/// Internal window state.
#[derive(Debug)]
struct WindowState {
    /// Quota remaining in the current window.
    remaining: u32,
    /// Start of the current window.
    window_start: Instant,
}

/// Fixed-window rate limiter.
///
/// Cloning shares the same window state; the built client hands one clone to
/// every concurrent call.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<WindowState>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    /// Creates a limiter with the given configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState {
                remaining: config.limit_for_period,
                window_start: Instant::now(),
            })),
            config,
        }
    }

    /// Attempts one admission without waiting.
    ///
    /// Admits and decrements while quota remains; resets the window when it
    /// has expired; otherwise fails with [`Error::RateLimit`] carrying the
    /// time until the window resets.
    pub async fn try_acquire(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.window_start);

        if elapsed >= self.config.limit_period {
            state.window_start = now;
            state.remaining = self.config.limit_for_period;
        }

        if state.remaining > 0 {
            state.remaining -= 1;
            debug!(remaining = state.remaining, "admission granted");
            Ok(())
        } else {
            let retry_after = self
                .config
                .limit_period
                .saturating_sub(now.duration_since(state.window_start));
            warn!(
                retry_after_ms = retry_after.as_millis() as u64,
                "admission denied, window exhausted"
            );
            Err(Error::rate_limit(retry_after))
        }
    }

    /// Waits until an admission is granted.
    ///
    /// Sleeps out the remaining window on denial and re-attempts.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire().await {
                Ok(()) => return,
                Err(error) => {
                    let wait = error
                        .as_rate_limit()
                        .unwrap_or(self.config.limit_period);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Quota remaining in the current window (refreshing an expired window
    /// first).
    pub async fn remaining(&self) -> u32 {
        let mut state = self.state.lock().await;
        if state.window_start.elapsed() >= self.config.limit_period {
            state.window_start = Instant::now();
            state.remaining = self.config.limit_for_period;
        }
        state.remaining
    }

    /// Resets the limiter to a fresh, full window.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.remaining = self.config.limit_for_period;
        state.window_start = Instant::now();
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.limit_for_period, 10);
        assert_eq!(config.limit_period, Duration::from_secs(1));
    }

    #[test]
    fn test_config_validate() {
        assert!(RateLimiterConfig::default().validate().is_ok());

        let config = RateLimiterConfig::new(0, Duration::from_secs(1));
        assert_eq!(
            config.validate().unwrap_err().field_name(),
            "limit_for_period"
        );

        let config = RateLimiterConfig::new(5, Duration::from_millis(5));
        assert!(config.validate().is_err());

        let config = RateLimiterConfig::new(5, Duration::from_millis(50));
        let result = config.validate().unwrap();
        assert!(!result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_admissions_within_quota() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, Duration::from_secs(1)));
        for _ in 0..3 {
            assert!(limiter.try_acquire().await.is_ok());
        }
        let denied = limiter.try_acquire().await;
        let retry_after = denied.unwrap_err().as_rate_limit().unwrap();
        assert!(retry_after <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_window_reset_restores_quota() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, Duration::from_millis(50)));
        assert!(limiter.try_acquire().await.is_ok());
        assert!(limiter.try_acquire().await.is_err());

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(limiter.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_denial_carries_remaining_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, Duration::from_millis(200)));
        assert!(limiter.try_acquire().await.is_ok());

        let error = limiter.try_acquire().await.unwrap_err();
        let retry_after = error.as_rate_limit().unwrap();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_acquire_waits_out_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(2, Duration::from_millis(100)));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_reset() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(2, Duration::from_secs(10)));
        assert!(limiter.try_acquire().await.is_ok());
        assert!(limiter.try_acquire().await.is_ok());
        assert!(limiter.try_acquire().await.is_err());

        limiter.reset().await;
        assert_eq!(limiter.remaining().await, 2);
        assert!(limiter.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_admissions_consume_quota_once() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10, Duration::from_secs(1)));
        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.try_acquire().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(limiter.remaining().await, 0);
        assert!(limiter.try_acquire().await.is_err());
    }
}
