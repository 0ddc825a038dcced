//! Sliding-window circuit breaker.
//!
//! Tracks the outcomes of recent admitted calls in a bounded window and trips
//! open when the failure rate or the slow-call rate crosses its threshold.
//! While open, calls are rejected without reaching the transport. After a
//! cool-down the breaker moves to half-open and lets a limited number of
//! probe calls through; their outcomes decide whether the circuit closes
//! again or re-opens.
//!
//! State lives behind a `tokio::sync::Mutex`, shared by every clone of the
//! built client. The lock is never held across an await.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ConfigValidationError, Error, Result, ValidationResult};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls flow and outcomes are recorded.
    Closed,
    /// Tripped, calls are rejected until the cool-down elapses.
    Open,
    /// Probing, a limited number of calls are admitted to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Outcome of one admitted call, as recorded in the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    Success,
    Slow,
    Failure,
}

/// Breaker lifecycle events, published to an optional channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// The breaker transitioned between states.
    StateChanged {
        /// State before the transition.
        from: CircuitState,
        /// State after the transition.
        to: CircuitState,
    },
    /// A call was rejected because the circuit was open or half-open probes
    /// were exhausted.
    RequestRejected {
        /// State the breaker was in when it rejected the call.
        state: CircuitState,
    },
    /// A failure outcome was recorded.
    FailureRecorded {
        /// Failure outcomes currently in the sliding window.
        failure_count: usize,
    },
    /// A success outcome was recorded.
    SuccessRecorded {
        /// Success outcomes currently in the sliding window.
        success_count: usize,
    },
}

/// Predicate deciding which errors count against the breaker.
pub type ErrorFilter = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of recent call outcomes retained.
    pub sliding_window_size: usize,
    /// Outcomes required before rates are evaluated at all.
    pub minimum_number_of_calls: usize,
    /// Failure rate (percent) at or above which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Slow-call rate (percent) at or above which the circuit opens.
    pub slow_call_rate_threshold: f64,
    /// Calls taking at least this long count as slow.
    pub slow_call_duration_threshold: Duration,
    /// Cool-down in the open state before probing begins.
    pub open_state_delay: Duration,
    /// Probe calls admitted in the half-open state.
    pub permitted_calls_in_half_open: u32,
    /// Maximum time to remain half-open waiting for probe outcomes before
    /// re-opening. Zero means wait indefinitely.
    pub half_open_max_delay: Duration,
}

impl CircuitBreakerConfig {
    /// Validates the circuit breaker configuration.
    ///
    /// # Validation Rules
    ///
    /// - `sliding_window_size` must be in 1..=10000
    /// - `minimum_number_of_calls` must be > 0
    /// - rate thresholds must be in (0.0, 100.0]
    /// - `permitted_calls_in_half_open` must be > 0
    pub fn validate(&self) -> std::result::Result<ValidationResult, ConfigValidationError> {
        let mut warnings = Vec::new();

        if self.sliding_window_size == 0 {
            return Err(ConfigValidationError::too_low(
                "sliding_window_size",
                self.sliding_window_size,
                1,
            ));
        }
        if self.sliding_window_size > 10_000 {
            return Err(ConfigValidationError::too_high(
                "sliding_window_size",
                self.sliding_window_size,
                10_000,
            ));
        }
        if self.minimum_number_of_calls == 0 {
            return Err(ConfigValidationError::too_low(
                "minimum_number_of_calls",
                self.minimum_number_of_calls,
                1,
            ));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(ConfigValidationError::invalid(
                "failure_rate_threshold",
                format!("{} is not in (0, 100]", self.failure_rate_threshold),
            ));
        }
        if !(self.slow_call_rate_threshold > 0.0 && self.slow_call_rate_threshold <= 100.0) {
            return Err(ConfigValidationError::invalid(
                "slow_call_rate_threshold",
                format!("{} is not in (0, 100]", self.slow_call_rate_threshold),
            ));
        }
        if self.permitted_calls_in_half_open == 0 {
            return Err(ConfigValidationError::too_low(
                "permitted_calls_in_half_open",
                self.permitted_calls_in_half_open,
                1,
            ));
        }
        if self.minimum_number_of_calls > self.sliding_window_size {
            warnings.push(format!(
                "minimum_number_of_calls ({}) exceeds sliding_window_size ({}), rates will never be evaluated",
                self.minimum_number_of_calls, self.sliding_window_size
            ));
        }
        if self.open_state_delay < Duration::from_millis(100) {
            warnings.push(format!(
                "open_state_delay {:?} is very short, probing will begin almost immediately",
                self.open_state_delay
            ));
        }

        Ok(ValidationResult::with_warnings(warnings))
    }

    /// Sets the sliding window size.
    pub fn with_sliding_window_size(mut self, size: usize) -> Self {
        self.sliding_window_size = size;
        self
    }

    /// Sets the minimum outcomes before rates are evaluated.
    pub fn with_minimum_number_of_calls(mut self, calls: usize) -> Self {
        self.minimum_number_of_calls = calls;
        self
    }

    /// Sets the failure rate threshold in percent.
    pub fn with_failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = threshold;
        self
    }

    /// Sets the slow-call rate threshold in percent.
    pub fn with_slow_call_rate_threshold(mut self, threshold: f64) -> Self {
        self.slow_call_rate_threshold = threshold;
        self
    }

    /// Sets the slow-call duration threshold.
    pub fn with_slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_duration_threshold = threshold;
        self
    }

    /// Sets the open-state cool-down.
    pub fn with_open_state_delay(mut self, delay: Duration) -> Self {
        self.open_state_delay = delay;
        self
    }

    /// Sets the number of probe calls admitted in half-open.
    pub fn with_permitted_calls_in_half_open(mut self, calls: u32) -> Self {
        self.permitted_calls_in_half_open = calls;
        self
    }

    /// Sets the maximum half-open dwell time (zero for unbounded).
    pub fn with_half_open_max_delay(mut self, delay: Duration) -> Self {
        self.half_open_max_delay = delay;
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            open_state_delay: Duration::from_secs(30),
            permitted_calls_in_half_open: 3,
            half_open_max_delay: Duration::ZERO,
        }
    }
}

/// Mutable breaker state.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Recent outcomes, oldest first, bounded by `sliding_window_size`.
    window: VecDeque<CallOutcome>,
    /// When the current state was entered.
    transitioned_at: Instant,
    /// Probe permits issued while half-open.
    half_open_permits: u32,
    /// Successful probes while half-open.
    half_open_successes: u32,
}

/// Sliding-window circuit breaker shared across clones of the built client.
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<tokio::sync::Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
    /// Errors for which `filter` returns false do not count against the
    /// breaker.
    filter: Option<ErrorFilter>,
    events: Option<mpsc::UnboundedSender<CircuitBreakerEvent>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("has_filter", &self.filter.is_some())
            .field("has_events", &self.events.is_some())
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size),
                transitioned_at: Instant::now(),
                half_open_permits: 0,
                half_open_successes: 0,
            })),
            config,
            filter: None,
            events: None,
        }
    }

    /// Attaches a channel that receives breaker lifecycle events.
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<CircuitBreakerEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Attaches a predicate deciding which errors count against the breaker.
    /// Errors the predicate rejects are passed through without recording a
    /// failure.
    pub fn with_error_filter(mut self, filter: ErrorFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn emit(&self, event: CircuitBreakerEvent) {
        if let Some(sender) = &self.events {
            // A dropped receiver just means nobody is listening.
            let _ = sender.send(event);
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        info!(from = %from, to = %to, "circuit breaker state changed");
        state.state = to;
        state.transitioned_at = Instant::now();
        if to == CircuitState::HalfOpen {
            state.half_open_permits = 0;
            state.half_open_successes = 0;
        }
        self.emit(CircuitBreakerEvent::StateChanged { from, to });
    }

    /// Asks the breaker for admission before an attempt scope runs.
    ///
    /// Returns `Ok(())` when the call may proceed; the caller must then
    /// report the outcome through [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure). Rejections fail with
    /// [`Error::CircuitOpen`], carrying the remaining cool-down when the
    /// circuit is open.
    pub async fn allow_request(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = state.transitioned_at.elapsed();
                if elapsed >= self.config.open_state_delay {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.half_open_permits = 1;
                    debug!("first half-open probe admitted");
                    Ok(())
                } else {
                    let retry_after = self.config.open_state_delay - elapsed;
                    self.emit(CircuitBreakerEvent::RequestRejected {
                        state: CircuitState::Open,
                    });
                    warn!(
                        retry_after_ms = retry_after.as_millis() as u64,
                        "circuit open, request rejected"
                    );
                    Err(Error::circuit_open(Some(retry_after)))
                }
            }
            CircuitState::HalfOpen => {
                // A half-open breaker that has waited too long for probe
                // outcomes re-opens rather than lingering.
                if self.config.half_open_max_delay > Duration::ZERO
                    && state.transitioned_at.elapsed() >= self.config.half_open_max_delay
                {
                    self.transition(&mut state, CircuitState::Open);
                    self.emit(CircuitBreakerEvent::RequestRejected {
                        state: CircuitState::Open,
                    });
                    return Err(Error::circuit_open(Some(self.config.open_state_delay)));
                }
                if state.half_open_permits < self.config.permitted_calls_in_half_open {
                    state.half_open_permits += 1;
                    debug!(
                        permits = state.half_open_permits,
                        "half-open probe admitted"
                    );
                    Ok(())
                } else {
                    self.emit(CircuitBreakerEvent::RequestRejected {
                        state: CircuitState::HalfOpen,
                    });
                    warn!("half-open probe budget exhausted, request rejected");
                    Err(Error::circuit_open(None))
                }
            }
        }
    }

    /// Records a successful admitted call with its observed duration.
    pub async fn record_success(&self, duration: Duration) {
        let mut state = self.state.lock().await;
        let outcome = if duration >= self.config.slow_call_duration_threshold {
            CallOutcome::Slow
        } else {
            CallOutcome::Success
        };

        match state.state {
            CircuitState::HalfOpen => {
                if outcome == CallOutcome::Slow {
                    // A slow probe is not a recovery signal.
                    warn!("slow probe in half-open, circuit re-opened");
                    self.transition(&mut state, CircuitState::Open);
                    return;
                }
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.permitted_calls_in_half_open {
                    state.window.clear();
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
            _ => {
                self.push_outcome(&mut state, outcome);
                let successes = state
                    .window
                    .iter()
                    .filter(|o| **o == CallOutcome::Success)
                    .count();
                self.emit(CircuitBreakerEvent::SuccessRecorded {
                    success_count: successes,
                });
                self.evaluate(&mut state);
            }
        }
    }

    /// Records a failed admitted call. Errors the configured filter rejects
    /// do not count as a failure outcome; in half-open they hand the probe
    /// permit back so the breaker cannot run out of probes without a verdict.
    pub async fn record_failure(&self, duration: Duration, error: &Error) {
        if let Some(filter) = &self.filter {
            if !filter(error) {
                debug!(error = %error, "error not relevant to circuit breaker");
                let mut state = self.state.lock().await;
                if state.state == CircuitState::HalfOpen {
                    state.half_open_permits = state.half_open_permits.saturating_sub(1);
                }
                return;
            }
        }

        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::HalfOpen => {
                warn!(error = %error, "probe failed in half-open, circuit re-opened");
                self.transition(&mut state, CircuitState::Open);
            }
            _ => {
                let outcome = if duration >= self.config.slow_call_duration_threshold {
                    CallOutcome::Slow
                } else {
                    CallOutcome::Failure
                };
                self.push_outcome(&mut state, outcome);
                let failures = state
                    .window
                    .iter()
                    .filter(|o| **o == CallOutcome::Failure)
                    .count();
                self.emit(CircuitBreakerEvent::FailureRecorded {
                    failure_count: failures,
                });
                self.evaluate(&mut state);
            }
        }
    }

    /// Current breaker state.
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Resets the breaker to closed with an empty window.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.window.clear();
        state.half_open_permits = 0;
        state.half_open_successes = 0;
        self.transition(&mut state, CircuitState::Closed);
    }

    fn push_outcome(&self, state: &mut BreakerState, outcome: CallOutcome) {
        if state.window.len() == self.config.sliding_window_size {
            state.window.pop_front();
        }
        state.window.push_back(outcome);
    }

    /// Evaluates window rates and trips the circuit when a threshold is
    /// crossed. Only meaningful in the closed state.
    fn evaluate(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Closed {
            return;
        }
        let total = state.window.len();
        if total < self.config.minimum_number_of_calls {
            return;
        }

        let failures = state
            .window
            .iter()
            .filter(|o| **o == CallOutcome::Failure)
            .count();
        let slow = state
            .window
            .iter()
            .filter(|o| **o == CallOutcome::Slow)
            .count();

        let failure_rate = failures as f64 * 100.0 / total as f64;
        let slow_rate = slow as f64 * 100.0 / total as f64;

        if failure_rate >= self.config.failure_rate_threshold {
            warn!(
                failure_rate = failure_rate,
                threshold = self.config.failure_rate_threshold,
                "failure rate threshold crossed, circuit opened"
            );
            self.transition(state, CircuitState::Open);
        } else if slow_rate >= self.config.slow_call_rate_threshold {
            warn!(
                slow_call_rate = slow_rate,
                threshold = self.config.slow_call_rate_threshold,
                "slow call rate threshold crossed, circuit opened"
            );
            self.transition(state, CircuitState::Open);
        }
    }
}
