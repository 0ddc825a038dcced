//! Timeout policy.
//!
//! Races the inner future against a deadline. If the deadline elapses first
//! the policy drops its interest in the result and fails with
//! [`Error::Timeout`] carrying the configured duration; a late-arriving
//! success is discarded. The policy does not abort the underlying transport
//! operation, that is the transport collaborator's concern.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Deadline wrapper around a single inner call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Creates a policy with the given deadline.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Returns the configured deadline.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Runs the inner future under the deadline.
    pub async fn execute<T, Fut>(&self, inner: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.duration, inner).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    timeout_ms = self.duration.as_millis() as u64,
                    "deadline elapsed before the inner call settled"
                );
                Err(Error::timeout_after(self.duration))
            }
        }
    }
}
