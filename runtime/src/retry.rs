//! Bounded retry for a single handler invocation.
//!
//! The consumer loop wraps every handler call in a [`RetryExecutor`]. The
//! policy is deliberately simple: a fixed number of attempts with a fixed
//! delay between them, no jitter and no backoff growth. Every error counts as
//! retryable; classification happens after exhaustion, when the message is
//! dead-lettered.
//!
//! Shutdown is checked before each attempt and during each delay, so a
//! stopping process never starts another attempt.
//!
//! # Example
//!
//! ```rust
//! use eventline_core::shutdown::ShutdownSignal;
//! use eventline_runtime::retry::{RetryExecutor, RetryOutcome};
//!
//! # async fn example() {
//! let executor = RetryExecutor::default(); // 3 attempts, 100ms apart
//!
//! let outcome = executor
//!     .execute(&ShutdownSignal::never(), |_attempt| async { Ok::<_, String>(()) })
//!     .await;
//!
//! assert!(matches!(outcome, RetryOutcome::Succeeded { attempts: 1 }));
//! # }
//! ```

use crate::metrics::RetryMetrics;
use eventline_core::shutdown::ShutdownSignal;
use std::future::Future;
use std::time::Duration;

/// Attempts made by the default policy (1 initial + 2 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts in the default policy.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Fixed-delay retry policy.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `delay`: 100ms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Pause between consecutive attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<E> {
    /// An attempt succeeded.
    Succeeded {
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: E,
    },
    /// Shutdown was requested before the operation succeeded.
    Cancelled {
        /// Attempts started before cancellation
        attempts: u32,
    },
}

/// Runs an operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor for `policy`.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `operation` until it succeeds, the attempts run out, or
    /// `shutdown` fires.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<F, Fut, E>(&self, shutdown: &ShutdownSignal, mut operation: F) -> RetryOutcome<E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if shutdown.is_triggered() {
                return RetryOutcome::Cancelled { attempts: attempt };
            }

            attempt += 1;
            RetryMetrics::record_attempt();

            match operation(attempt).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Operation succeeded after retry");
                    }
                    return RetryOutcome::Succeeded { attempts: attempt };
                },
                Err(err) => {
                    if attempt >= max_attempts {
                        RetryMetrics::record_exhausted();
                        tracing::error!(
                            attempts = attempt,
                            error = %err,
                            "Operation failed after max attempts"
                        );
                        return RetryOutcome::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        };
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = self.policy.delay.as_millis(),
                        error = %err,
                        "Operation failed, retrying..."
                    );

                    tokio::select! {
                        () = shutdown.cancelled() => {
                            tracing::debug!(attempt, "Retry delay interrupted by shutdown");
                            return RetryOutcome::Cancelled { attempts: attempt };
                        }
                        () = tokio::time::sleep(self.policy.delay) => {}
                    }
                },
            }
        }
    }
}
