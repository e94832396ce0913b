// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policy and executor for export attempts.
//!
//! Every attempt runs under its own timeout. A failed or timed-out attempt is
//! followed by an exponentially growing delay, optionally jittered, until the
//! retry budget is spent. No delay follows the final attempt.
//!
//! # Example
//!
//! ```
//! use telemetry_pipeline::runtime::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .with_max_retries(3)
//!     .with_initial_delay(Duration::from_secs(1))
//!     .with_jitter(false);
//!
//! assert_eq!(policy.delay(0), Duration::from_secs(1));
//! assert_eq!(policy.delay(1), Duration::from_secs(2));
//! assert_eq!(policy.delay(2), Duration::from_secs(4));
//! ```

use crate::error::{ExportError, PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Retry Policy
// =============================================================================

/// Exponential backoff policy with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` attempts in total.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt, at least 1.
    pub backoff_multiplier: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes a single attempt.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the multiplier for exponential growth.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check the policy for values the executor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PipelineError::Config(format!(
                "retry backoff_multiplier must be a finite value >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(PipelineError::Config(
                "retry max_delay must not be smaller than initial_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before the retry that follows `attempt` (0-indexed), without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = nanos.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }

    /// Delay before the retry that follows `attempt`, with jitter applied if enabled.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter {
            base.mul_f64(0.5 + rand::random::<f64>() * 0.5)
        } else {
            base
        }
    }
}

// =============================================================================
// Retry Executor
// =============================================================================

/// Result of running an operation through [`RetryExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// An attempt succeeded.
    Delivered { attempts: u32 },
    /// Every attempt failed; `last_error` is the final attempt's failure.
    Exhausted {
        attempts: u32,
        last_error: ExportError,
    },
}

impl RetryOutcome {
    /// Returns `true` if an attempt succeeded.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, RetryOutcome::Delivered { .. })
    }

    /// Number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Delivered { attempts } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Number of attempts beyond the first.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.attempts().saturating_sub(1)
    }
}

/// Runs export attempts with a per-attempt timeout and backoff between them.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl RetryExecutor {
    /// Create an executor.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the policy is invalid or the
    /// attempt timeout is zero.
    pub fn new(policy: RetryPolicy, attempt_timeout: Duration) -> Result<Self> {
        policy.validate()?;
        if attempt_timeout.is_zero() {
            return Err(PipelineError::Config(
                "attempt timeout must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            policy,
            attempt_timeout,
        })
    }

    /// The retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Run `operation` until it succeeds or the retry budget is spent.
    ///
    /// The closure receives the attempt timeout so it can pass it on to the
    /// exporter; the executor enforces the same bound from the outside.
    pub async fn execute<F, Fut>(&self, mut operation: F) -> RetryOutcome
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = std::result::Result<(), ExportError>>,
    {
        let mut attempt = 0;

        loop {
            let result =
                match tokio::time::timeout(self.attempt_timeout, operation(self.attempt_timeout))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExportError::Timeout(self.attempt_timeout)),
                };

            let error = match result {
                Ok(()) => {
                    return RetryOutcome::Delivered {
                        attempts: attempt + 1,
                    }
                }
                Err(e) => e,
            };

            if attempt >= self.policy.max_retries {
                warn!(
                    target: "telemetry_pipeline::retry",
                    attempts = attempt + 1,
                    error = %error,
                    "export failed, retries exhausted"
                );
                return RetryOutcome::Exhausted {
                    attempts: attempt + 1,
                    last_error: error,
                };
            }

            let delay = self.policy.delay(attempt);
            debug!(
                target: "telemetry_pipeline::retry",
                attempt = attempt + 1,
                error_kind = error.kind(),
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "export attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
