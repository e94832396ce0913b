// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit breaker gating export attempts to the collector.
//!
//! The breaker stops the pipeline from hammering a collector that is down and
//! lets it probe for recovery after a cooldown.
//!
//! # States
//!
//! - **Closed**: Normal operation, exports pass through
//! - **Open**: Exports are refused until `recovery_timeout` has elapsed since
//!   the last recorded failure
//! - **Half-Open**: Trial exports are allowed; `success_threshold`
//!   consecutive successes close the circuit, any failure reopens it
//!
//! ```text
//! Closed ──failure_threshold──▶ Open ──recovery_timeout──▶ HalfOpen
//!   ▲                            ▲                            │
//!   │                            └─────────any failure────────┤
//!   └──────────────────success_threshold──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use telemetry_pipeline::runtime::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_recovery_timeout(Duration::from_secs(60)),
//! )
//! .unwrap();
//!
//! for _ in 0..3 {
//!     breaker.record_failure(Some(&"connection refused"));
//! }
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(!breaker.can_execute());
//! ```

use crate::error::{ExportError, PipelineError, Result};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, exports pass through normally.
    Closed,
    /// Circuit is open, exports are refused.
    Open,
    /// Circuit is half-open, trial exports test for recovery.
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by the metrics exposition (0=closed, 1=half-open, 2=open).
    #[must_use]
    pub fn as_gauge(&self) -> u64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Time since the last failure before an open circuit admits a trial.
    pub recovery_timeout: Duration,
    /// Upper bound for an operation run through [`CircuitBreaker::call`].
    pub call_timeout: Duration,
    /// Concurrent trial calls admitted while half-open. `None` admits every
    /// caller.
    pub half_open_max_requests: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            half_open_max_requests: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold for recovery.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the timeout applied by [`CircuitBreaker::call`].
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Limit the number of concurrent half-open trial calls.
    #[must_use]
    pub fn with_half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = Some(max);
        self
    }

    /// Check the configuration for values the breaker cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(PipelineError::Config(
                "circuit breaker failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(PipelineError::Config(
                "circuit breaker success_threshold must be greater than 0".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(PipelineError::Config(
                "circuit breaker call_timeout must be greater than 0".to_string(),
            ));
        }
        if self.half_open_max_requests == Some(0) {
            return Err(PipelineError::Config(
                "circuit breaker half_open_max_requests must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// How often each state transition has happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionCounts {
    pub closed_to_open: u64,
    pub open_to_half_open: u64,
    pub half_open_to_closed: u64,
    pub half_open_to_open: u64,
}

/// Point-in-time copy of the breaker's bookkeeping.
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub time_since_last_failure: Option<Duration>,
    pub time_since_last_success: Option<Duration>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub transitions: TransitionCounts,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    half_open_in_flight: u32,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    transitions: TransitionCounts,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            half_open_in_flight: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            transitions: TransitionCounts::default(),
        }
    }

    fn release_trial(&mut self) {
        self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
    }
}

/// Circuit breaker shared by every component that talks to the collector.
///
/// All bookkeeping sits behind one mutex that is never held across an await
/// point, so the gate is cheap to consult from any task.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        info!(
            target: "telemetry_pipeline::breaker",
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            call_timeout_ms = config.call_timeout.as_millis() as u64,
            "circuit breaker initialized"
        );
        Ok(Self {
            config,
            inner: Mutex::new(BreakerState::new()),
        })
    }

    /// Create a circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            inner: Mutex::new(BreakerState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, without triggering the open-to-half-open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Check whether an export may proceed.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here. With `half_open_max_requests` set, a `true` answer while
    /// half-open reserves a trial slot that the following
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure) releases. Outcomes of checks
    /// that never asked for a slot go through
    /// [`record_check_success`](Self::record_check_success) and
    /// [`record_check_failure`](Self::record_check_failure) instead.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.last_failure.map(|at| at.elapsed());
                if elapsed.is_none_or(|e| e >= self.config.recovery_timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.half_open_in_flight = 0;
                    inner.transitions.open_to_half_open += 1;
                    info!(
                        target: "telemetry_pipeline::breaker",
                        "circuit breaker transitioned: open -> half_open"
                    );
                    self.admit_trial(&mut inner)
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.admit_trial(&mut inner),
        };
        if !allowed {
            inner.total_rejections += 1;
        }
        allowed
    }

    fn admit_trial(&self, inner: &mut BreakerState) -> bool {
        match self.config.half_open_max_requests {
            None => true,
            Some(max) if inner.half_open_in_flight < max => {
                inner.half_open_in_flight += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Record a successful operation admitted by
    /// [`can_execute`](Self::can_execute).
    pub fn record_success(&self) {
        self.on_success(true);
    }

    /// Record a success observed outside the gate, such as a health check.
    /// It counts towards closing the circuit but leaves trial slots alone.
    pub fn record_check_success(&self) {
        self.on_success(false);
    }

    /// Record a failed operation admitted by [`can_execute`](Self::can_execute),
    /// optionally with the error that caused it.
    pub fn record_failure(&self, error: Option<&dyn fmt::Display>) {
        self.on_failure(error);
    }

    /// Record a failure observed outside the gate. A failure while half-open
    /// reopens the circuit and clears every trial slot, so this behaves like
    /// [`record_failure`](Self::record_failure).
    pub fn record_check_failure(&self, error: Option<&dyn fmt::Display>) {
        self.on_failure(error);
    }

    fn on_success(&self, holds_trial: bool) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.total_successes += 1;
        inner.last_success = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            if holds_trial {
                inner.release_trial();
            }
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.half_open_in_flight = 0;
                inner.transitions.half_open_to_closed += 1;
                info!(
                    target: "telemetry_pipeline::breaker",
                    "circuit breaker transitioned: half_open -> closed"
                );
                return;
            }
        }

        debug!(
            target: "telemetry_pipeline::breaker",
            state = %inner.state,
            success_count = inner.success_count,
            "operation succeeded"
        );
    }

    fn on_failure(&self, error: Option<&dyn fmt::Display>) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.success_count = 0;
        inner.total_failures += 1;
        inner.last_failure = Some(Instant::now());
        let reason = error.map(ToString::to_string).unwrap_or_default();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_in_flight = 0;
                inner.transitions.half_open_to_open += 1;
                warn!(
                    target: "telemetry_pipeline::breaker",
                    error = %reason,
                    "failure during recovery, circuit breaker transitioned: half_open -> open"
                );
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.transitions.closed_to_open += 1;
                warn!(
                    target: "telemetry_pipeline::breaker",
                    failure_count = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    error = %reason,
                    "failure threshold reached, circuit breaker transitioned: closed -> open"
                );
            }
            _ => {
                debug!(
                    target: "telemetry_pipeline::breaker",
                    state = %inner.state,
                    failure_count = inner.failure_count,
                    error = %reason,
                    "operation failed"
                );
            }
        }
    }

    /// Run an operation under circuit breaker protection.
    ///
    /// The operation is bounded by `call_timeout`; running out of time counts
    /// as a failure.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::CircuitOpen` without running the operation if
    /// the gate is closed, `PipelineError::Export(ExportError::Timeout)` if the
    /// operation overran, or the operation's own error.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.can_execute() {
            let retry_after = self.time_until_retry().unwrap_or_default();
            return Err(PipelineError::CircuitOpen(format!(
                "will admit a trial call in {retry_after:?}"
            )));
        }

        match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(Some(&e));
                Err(e)
            }
            Err(_) => {
                let e = ExportError::Timeout(self.config.call_timeout);
                self.record_failure(Some(&e));
                Err(e.into())
            }
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let old = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.last_failure = None;
        inner.last_success = Some(Instant::now());
        info!(
            target: "telemetry_pipeline::breaker",
            "circuit breaker manually reset: {old} -> closed"
        );
    }

    /// Manually open the circuit, starting a fresh recovery timeout.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        let old = inner.state;
        inner.state = CircuitState::Open;
        inner.half_open_in_flight = 0;
        inner.last_failure = Some(Instant::now());
        warn!(
            target: "telemetry_pipeline::breaker",
            "circuit breaker manually opened: {old} -> open"
        );
    }

    /// Time until an open circuit admits a trial call, `None` unless open.
    pub fn time_until_retry(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        Some(match inner.last_failure {
            Some(at) => self.config.recovery_timeout.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        })
    }

    /// Get the current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Get the current half-open success count.
    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.lock().success_count
    }

    /// Copy out the breaker's bookkeeping.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            time_since_last_failure: inner.last_failure.map(|at| at.elapsed()),
            time_since_last_success: inner.last_success.map(|at| at.elapsed()),
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            transitions: inner.transitions,
        }
    }

    /// Get the circuit breaker configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn breaker(
        failure_threshold: u32,
        success_threshold: u32,
        recovery: Duration,
    ) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(failure_threshold)
                .with_success_threshold(success_threshold)
                .with_recovery_timeout(recovery),
        )
        .unwrap()
    }

    fn fail(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            breaker.record_failure(Some(&"connection refused"));
        }
    }

    #[test]
    fn test_circuit_breaker_config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.half_open_max_requests, None);
    }

    #[test]
    fn test_circuit_breaker_config_validation() {
        assert_ok!(CircuitBreakerConfig::default().validate());
        assert_err!(CircuitBreakerConfig::new().with_failure_threshold(0).validate());
        assert_err!(CircuitBreakerConfig::new().with_success_threshold(0).validate());
        assert_err!(CircuitBreakerConfig::new()
            .with_call_timeout(Duration::ZERO)
            .validate());
        assert_err!(CircuitBreakerConfig::new()
            .with_half_open_max_requests(0)
            .validate());
        assert!(matches!(
            CircuitBreaker::new(CircuitBreakerConfig::new().with_failure_threshold(0)),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let breaker = CircuitBreaker::with_defaults();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert!(breaker.time_until_retry().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_failure_threshold() {
        let breaker = breaker(3, 2, Duration::from_secs(60));
        fail(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());

        fail(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.snapshot().transitions.closed_to_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3, 2, Duration::from_secs(60));
        fail(&breaker, 2);
        assert_eq!(breaker.failure_count(), 2);

        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        fail(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_scenario() {
        let breaker = breaker(3, 2, Duration::from_secs(60));
        fail(&breaker, 3);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let transitions = breaker.snapshot().transitions;
        assert_eq!(transitions.open_to_half_open, 1);
        assert_eq!(transitions.half_open_to_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_recovery_timeout() {
        let breaker = breaker(1, 1, Duration::from_secs(10));
        fail(&breaker, 1);

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_while_open_does_not_close() {
        let breaker = breaker(1, 1, Duration::from_secs(10));
        fail(&breaker, 1);

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker(2, 3, Duration::from_secs(5));
        fail(&breaker, 2);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.can_execute());

        breaker.record_success();
        fail(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.success_count(), 0);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.snapshot().transitions.half_open_to_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_unlimited_trials_by_default() {
        let breaker = breaker(1, 2, Duration::from_secs(1));
        fail(&breaker, 1);
        tokio::time::advance(Duration::from_secs(1)).await;

        for _ in 0..10 {
            assert!(breaker.can_execute());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_max_requests_limits_trials() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_success_threshold(3)
                .with_recovery_timeout(Duration::from_secs(1))
                .with_half_open_max_requests(1),
        )
        .unwrap();
        fail(&breaker, 1);
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(breaker.can_execute());
        assert!(!breaker.can_execute());

        breaker.record_success();
        assert!(breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_success_keeps_trial_slot_reserved() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_success_threshold(3)
                .with_recovery_timeout(Duration::from_secs(1))
                .with_half_open_max_requests(1),
        )
        .unwrap();
        fail(&breaker, 1);
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(breaker.can_execute());
        breaker.record_check_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.success_count(), 1);
        // The trial admitted above is still in flight.
        assert!(!breaker.can_execute());

        breaker.record_success();
        assert!(breaker.can_execute());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_failure_reopens_half_open() {
        let breaker = breaker(1, 2, Duration::from_secs(1));
        fail(&breaker, 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.can_execute());

        breaker.record_check_failure(Some(&"unreachable"));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().transitions.half_open_to_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_rejects_when_open() {
        let breaker = breaker(2, 1, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = breaker
                .call(|| async {
                    Err::<(), _>(PipelineError::Export(ExportError::Transport(
                        "refused".to_string(),
                    )))
                })
                .await;
        }

        let result = breaker.call(|| async { Ok::<_, PipelineError>("ok") }).await;
        assert!(matches!(result, Err(PipelineError::CircuitOpen(_))));
        assert_eq!(breaker.snapshot().total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_call_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, PipelineError>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::Export(ExportError::Timeout(_)))
        ));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_force_open() {
        let breaker = breaker(1, 1, Duration::from_secs(30));
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.time_until_retry(), Some(Duration::from_secs(30)));

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert!(breaker.snapshot().time_since_last_failure.is_none());
    }

    #[test]
    fn test_circuit_state_gauge() {
        assert_eq!(CircuitState::Closed.as_gauge(), 0);
        assert_eq!(CircuitState::HalfOpen.as_gauge(), 1);
        assert_eq!(CircuitState::Open.as_gauge(), 2);
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
