// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health tracking for the downstream collector.
//!
//! [`HealthTracker`] is the status state machine; [`HealthProbe`] is the
//! background loop that feeds it from a [`Prober`] and forwards every
//! outcome to the shared circuit breaker.
//!
//! ```text
//! Unknown | Degraded ──first success────────────────▶ Healthy
//! Unhealthy ─────────recovery_threshold successes───▶ Healthy
//! any ───────────────2..max_failures-1 failures─────▶ Degraded
//! any ───────────────max_failures failures──────────▶ Unhealthy
//! ```

mod probe;

pub use probe::{HealthProbe, Prober, TcpProber, DEFAULT_OTLP_PORT};

use crate::error::{PipelineError, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Health of the downstream collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// No probe has completed yet.
    #[default]
    Unknown,
    Healthy,
    /// Failing, but not yet for `max_failures` consecutive probes.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Gauge encoding used by the metrics exposition.
    #[must_use]
    pub fn as_gauge(&self) -> u64 {
        match self {
            HealthStatus::Unknown => 0,
            HealthStatus::Healthy => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for health probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Time between probes.
    pub check_interval: Duration,
    /// Upper bound for a single probe.
    pub probe_timeout: Duration,
    /// Consecutive failures that mark the collector unhealthy.
    pub max_failures: u32,
    /// Consecutive successes that bring an unhealthy collector back.
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            max_failures: 3,
            recovery_threshold: 2,
        }
    }
}

impl HealthConfig {
    /// Create a new health configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe interval.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the probe timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the failure count that marks the collector unhealthy.
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Set the success count needed to recover from unhealthy.
    #[must_use]
    pub fn with_recovery_threshold(mut self, threshold: u32) -> Self {
        self.recovery_threshold = threshold;
        self
    }

    /// Check the configuration for values the prober cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(PipelineError::Config(
                "health check_interval must be greater than 0".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(PipelineError::Config(
                "health probe_timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_failures == 0 || self.recovery_threshold == 0 {
            return Err(PipelineError::Config(
                "health max_failures and recovery_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A status change produced by a probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

impl HealthTransition {
    /// Entering healthy from any other status; buffered data should be
    /// drained right away.
    #[must_use]
    pub fn triggers_recovery_flush(&self) -> bool {
        self.to == HealthStatus::Healthy
    }

    /// Coming back from unhealthy.
    #[must_use]
    pub fn is_recovery(&self) -> bool {
        self.from == HealthStatus::Unhealthy && self.to == HealthStatus::Healthy
    }
}

/// Copy of the tracker's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub time_since_last_check: Option<Duration>,
    pub checks_performed: u64,
    pub checks_failed: u64,
    pub recoveries: u64,
}

/// The health status state machine.
///
/// Pure bookkeeping: it owns no timers and performs no I/O, so the probe
/// loop and tests drive it directly.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    config: HealthConfig,
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_check: Option<Instant>,
    checks_performed: u64,
    checks_failed: u64,
    recoveries: u64,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check: None,
            checks_performed: 0,
            checks_failed: 0,
            recoveries: 0,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Apply one probe outcome, returning the status change it caused.
    pub fn record_probe(&mut self, healthy: bool) -> Option<HealthTransition> {
        self.checks_performed += 1;
        self.last_check = Some(Instant::now());
        let from = self.status;

        if healthy {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            match self.status {
                HealthStatus::Unhealthy
                    if self.consecutive_successes >= self.config.recovery_threshold =>
                {
                    self.status = HealthStatus::Healthy;
                    self.recoveries += 1;
                }
                HealthStatus::Unknown | HealthStatus::Degraded => {
                    self.status = HealthStatus::Healthy;
                }
                _ => {}
            }
        } else {
            self.checks_failed += 1;
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.consecutive_failures >= self.config.max_failures {
                self.status = HealthStatus::Unhealthy;
            } else if self.consecutive_failures > 1 {
                self.status = HealthStatus::Degraded;
            }
        }

        (from != self.status).then_some(HealthTransition {
            from,
            to: self.status,
        })
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            time_since_last_check: self.last_check.map(|at| at.elapsed()),
            checks_performed: self.checks_performed,
            checks_failed: self.checks_failed,
            recoveries: self.recoveries,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }
}
