// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline configuration
//!
//! [`PipelineConfig`] is the typed configuration handed to
//! [`ExportPipeline::new`](crate::ExportPipeline::new). [`PipelineSettings`]
//! is its file form, loaded from YAML and environment variables.
//!
//! # Environment Variables
//!
//! The following environment variables are supported:
//!
//! - `TELEMETRY_PIPELINE_CONFIG` - Path to the settings file
//!   (default: `<config dir>/telemetry-pipeline/config.yaml`)
//! - `TELEMETRY_PIPELINE_ENDPOINT` - Override the collector endpoint
//! - `TELEMETRY_PIPELINE_QUEUE_CAPACITY` - Override the inbound queue capacity
//! - `TELEMETRY_PIPELINE_BUFFER_CAPACITY` - Override the retry buffer capacity
//! - `TELEMETRY_PIPELINE_CHECK_INTERVAL_SECS` - Override the health probe interval
//!
//! # Example
//!
//! ```no_run
//! use telemetry_pipeline::config::PipelineSettings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineSettings::load_with_env()?.into_config()?;
//! println!("Delivering to {}", config.endpoint);
//! # Ok(())
//! # }
//! ```

mod settings;

pub use settings::{
    BreakerSettings, BufferSettings, HealthSettings, PipelineSettings, RetrySettings,
    ENV_BUFFER_CAPACITY, ENV_CHECK_INTERVAL_SECS, ENV_CONFIG_PATH, ENV_ENDPOINT,
    ENV_QUEUE_CAPACITY,
};

use crate::error::{PipelineError, Result};
use crate::health::HealthConfig;
use crate::runtime::{BufferConfig, CircuitBreakerConfig, MetricsConfig, RetryPolicy};
use std::time::Duration;

/// Default collector endpoint (OTLP gRPC on localhost).
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4317";

/// Complete configuration of an export pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Collector endpoint, used for probing and span attributes.
    pub endpoint: String,
    /// Capacity of the inbound submission queue.
    pub queue_capacity: usize,
    /// Time between periodic buffer reconciliation passes.
    pub reconcile_interval: Duration,
    /// Upper bound for a single export attempt.
    pub attempt_timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub buffer: BufferConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            queue_capacity: 1000,
            reconcile_interval: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            buffer: BufferConfig::default(),
            health: HealthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with defaults for `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Set the inbound queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the reconciliation interval.
    #[must_use]
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set the per-attempt export timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the circuit breaker configuration.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the buffer configuration.
    #[must_use]
    pub fn with_buffer(mut self, config: BufferConfig) -> Self {
        self.buffer = config;
        self
    }

    /// Set the health probe configuration.
    #[must_use]
    pub fn with_health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    /// Set the metrics configuration.
    #[must_use]
    pub fn with_metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = config;
        self
    }

    /// Check every section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(PipelineError::Config("endpoint must not be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.reconcile_interval.is_zero() {
            return Err(PipelineError::Config(
                "reconcile_interval must be greater than 0".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(PipelineError::Config(
                "attempt_timeout must be greater than 0".to_string(),
            ));
        }
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.buffer.validate()?;
        self.health.validate()
    }
}
