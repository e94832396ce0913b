// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{HealthConfig, HealthStatus, HealthTracker, HealthTransition};
use crate::error::{PipelineError, Result};
use crate::runtime::{CircuitBreaker, PipelineMetrics};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Default OTLP gRPC port, used when the endpoint names none.
pub const DEFAULT_OTLP_PORT: u16 = 4317;

/// Checks whether the downstream collector is reachable.
pub trait Prober: Send + Sync + 'static {
    /// Probe once. `timeout` is advisory; the caller enforces it.
    fn probe(&self, timeout: Duration) -> impl Future<Output = bool> + Send;
}

/// Probes a collector by opening a TCP connection to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpProber {
    host: String,
    port: u16,
}

impl TcpProber {
    /// Create a prober for an endpoint such as `http://collector:4317`.
    ///
    /// A missing scheme is read as `http`; a missing port falls back to
    /// [`DEFAULT_OTLP_PORT`].
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the endpoint cannot be parsed or
    /// has no host.
    pub fn new(endpoint: &str) -> Result<Self> {
        let raw = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let url = Url::parse(&raw)
            .map_err(|e| PipelineError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| PipelineError::Config(format!("endpoint '{endpoint}' has no host")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        // The parser drops ports equal to the scheme default, so look for
        // them in the raw string before falling back.
        let port = url
            .port()
            .or_else(|| {
                url.port_or_known_default()
                    .filter(|port| raw.contains(&format!(":{port}")))
            })
            .unwrap_or(DEFAULT_OTLP_PORT);

        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Prober for TcpProber {
    async fn probe(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
        {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(
                    target: "telemetry_pipeline::health",
                    host = %self.host,
                    port = self.port,
                    error = %e,
                    "collector connection failed"
                );
                false
            }
            Err(_) => {
                debug!(
                    target: "telemetry_pipeline::health",
                    host = %self.host,
                    port = self.port,
                    timeout_ms = timeout.as_millis() as u64,
                    "collector connection timed out"
                );
                false
            }
        }
    }
}

/// Background loop probing the collector on a fixed interval.
///
/// Every outcome updates the shared [`HealthTracker`] and is recorded in the
/// shared circuit breaker. Entering healthy wakes the buffer reconciler
/// through the recovery [`Notify`].
#[derive(Debug)]
pub struct HealthProbe<P> {
    prober: Arc<P>,
    config: HealthConfig,
    tracker: Arc<Mutex<HealthTracker>>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<PipelineMetrics>,
    recovery: Arc<Notify>,
    status: watch::Sender<HealthStatus>,
}

impl<P: Prober> HealthProbe<P> {
    /// Create a probe loop feeding `breaker`.
    pub fn new(prober: Arc<P>, config: HealthConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let (status, _) = watch::channel(HealthStatus::Unknown);
        Self {
            prober,
            tracker: Arc::new(Mutex::new(HealthTracker::new(config.clone()))),
            config,
            breaker,
            metrics: Arc::new(PipelineMetrics::with_defaults()),
            recovery: Arc::new(Notify::new()),
            status,
        }
    }

    /// Count recoveries in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Signal `recovery` whenever the collector becomes healthy.
    #[must_use]
    pub fn with_recovery_notify(mut self, recovery: Arc<Notify>) -> Self {
        self.recovery = recovery;
        self
    }

    /// Shared handle to the health state.
    pub fn tracker(&self) -> Arc<Mutex<HealthTracker>> {
        Arc::clone(&self.tracker)
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status.subscribe()
    }

    /// Probe until `token` is cancelled. The first probe runs immediately.
    pub async fn run(self, token: CancellationToken) {
        info!(
            target: "telemetry_pipeline::health",
            interval_ms = self.config.check_interval.as_millis() as u64,
            timeout_ms = self.config.probe_timeout.as_millis() as u64,
            "health probe starting"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_once(&token).await;
                }
            }
        }

        info!(target: "telemetry_pipeline::health", "health probe stopped");
    }

    /// Run a single probe and apply its outcome.
    ///
    /// Returns `None` without touching any state if `token` is cancelled
    /// while the probe is in flight.
    pub async fn check_once(&self, token: &CancellationToken) -> Option<HealthTransition> {
        let timeout = self.config.probe_timeout;
        let healthy = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            result = tokio::time::timeout(timeout, self.prober.probe(timeout)) => {
                result.unwrap_or(false)
            }
        };

        let change = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_probe(healthy);

        // Checks hold no half-open trial slot.
        if healthy {
            self.breaker.record_check_success();
        } else {
            self.breaker.record_check_failure(Some(&"health probe failed"));
        }

        match change {
            Some(transition) => self.apply(transition),
            None => debug!(
                target: "telemetry_pipeline::health",
                healthy,
                "health probe completed"
            ),
        }
        change
    }

    fn apply(&self, transition: HealthTransition) {
        let HealthTransition { from, to } = transition;
        match to {
            HealthStatus::Degraded | HealthStatus::Unhealthy => warn!(
                target: "telemetry_pipeline::health",
                "collector health changed: {from} -> {to}"
            ),
            HealthStatus::Healthy | HealthStatus::Unknown => info!(
                target: "telemetry_pipeline::health",
                "collector health changed: {from} -> {to}"
            ),
        }

        self.status.send_replace(to);
        if transition.is_recovery() {
            self.metrics.update(|c| c.recoveries += 1);
        }
        if transition.triggers_recovery_flush() {
            self.recovery.notify_one();
        }
    }
}
