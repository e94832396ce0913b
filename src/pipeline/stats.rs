// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::health::{HealthSnapshot, HealthStatus};
use crate::runtime::metrics::{LatencySnapshot, PrometheusText};
use crate::runtime::{CircuitBreakerSnapshot, CircuitState, DeliveryCounters};
use std::time::Duration;

/// Point-in-time view of a pipeline.
///
/// Built by copying each component's bookkeeping; holding one keeps no lock.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Whether the background tasks are running.
    pub running: bool,
    /// Time since `start()`, `None` unless running.
    pub uptime: Option<Duration>,
    pub circuit_state: CircuitState,
    pub circuit: CircuitBreakerSnapshot,
    /// Time since the breaker last recorded a failure.
    pub last_failure_age: Option<Duration>,
    pub health: HealthSnapshot,
    pub counters: DeliveryCounters,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    /// Batches waiting in the inbound queue.
    pub queue_depth: usize,
    pub queue_capacity: usize,
    /// Export attempt latency per signal kind.
    pub export_latency: Vec<LatencySnapshot>,
}

impl PipelineStats {
    /// Current collector health.
    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        self.health.status
    }

    /// Render the stats in the Prometheus text exposition format.
    #[must_use]
    pub fn to_prometheus_text(&self, namespace: &str) -> String {
        let c = &self.counters;
        let mut text = PrometheusText::new(namespace);
        text.counter(
            "processed_total",
            "Batches delivered to the collector",
            c.processed,
        )
        .counter(
            "failed_total",
            "Deliveries that ended without success",
            c.failed,
        )
        .counter(
            "buffered_total",
            "Batches handed to the retry buffer",
            c.buffered,
        )
        .counter("dropped_total", "Batches discarded", c.dropped)
        .counter(
            "expired_total",
            "Buffered batches older than the buffer max age",
            c.expired,
        )
        .counter(
            "retried_total",
            "Export retries after a failed attempt",
            c.retried,
        )
        .counter(
            "rejected_total",
            "Batches buffered because the circuit was open",
            c.rejected,
        )
        .counter(
            "recoveries_total",
            "Collector recoveries from unhealthy",
            c.recoveries,
        )
        .gauge("up", "Whether the pipeline is running", u8::from(self.running))
        .gauge(
            "circuit_state",
            "Circuit breaker state (0=closed, 1=half_open, 2=open)",
            self.circuit_state.as_gauge(),
        )
        .gauge(
            "health_status",
            "Collector health (0=unknown, 1=healthy, 2=degraded, 3=unhealthy)",
            self.health.status.as_gauge(),
        )
        .gauge(
            "health_consecutive_failures",
            "Consecutive failed health probes",
            self.health.consecutive_failures,
        )
        .gauge("buffer_size", "Batches in the retry buffer", self.buffer_size)
        .gauge(
            "buffer_capacity",
            "Retry buffer capacity",
            self.buffer_capacity,
        )
        .gauge(
            "queue_depth",
            "Batches waiting in the inbound queue",
            self.queue_depth,
        )
        .histogram(
            "export_duration_seconds",
            "Export attempt latency in seconds",
            &self.export_latency,
        );
        text.finish()
    }
}
