// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery counters and Prometheus-compatible exposition.
//!
//! # Features
//!
//! - Monotonic delivery counters updated under a single lock
//! - Per-signal export attempt latency histograms
//! - A small writer for the Prometheus text exposition format
//!
//! # Example
//!
//! ```rust
//! use telemetry_pipeline::runtime::metrics::{MetricsConfig, PipelineMetrics};
//! use std::time::Duration;
//!
//! let metrics = PipelineMetrics::new(MetricsConfig::default());
//! metrics.update(|c| c.processed += 1);
//! metrics.observe_attempt("metrics", Duration::from_millis(42));
//!
//! assert_eq!(metrics.counters().processed, 1);
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Configuration for the metrics collector.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Metric namespace prefix (e.g., "telemetry_pipeline" -> "telemetry_pipeline_processed_total")
    pub namespace: String,
    /// Histogram buckets for export attempt latency (in seconds)
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "telemetry_pipeline".to_string(),
            histogram_buckets: vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Set the metric namespace prefix.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set histogram buckets for export latency (in seconds).
    #[must_use]
    pub fn with_histogram_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.histogram_buckets = buckets;
        self
    }
}

/// Monotonic delivery counters.
///
/// Every field only grows; all of them are updated together under one lock
/// so a snapshot is internally consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCounters {
    /// Batches delivered to the collector.
    pub processed: u64,
    /// Delivery attempts that ended without success.
    pub failed: u64,
    /// Batches handed to the retry buffer.
    pub buffered: u64,
    /// Batches discarded: full queue, buffer eviction, retry budget, flush loss.
    pub dropped: u64,
    /// Buffered batches that outlived the buffer's max age.
    pub expired: u64,
    /// Retries performed after a failed first attempt.
    pub retried: u64,
    /// Recoveries of the downstream endpoint from unhealthy.
    pub recoveries: u64,
    /// Batches routed straight to the buffer because the breaker was open.
    pub rejected: u64,
}

/// A histogram with cumulative bucket counters.
#[derive(Debug)]
struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum: AtomicU64, // Store as nanoseconds
    count: AtomicU64,
}

impl Histogram {
    fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: Duration) {
        let secs = value.as_secs_f64();
        if let Some(first) = self.buckets.iter().position(|bucket| secs <= *bucket) {
            for counter in &self.counts[first..] {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        // Values above every bucket only land in +Inf, which is the total count.
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        self.sum.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, label: &str) -> LatencySnapshot {
        LatencySnapshot {
            signal: label.to_string(),
            buckets: self
                .buckets
                .iter()
                .zip(&self.counts)
                .map(|(bucket, count)| (*bucket, count.load(Ordering::Relaxed)))
                .collect(),
            sum_secs: self.sum.load(Ordering::Relaxed) as f64 / 1_000_000_000.0,
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

/// Copy of one latency histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySnapshot {
    /// Signal kind label.
    pub signal: String,
    /// `(upper bound in seconds, cumulative count)` pairs.
    pub buckets: Vec<(f64, u64)>,
    pub sum_secs: f64,
    pub count: u64,
}

/// Thread-safe metrics store for one pipeline.
#[derive(Debug)]
pub struct PipelineMetrics {
    config: MetricsConfig,
    counters: Mutex<DeliveryCounters>,
    /// Histogram: export_attempt_duration_seconds{signal}
    attempt_duration: RwLock<HashMap<String, Histogram>>,
}

impl PipelineMetrics {
    /// Create a new metrics store with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(DeliveryCounters::default()),
            attempt_duration: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new metrics store with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MetricsConfig::default())
    }

    /// Mutate the counters under the lock.
    pub fn update(&self, f: impl FnOnce(&mut DeliveryCounters)) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counters);
    }

    /// Copy of the current counters.
    pub fn counters(&self) -> DeliveryCounters {
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the duration of one export attempt.
    pub fn observe_attempt(&self, signal: &str, duration: Duration) {
        {
            let histograms = self
                .attempt_duration
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(hist) = histograms.get(signal) {
                hist.observe(duration);
                return;
            }
        }

        let mut histograms = self
            .attempt_duration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        histograms
            .entry(signal.to_string())
            .or_insert_with(|| Histogram::new(self.config.histogram_buckets.clone()))
            .observe(duration);
    }

    /// Copies of every latency histogram, sorted by signal label.
    pub fn latency(&self) -> Vec<LatencySnapshot> {
        let histograms = self
            .attempt_duration
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<_> = histograms
            .iter()
            .map(|(signal, hist)| hist.snapshot(signal))
            .collect();
        snapshots.sort_by(|a, b| a.signal.cmp(&b.signal));
        snapshots
    }

    /// Get the metrics configuration.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Writer for the Prometheus text exposition format.
#[derive(Debug)]
pub struct PrometheusText {
    namespace: String,
    output: String,
}

impl PrometheusText {
    /// Start a new exposition with every metric name prefixed by `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            output: String::new(),
        }
    }

    fn header(&mut self, name: &str, help: &str, kind: &str) {
        let ns = &self.namespace;
        let _ = writeln!(self.output, "# HELP {ns}_{name} {help}");
        let _ = writeln!(self.output, "# TYPE {ns}_{name} {kind}");
    }

    /// Append a counter.
    pub fn counter(&mut self, name: &str, help: &str, value: u64) -> &mut Self {
        self.header(name, help, "counter");
        let _ = writeln!(self.output, "{}_{name} {value}\n", self.namespace);
        self
    }

    /// Append a gauge.
    pub fn gauge(&mut self, name: &str, help: &str, value: impl std::fmt::Display) -> &mut Self {
        self.header(name, help, "gauge");
        let _ = writeln!(self.output, "{}_{name} {value}\n", self.namespace);
        self
    }

    /// Append a histogram family with one series per snapshot.
    pub fn histogram(&mut self, name: &str, help: &str, series: &[LatencySnapshot]) -> &mut Self {
        self.header(name, help, "histogram");
        let ns = self.namespace.clone();
        for hist in series {
            let labels = format!("signal=\"{}\"", hist.signal);
            for (bucket, count) in &hist.buckets {
                let _ = writeln!(
                    self.output,
                    "{ns}_{name}_bucket{{{labels},le=\"{bucket}\"}} {count}"
                );
            }
            let count = hist.count;
            let _ = writeln!(
                self.output,
                "{ns}_{name}_bucket{{{labels},le=\"+Inf\"}} {count}"
            );
            let _ = writeln!(self.output, "{ns}_{name}_sum{{{labels}}} {}", hist.sum_secs);
            let _ = writeln!(self.output, "{ns}_{name}_count{{{labels}}} {count}");
        }
        self.output.push('\n');
        self
    }

    /// Finish the exposition.
    pub fn finish(self) -> String {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_default() {
        let config = MetricsConfig::default();
        assert_eq!(config.namespace, "telemetry_pipeline");
        assert!(!config.histogram_buckets.is_empty());

        let config = MetricsConfig::default()
            .with_namespace("edge")
            .with_histogram_buckets(vec![0.1, 1.0]);
        assert_eq!(config.namespace, "edge");
        assert_eq!(config.histogram_buckets, vec![0.1, 1.0]);
    }

    #[test]
    fn test_counters_update_together() {
        let metrics = PipelineMetrics::with_defaults();
        metrics.update(|c| {
            c.failed += 1;
            c.buffered += 1;
        });
        metrics.update(|c| c.processed += 2);

        let counters = metrics.counters();
        assert_eq!(counters.processed, 2);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.buffered, 1);
        assert_eq!(counters.dropped, 0);
    }

    #[test]
    fn test_histogram_buckets() {
        let hist = Histogram::new(vec![0.01, 0.1, 1.0]);

        // 0.05 lands in the 0.1 and 1.0 buckets
        hist.observe(Duration::from_millis(50));
        // 5s is above every bucket
        hist.observe(Duration::from_secs(5));

        let snapshot = hist.snapshot("metrics");
        assert_eq!(snapshot.buckets, vec![(0.01, 0), (0.1, 1), (1.0, 1)]);
        assert_eq!(snapshot.count, 2);
        assert!((snapshot.sum_secs - 5.05).abs() < 1e-9);
    }

    #[test]
    fn test_latency_per_signal() {
        let metrics = PipelineMetrics::with_defaults();
        metrics.observe_attempt("traces", Duration::from_millis(10));
        metrics.observe_attempt("metrics", Duration::from_millis(20));
        metrics.observe_attempt("metrics", Duration::from_millis(30));

        let latency = metrics.latency();
        assert_eq!(latency.len(), 2);
        assert_eq!(latency[0].signal, "metrics");
        assert_eq!(latency[0].count, 2);
        assert_eq!(latency[1].signal, "traces");
        assert_eq!(latency[1].count, 1);
    }

    #[test]
    fn test_prometheus_text_format() {
        let metrics = PipelineMetrics::new(
            MetricsConfig::default().with_histogram_buckets(vec![0.1, 1.0]),
        );
        metrics.observe_attempt("metrics", Duration::from_millis(50));

        let mut text = PrometheusText::new("test");
        text.counter("processed_total", "Batches delivered", 7)
            .gauge("circuit_breaker_state", "Circuit breaker state", 2)
            .histogram(
                "export_attempt_duration_seconds",
                "Export attempt duration in seconds",
                &metrics.latency(),
            );
        let output = text.finish();

        assert!(output.contains("# HELP test_processed_total Batches delivered"));
        assert!(output.contains("# TYPE test_processed_total counter"));
        assert!(output.contains("test_processed_total 7"));
        assert!(output.contains("# TYPE test_circuit_breaker_state gauge"));
        assert!(output.contains("test_circuit_breaker_state 2"));
        assert!(output.contains(
            "test_export_attempt_duration_seconds_bucket{signal=\"metrics\",le=\"0.1\"} 1"
        ));
        assert!(output.contains(
            "test_export_attempt_duration_seconds_bucket{signal=\"metrics\",le=\"+Inf\"} 1"
        ));
        assert!(output.contains(
            "test_export_attempt_duration_seconds_count{signal=\"metrics\"} 1"
        ));
    }
}
