// SPDX-License-Identifier: MIT OR Apache-2.0

//! The export pipeline.
//!
//! [`ExportPipeline`] owns one circuit breaker, one retry buffer and three
//! background tasks:
//!
//! - the export worker, consuming the inbound queue
//! - the buffer reconciler, redelivering buffered batches on an interval and
//!   right after the collector recovers
//! - the health probe, checking the collector and feeding the breaker
//!
//! Submitting never blocks. When the collector is down, batches accumulate in
//! the retry buffer with oldest-first eviction.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use telemetry_pipeline::testkit::ScriptedExporter;
//! use telemetry_pipeline::{ExportPipeline, PipelineConfig, TelemetryBatch};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::new("http://otel-collector:4317");
//! let pipeline = ExportPipeline::with_tcp_probe(config, Arc::new(ScriptedExporter::succeeding()))?;
//!
//! pipeline.start().await?;
//! if !pipeline.submit(TelemetryBatch::metrics(&b"encoded"[..], 1)) {
//!     eprintln!("queue full, batch dropped");
//! }
//!
//! let report = pipeline.stop().await;
//! println!("flushed {} batches, lost {}", report.exported, report.lost);
//! # Ok(())
//! # }
//! ```

mod delivery;
mod reconciler;
mod stats;
mod worker;

pub use stats::PipelineStats;

use self::delivery::DeliveryCore;
use self::reconciler::{flush_buffer, BufferReconciler};
use self::worker::ExportWorker;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::export::{Exporter, TelemetryBatch};
use crate::health::{HealthProbe, HealthStatus, HealthTracker, Prober, TcpProber};
use crate::runtime::{CircuitBreaker, FlushReport, PipelineMetrics, RetryBuffer, RetryExecutor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum Lifecycle {
    Idle,
    Running {
        token: CancellationToken,
        tasks: TaskTracker,
        started_at: Instant,
    },
    Stopped,
}

/// Parts handed to the background tasks on start.
#[derive(Debug)]
struct Pending<P> {
    queue: mpsc::Receiver<TelemetryBatch>,
    probe: HealthProbe<P>,
}

/// Resilient delivery of telemetry batches to a collector.
///
/// A pipeline runs once: `start()` spawns the background tasks and `stop()`
/// shuts them down and flushes the retry buffer.
#[derive(Debug)]
pub struct ExportPipeline<E, P = TcpProber> {
    config: PipelineConfig,
    core: Arc<DeliveryCore<E>>,
    sender: mpsc::Sender<TelemetryBatch>,
    pending: Mutex<Option<Pending<P>>>,
    health: Arc<Mutex<HealthTracker>>,
    health_rx: watch::Receiver<HealthStatus>,
    recovery: Arc<Notify>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
}

impl<E: Exporter> ExportPipeline<E, TcpProber> {
    /// Create a pipeline that probes the collector endpoint over TCP.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid or the
    /// endpoint cannot be parsed.
    pub fn with_tcp_probe(config: PipelineConfig, exporter: Arc<E>) -> Result<Self> {
        let prober = TcpProber::new(&config.endpoint)?;
        Self::new(config, exporter, Arc::new(prober))
    }
}

impl<E: Exporter, P: Prober> ExportPipeline<E, P> {
    /// Create a pipeline. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn new(config: PipelineConfig, exporter: Arc<E>, prober: Arc<P>) -> Result<Self> {
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())?);
        let metrics = Arc::new(PipelineMetrics::new(config.metrics.clone()));
        let recovery = Arc::new(Notify::new());

        let core = Arc::new(DeliveryCore::new(
            exporter,
            Arc::clone(&breaker),
            RetryBuffer::new(config.buffer.clone())?,
            Arc::clone(&metrics),
            RetryExecutor::new(config.retry.clone(), config.attempt_timeout)?,
            config.endpoint.clone(),
        ));

        let probe = HealthProbe::new(prober, config.health.clone(), breaker)
            .with_metrics(metrics)
            .with_recovery_notify(Arc::clone(&recovery));
        let health = probe.tracker();
        let health_rx = probe.subscribe();

        let (sender, queue) = mpsc::channel(config.queue_capacity);

        Ok(Self {
            config,
            core,
            sender,
            pending: Mutex::new(Some(Pending { queue, probe })),
            health,
            health_rx,
            recovery,
            lifecycle: Mutex::new(Lifecycle::Idle),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the export worker, the buffer reconciler and the health probe.
    ///
    /// Starting a running pipeline does nothing.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Lifecycle` if the pipeline was already stopped.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        match *lifecycle {
            Lifecycle::Running { .. } => {
                warn!(target: "telemetry_pipeline::pipeline", "export pipeline already running");
                return Ok(());
            }
            Lifecycle::Stopped => {
                return Err(PipelineError::Lifecycle(
                    "pipeline was stopped and cannot be restarted".to_string(),
                ));
            }
            Lifecycle::Idle => {}
        }

        let Some(Pending { queue, probe }) = lock(&self.pending).take() else {
            return Err(PipelineError::Lifecycle(
                "pipeline tasks were already handed out".to_string(),
            ));
        };

        let token = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(ExportWorker::new(Arc::clone(&self.core), queue).run(token.child_token()));
        tasks.spawn(
            BufferReconciler::new(
                Arc::clone(&self.core),
                self.config.reconcile_interval,
                Arc::clone(&self.recovery),
            )
            .run(token.child_token()),
        );
        tasks.spawn(probe.run(token.child_token()));

        *lifecycle = Lifecycle::Running {
            token,
            tasks,
            started_at: Instant::now(),
        };
        self.running.store(true, Ordering::Release);

        info!(
            target: "telemetry_pipeline::pipeline",
            endpoint = %self.config.endpoint,
            queue_capacity = self.config.queue_capacity,
            buffer_capacity = self.config.buffer.capacity,
            "export pipeline started"
        );
        Ok(())
    }

    /// Queue a batch for delivery without waiting.
    ///
    /// Returns `false` if the pipeline is not running or the queue is full.
    /// A batch refused for a full queue is counted as dropped.
    pub fn submit(&self, batch: TelemetryBatch) -> bool {
        if !self.running.load(Ordering::Acquire) {
            debug!(
                target: "telemetry_pipeline::pipeline",
                signal = %batch.kind(),
                "pipeline not running, refusing batch"
            );
            return false;
        }

        match self.sender.try_send(batch) {
            Ok(()) => true,
            Err(TrySendError::Full(batch)) => {
                self.core.metrics().update(|c| c.dropped += 1);
                warn!(
                    target: "telemetry_pipeline::pipeline",
                    signal = %batch.kind(),
                    data_points = batch.data_points() as u64,
                    capacity = self.config.queue_capacity,
                    "export queue full, dropping batch"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the background tasks, then flush the retry buffer once.
    ///
    /// Batches still queued are moved into the buffer before the flush.
    /// The flush makes a single attempt per batch, without retries; batches
    /// that fail it are counted as dropped and lost.
    ///
    /// Stopping an idle or stopped pipeline only marks it stopped.
    pub async fn stop(&self) -> FlushReport {
        self.running.store(false, Ordering::Release);

        let previous = std::mem::replace(&mut *lock(&self.lifecycle), Lifecycle::Stopped);
        let Lifecycle::Running { token, tasks, .. } = previous else {
            debug!(target: "telemetry_pipeline::pipeline", "export pipeline not running");
            return FlushReport::default();
        };

        info!(target: "telemetry_pipeline::pipeline", "stopping export pipeline");
        token.cancel();
        tasks.close();
        tasks.wait().await;

        let report = flush_buffer(&self.core).await;
        info!(
            target: "telemetry_pipeline::pipeline",
            exported = report.exported,
            lost = report.lost,
            "export pipeline stopped"
        );
        report
    }

    /// Whether the background tasks are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Copy out the current state of every component.
    pub fn stats(&self) -> PipelineStats {
        let uptime = match *lock(&self.lifecycle) {
            Lifecycle::Running { started_at, .. } => Some(started_at.elapsed()),
            Lifecycle::Idle | Lifecycle::Stopped => None,
        };
        let circuit = self.core.breaker().snapshot();
        let health = lock(&self.health).snapshot();
        let metrics = self.core.metrics();
        let buffer = self.core.buffer();

        PipelineStats {
            running: self.is_running(),
            uptime,
            circuit_state: circuit.state,
            last_failure_age: circuit.time_since_last_failure,
            circuit,
            health,
            counters: metrics.counters(),
            buffer_size: buffer.len(),
            buffer_capacity: buffer.config().capacity,
            queue_depth: self.sender.max_capacity() - self.sender.capacity(),
            queue_capacity: self.sender.max_capacity(),
            export_latency: metrics.latency(),
        }
    }

    /// Render [`stats`](Self::stats) under the configured metric namespace.
    pub fn prometheus_text(&self) -> String {
        self.stats()
            .to_prometheus_text(&self.config.metrics.namespace)
    }

    /// Watch collector health changes.
    pub fn health_watch(&self) -> watch::Receiver<HealthStatus> {
        self.health_rx.clone()
    }

    /// The shared circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        self.core.breaker()
    }

    /// The configuration the pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<E, P> Drop for ExportPipeline<E, P> {
    fn drop(&mut self) {
        if let Lifecycle::Running { token, .. } = &*lock(&self.lifecycle) {
            warn!(
                target: "telemetry_pipeline::pipeline",
                "export pipeline dropped while running; buffered batches are lost"
            );
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthConfig;
    use crate::testkit::{ScriptedExporter, ScriptedProber};
    use std::time::Duration;

    fn pipeline(
        config: PipelineConfig,
    ) -> (
        Arc<ScriptedExporter>,
        ExportPipeline<ScriptedExporter, ScriptedProber>,
    ) {
        let exporter = Arc::new(ScriptedExporter::succeeding());
        let pipeline = ExportPipeline::new(
            config,
            Arc::clone(&exporter),
            Arc::new(ScriptedProber::healthy()),
        )
        .unwrap();
        (exporter, pipeline)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = ExportPipeline::new(
            PipelineConfig::default().with_queue_capacity(0),
            Arc::new(ScriptedExporter::succeeding()),
            Arc::new(ScriptedProber::healthy()),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_with_tcp_probe_rejects_bad_endpoint() {
        let result = ExportPipeline::with_tcp_probe(
            PipelineConfig::new("http://[::1"),
            Arc::new(ScriptedExporter::succeeding()),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_before_start_is_refused() {
        let (exporter, pipeline) = pipeline(PipelineConfig::default());
        assert!(!pipeline.submit(TelemetryBatch::metrics(vec![1u8], 1)));
        assert_eq!(exporter.calls(), 0);
        assert_eq!(pipeline.stats().counters.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle() {
        let (_, pipeline) = pipeline(PipelineConfig::default());
        assert!(!pipeline.is_running());
        assert!(pipeline.stats().uptime.is_none());

        pipeline.start().await.unwrap();
        pipeline.start().await.unwrap();
        assert!(pipeline.is_running());

        tokio::time::advance(Duration::from_secs(5)).await;
        let uptime = pipeline.stats().uptime.unwrap();
        assert!(uptime >= Duration::from_secs(5));

        let report = pipeline.stop().await;
        assert_eq!(report, FlushReport::default());
        assert!(!pipeline.is_running());
        assert!(!pipeline.submit(TelemetryBatch::metrics(vec![1u8], 1)));

        assert!(matches!(
            pipeline.start().await,
            Err(PipelineError::Lifecycle(_))
        ));
        assert_eq!(pipeline.stop().await, FlushReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_reflect_health_probe() {
        let (exporter, pipeline) = pipeline(
            PipelineConfig::default()
                .with_health(HealthConfig::new().with_check_interval(Duration::from_secs(1))),
        );
        let mut health = pipeline.health_watch();
        pipeline.start().await.unwrap();

        health.changed().await.unwrap();
        assert_eq!(*health.borrow(), HealthStatus::Healthy);

        assert!(pipeline.submit(TelemetryBatch::metrics(vec![1u8], 1)));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = pipeline.stats();
        assert!(stats.running);
        assert_eq!(stats.health_status(), HealthStatus::Healthy);
        assert_eq!(stats.counters.processed, 1);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.queue_capacity, 1000);
        assert_eq!(exporter.calls(), 1);

        let text = pipeline.prometheus_text();
        assert!(text.contains("telemetry_pipeline_processed_total 1"));
        assert!(text.contains("telemetry_pipeline_health_status 1"));

        pipeline.stop().await;
    }
}
