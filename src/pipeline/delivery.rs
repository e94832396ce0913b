// SPDX-License-Identifier: MIT OR Apache-2.0

//! State shared by the export worker, the reconciler and the shutdown flush.

use crate::error::ExportError;
use crate::export::{Exporter, TelemetryBatch};
use crate::runtime::{
    CircuitBreaker, DeliveryPath, DeliverySpan, PipelineMetrics, RetryBuffer, RetryExecutor,
    RetryOutcome,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, Instrument};

/// Observes an attempt's latency when dropped, so attempts cut short by the
/// executor's timeout are measured too.
struct AttemptTimer<'a> {
    metrics: &'a PipelineMetrics,
    signal: &'static str,
    start: Instant,
}

impl<'a> AttemptTimer<'a> {
    fn start(metrics: &'a PipelineMetrics, batch: &TelemetryBatch) -> Self {
        Self {
            metrics,
            signal: batch.kind().as_str(),
            start: Instant::now(),
        }
    }
}

impl Drop for AttemptTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .observe_attempt(self.signal, self.start.elapsed());
    }
}

/// Collaborators every delivery path needs.
#[derive(Debug)]
pub(crate) struct DeliveryCore<E> {
    exporter: Arc<E>,
    breaker: Arc<CircuitBreaker>,
    buffer: RetryBuffer<TelemetryBatch>,
    metrics: Arc<PipelineMetrics>,
    executor: RetryExecutor,
    endpoint: String,
}

impl<E: Exporter> DeliveryCore<E> {
    pub(crate) fn new(
        exporter: Arc<E>,
        breaker: Arc<CircuitBreaker>,
        buffer: RetryBuffer<TelemetryBatch>,
        metrics: Arc<PipelineMetrics>,
        executor: RetryExecutor,
        endpoint: String,
    ) -> Self {
        Self {
            exporter,
            breaker,
            buffer,
            metrics,
            executor,
            endpoint,
        }
    }

    pub(crate) fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub(crate) fn buffer(&self) -> &RetryBuffer<TelemetryBatch> {
        &self.buffer
    }

    pub(crate) fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Deliver `batch` with retries and feed the outcome to the breaker.
    ///
    /// Returns `true` if the collector accepted the batch. The caller decides
    /// what happens to a batch that was not accepted.
    pub(crate) async fn deliver(&self, batch: &TelemetryBatch, path: DeliveryPath) -> bool {
        let span = DeliverySpan::new(batch, path, &self.endpoint);
        let exporter = &*self.exporter;
        let metrics = &*self.metrics;

        let outcome = self
            .executor
            .execute(move |timeout| async move {
                let _timer = AttemptTimer::start(metrics, batch);
                exporter.export(batch, timeout).await
            })
            .instrument(span.span().clone())
            .await;

        let retries = u64::from(outcome.retries());
        match outcome {
            RetryOutcome::Delivered { attempts } => {
                self.breaker.record_success();
                self.metrics.update(|c| {
                    c.processed += 1;
                    c.retried += retries;
                });
                span.record_success(attempts);
                true
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                self.breaker.record_failure(Some(&last_error));
                self.metrics.update(|c| {
                    c.failed += 1;
                    c.retried += retries;
                });
                span.record_error(attempts, &last_error);
                false
            }
        }
    }

    /// Make one bounded attempt without consulting or feeding the breaker.
    pub(crate) async fn deliver_once(&self, batch: &TelemetryBatch) -> bool {
        let span = DeliverySpan::new(batch, DeliveryPath::Flush, &self.endpoint);
        let timeout = self.executor.attempt_timeout();

        let result = {
            let _timer = AttemptTimer::start(&self.metrics, batch);
            tokio::time::timeout(timeout, self.exporter.export(batch, timeout))
                .instrument(span.span().clone())
                .await
                .unwrap_or(Err(ExportError::Timeout(timeout)))
        };

        match result {
            Ok(()) => {
                self.metrics.update(|c| c.processed += 1);
                span.record_success(1);
                true
            }
            Err(e) => {
                debug!(
                    target: "telemetry_pipeline::flush",
                    signal = %batch.kind(),
                    error = %e,
                    "final delivery attempt failed"
                );
                self.metrics.update(|c| c.failed += 1);
                span.record_error(1, &e);
                false
            }
        }
    }

    /// Park `batch` in the retry buffer, counting any eviction as a drop.
    pub(crate) fn buffer_batch(&self, batch: TelemetryBatch) {
        let evicted = self.buffer.push(batch);
        self.metrics.update(|c| {
            c.buffered += 1;
            if evicted.is_some() {
                c.dropped += 1;
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::runtime::{BufferConfig, CircuitBreakerConfig, CircuitState, RetryPolicy};
    use crate::testkit::{ExportStep, ScriptedExporter};
    use std::time::Duration;

    pub(crate) fn core_with(
        exporter: ScriptedExporter,
        breaker: CircuitBreakerConfig,
        policy: RetryPolicy,
    ) -> (Arc<ScriptedExporter>, DeliveryCore<ScriptedExporter>) {
        let exporter = Arc::new(exporter);
        let core = DeliveryCore::new(
            Arc::clone(&exporter),
            Arc::new(CircuitBreaker::new(breaker).unwrap()),
            RetryBuffer::new(BufferConfig::new().with_capacity(2)).unwrap(),
            Arc::new(PipelineMetrics::with_defaults()),
            RetryExecutor::new(policy, Duration::from_secs(5)).unwrap(),
            "http://collector:4317".to_string(),
        );
        (exporter, core)
    }

    fn quick_retries() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_success_after_retry() {
        let (exporter, core) = core_with(
            ScriptedExporter::fail_times(1),
            CircuitBreakerConfig::default(),
            quick_retries(),
        );
        let batch = TelemetryBatch::metrics(vec![1u8, 2], 2);

        assert!(core.deliver(&batch, DeliveryPath::Worker).await);
        assert_eq!(exporter.calls(), 2);

        let counters = core.metrics().counters();
        assert_eq!(counters.processed, 1);
        assert_eq!(counters.retried, 1);
        assert_eq!(counters.failed, 0);
        assert_eq!(core.breaker().snapshot().total_successes, 1);

        let latency = core.metrics().latency();
        assert_eq!(latency.len(), 1);
        assert_eq!(latency[0].count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_exhausted_feeds_breaker() {
        let (exporter, core) = core_with(
            ScriptedExporter::failing(),
            CircuitBreakerConfig::new().with_failure_threshold(1),
            quick_retries(),
        );
        let batch = TelemetryBatch::traces(vec![9u8], 1);

        assert!(!core.deliver(&batch, DeliveryPath::Worker).await);
        assert_eq!(exporter.calls(), 3);
        assert_eq!(core.breaker().state(), CircuitState::Open);

        let counters = core.metrics().counters();
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.retried, 2);
        assert_eq!(counters.processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_once_times_out() {
        let (exporter, core) = core_with(
            ScriptedExporter::hanging(),
            CircuitBreakerConfig::new().with_failure_threshold(1),
            RetryPolicy::no_retries(),
        );
        let batch = TelemetryBatch::metrics(vec![1u8], 1);

        let start = Instant::now();
        assert!(!core.deliver_once(&batch).await);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(exporter.calls(), 1);
        // The final flush never moves the breaker.
        assert_eq!(core.breaker().state(), CircuitState::Closed);
        assert_eq!(core.metrics().counters().failed, 1);
        assert_eq!(core.metrics().latency()[0].count, 1);
    }

    #[tokio::test]
    async fn test_buffer_batch_counts_evictions() {
        let (_, core) = core_with(
            ScriptedExporter::new(ExportStep::Succeed),
            CircuitBreakerConfig::default(),
            RetryPolicy::no_retries(),
        );
        for i in 0..3u8 {
            core.buffer_batch(TelemetryBatch::metrics(vec![i], 1));
        }

        assert_eq!(core.buffer().len(), 2);
        let counters = core.metrics().counters();
        assert_eq!(counters.buffered, 3);
        assert_eq!(counters.dropped, 1);
    }
}
