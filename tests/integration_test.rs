// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use telemetry_pipeline::health::HealthConfig;
use telemetry_pipeline::runtime::{
    BufferConfig, CircuitBreakerConfig, CircuitState, FlushReport, RetryPolicy,
};
use telemetry_pipeline::testkit::{ExportStep, ScriptedExporter, ScriptedProber};
use telemetry_pipeline::{
    ExportPipeline, HealthStatus, PipelineConfig, PipelineSettings, TelemetryBatch,
};
use tokio::time::Instant;

type TestPipeline = ExportPipeline<ScriptedExporter, ScriptedProber>;

fn batch(id: u8) -> TelemetryBatch {
    TelemetryBatch::metrics(vec![id; 4], 1)
}

fn base_config() -> PipelineConfig {
    PipelineConfig::new("http://collector.test:4317")
        .with_attempt_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy::no_retries())
}

fn build(
    config: PipelineConfig,
    exporter: ScriptedExporter,
    prober: ScriptedProber,
) -> (Arc<ScriptedExporter>, Arc<ScriptedProber>, TestPipeline) {
    let exporter = Arc::new(exporter);
    let prober = Arc::new(prober);
    let pipeline = ExportPipeline::new(config, Arc::clone(&exporter), Arc::clone(&prober))
        .expect("valid config");
    (exporter, prober, pipeline)
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_delivers_in_order() {
    let (exporter, _, pipeline) = build(
        base_config(),
        ScriptedExporter::succeeding(),
        ScriptedProber::healthy(),
    );
    pipeline.start().await.unwrap();

    for id in 0..5 {
        assert!(pipeline.submit(batch(id)));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        exporter.delivered(),
        (0..5).map(batch).collect::<Vec<_>>()
    );
    let stats = pipeline.stats();
    assert_eq!(stats.counters.processed, 5);
    assert_eq!(stats.counters.buffered, 0);
    assert_eq!(stats.circuit_state, CircuitState::Closed);
    assert_eq!(stats.buffer_size, 0);

    assert_eq!(pipeline.stop().await, FlushReport::default());
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_refuses_without_blocking() {
    let (_, _, pipeline) = build(
        base_config().with_queue_capacity(2),
        ScriptedExporter::hanging(),
        ScriptedProber::healthy(),
    );
    pipeline.start().await.unwrap();

    // No yield between submits: the worker has not taken anything yet.
    let started = Instant::now();
    assert!(pipeline.submit(batch(1)));
    assert!(pipeline.submit(batch(2)));
    assert!(!pipeline.submit(batch(3)));
    assert!(!pipeline.submit(batch(4)));
    assert_eq!(started.elapsed(), Duration::ZERO);

    let stats = pipeline.stats();
    assert_eq!(stats.counters.dropped, 2);
    assert_eq!(stats.queue_depth, 2);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_outage_buffers_then_recovery_redelivers() {
    let config = base_config()
        .with_reconcile_interval(Duration::from_secs(3600))
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_success_threshold(1)
                .with_recovery_timeout(Duration::from_secs(1)),
        )
        .with_health(
            HealthConfig::new()
                .with_check_interval(Duration::from_secs(1))
                .with_probe_timeout(Duration::from_millis(500))
                .with_max_failures(2)
                .with_recovery_threshold(2),
        );
    let (exporter, prober, pipeline) = build(
        config,
        ScriptedExporter::failing(),
        ScriptedProber::unhealthy(),
    );
    let mut health = pipeline.health_watch();
    pipeline.start().await.unwrap();

    for id in 1..=3 {
        assert!(pipeline.submit(batch(id)));
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stats = pipeline.stats();
    assert_eq!(stats.circuit_state, CircuitState::Open);
    assert_eq!(stats.health_status(), HealthStatus::Unhealthy);
    assert_eq!(stats.buffer_size, 3);
    assert!(stats.counters.rejected >= 1);
    assert!(exporter.delivered().is_empty());

    // The collector comes back.
    exporter.set_default(ExportStep::Succeed);
    prober.set_default(true);

    tokio::time::timeout(Duration::from_secs(10), async {
        while *health.borrow_and_update() != HealthStatus::Healthy {
            health.changed().await.unwrap();
        }
    })
    .await
    .expect("collector reported healthy");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The recovery pass ran long before the periodic interval.
    assert_eq!(exporter.delivered(), vec![batch(1), batch(2), batch(3)]);
    let stats = pipeline.stats();
    assert_eq!(stats.buffer_size, 0);
    assert_eq!(stats.circuit_state, CircuitState::Closed);
    assert_eq!(stats.counters.processed, 3);
    assert_eq!(stats.counters.recoveries, 1);
    assert_eq!(stats.health.recoveries, 1);
    assert!(stats.circuit.transitions.half_open_to_closed >= 1);

    assert_eq!(pipeline.stop().await, FlushReport::default());
}

#[tokio::test(start_paused = true)]
async fn test_sustained_outage_evicts_oldest() {
    let config = base_config().with_buffer(BufferConfig::new().with_capacity(3));
    let (exporter, _, pipeline) = build(
        config,
        ScriptedExporter::succeeding(),
        ScriptedProber::unhealthy(),
    );
    pipeline.circuit_breaker().force_open();
    pipeline.start().await.unwrap();

    for id in 1..=5 {
        assert!(pipeline.submit(batch(id)));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = pipeline.stats();
    assert_eq!(exporter.calls(), 0);
    assert_eq!(stats.buffer_size, 3);
    assert_eq!(stats.counters.rejected, 5);
    assert_eq!(stats.counters.buffered, 5);
    assert_eq!(stats.counters.dropped, 2);

    // The final flush ignores the breaker.
    let report = pipeline.stop().await;
    assert_eq!(report.exported, 3);
    assert_eq!(exporter.delivered(), vec![batch(3), batch(4), batch(5)]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_queued_batches() {
    let (exporter, _, pipeline) = build(
        base_config(),
        ScriptedExporter::succeeding(),
        ScriptedProber::healthy(),
    );
    pipeline.start().await.unwrap();
    for id in 1..=3 {
        assert!(pipeline.submit(batch(id)));
    }

    // Stop before the worker ever ran: the queue is moved into the buffer.
    let report = pipeline.stop().await;

    assert_eq!(report.exported, 3);
    assert_eq!(report.lost, 0);
    assert_eq!(exporter.delivered(), vec![batch(1), batch(2), batch(3)]);
    assert!(!pipeline.submit(batch(4)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_retries_failed_batches_once() {
    let (exporter, _, pipeline) = build(
        base_config(),
        ScriptedExporter::failing(),
        ScriptedProber::healthy(),
    );
    pipeline.start().await.unwrap();
    assert!(pipeline.submit(batch(1)));
    assert!(pipeline.submit(batch(2)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.stats().buffer_size, 2);

    exporter.set_default(ExportStep::Succeed);
    let report = pipeline.stop().await;

    assert_eq!(report.lost, 0);
    assert_eq!(exporter.delivered(), vec![batch(1), batch(2)]);
    assert_eq!(pipeline.stats().buffer_size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_bounded_when_collector_hangs() {
    let (_, _, pipeline) = build(
        base_config().with_attempt_timeout(Duration::from_secs(2)),
        ScriptedExporter::hanging(),
        ScriptedProber::healthy(),
    );
    pipeline.start().await.unwrap();
    assert!(pipeline.submit(batch(1)));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = pipeline.stop().await;

    // The in-flight delivery is abandoned and the flush attempt times out.
    assert!(started.elapsed() <= Duration::from_secs(3));
    assert_eq!(report.lost, 1);
    let stats = pipeline.stats();
    assert_eq!(stats.counters.dropped, 1);
    assert_eq!(stats.buffer_size, 0);
    assert!(!stats.running);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_from_settings_file() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        "endpoint: http://collector.test:4317\nqueue_capacity: 4\nbuffer:\n  capacity: 8\nretry:\n  max_retries: 0\nmetrics_namespace: edge"
    )?;

    let config = PipelineSettings::load_from_path(file.path())?.into_config()?;
    let (exporter, _, pipeline) = build(
        config,
        ScriptedExporter::succeeding(),
        ScriptedProber::healthy(),
    );
    pipeline.start().await?;
    assert!(pipeline.submit(batch(1)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = pipeline.stats();
    assert_eq!(stats.queue_capacity, 4);
    assert_eq!(stats.buffer_capacity, 8);
    assert_eq!(exporter.delivered(), vec![batch(1)]);
    assert!(pipeline
        .prometheus_text()
        .contains("edge_processed_total 1"));

    pipeline.stop().await;
    Ok(())
}
