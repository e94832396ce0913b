// SPDX-License-Identifier: MIT OR Apache-2.0

//! Walks a pipeline through a collector outage and recovery.
//!
//! Run with:
//! ```text
//! RUST_LOG=telemetry_pipeline=debug cargo run --example resilient_pipeline
//! ```

use std::sync::Arc;
use std::time::Duration;

use telemetry_pipeline::health::HealthConfig;
use telemetry_pipeline::runtime::{CircuitBreakerConfig, RetryPolicy};
use telemetry_pipeline::testkit::{ExportStep, ScriptedExporter, ScriptedProber};
use telemetry_pipeline::{ExportPipeline, PipelineConfig, PipelineSettings, TelemetryBatch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("telemetry_pipeline=info")),
        )
        .init();

    // Settings from the environment, tightened so the demo finishes quickly.
    let config: PipelineConfig = PipelineSettings::load_with_env()?
        .into_config()?
        .with_reconcile_interval(Duration::from_secs(5))
        .with_attempt_timeout(Duration::from_millis(500))
        .with_retry(
            RetryPolicy::new()
                .with_max_retries(2)
                .with_initial_delay(Duration::from_millis(100)),
        )
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_recovery_timeout(Duration::from_secs(2))
                .with_success_threshold(1),
        )
        .with_health(
            HealthConfig::new()
                .with_check_interval(Duration::from_millis(500))
                .with_probe_timeout(Duration::from_millis(200))
                .with_max_failures(2)
                .with_recovery_threshold(2),
        );

    let exporter = Arc::new(ScriptedExporter::failing());
    let prober = Arc::new(ScriptedProber::unhealthy());
    let pipeline = ExportPipeline::new(config, Arc::clone(&exporter), Arc::clone(&prober))?;
    pipeline.start().await?;

    println!("collector down, submitting 20 batches");
    for i in 0..20u32 {
        let payload = format!("cpu.usage host=web-{i} 0.{i}");
        if !pipeline.submit(TelemetryBatch::metrics(payload.into_bytes(), 1)) {
            println!("batch {i} refused");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let stats = pipeline.stats();
    println!(
        "during outage: circuit={} health={} buffered={} dropped={}",
        stats.circuit_state,
        stats.health_status(),
        stats.buffer_size,
        stats.counters.dropped
    );

    println!("collector back up");
    exporter.set_default(ExportStep::Succeed);
    prober.set_default(true);

    let mut health = pipeline.health_watch();
    health
        .wait_for(|status| *status == telemetry_pipeline::HealthStatus::Healthy)
        .await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = pipeline.stop().await;
    println!(
        "stopped: delivered={} final_flush_exported={} final_flush_lost={}",
        exporter.delivered().len(),
        report.exported,
        report.lost
    );
    println!("\n{}", pipeline.prometheus_text());
    Ok(())
}
