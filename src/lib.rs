// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilient delivery of encoded telemetry batches to a remote collector.

pub mod config;
pub mod error;
pub mod export;
pub mod health;
pub mod pipeline;
pub mod runtime;
pub mod testkit;

pub use config::{PipelineConfig, PipelineSettings};
pub use error::{ExportError, PipelineError, Result};
pub use export::{Exporter, SignalKind, TelemetryBatch};
pub use health::{HealthConfig, HealthStatus, Prober, TcpProber};
pub use pipeline::{ExportPipeline, PipelineStats};
