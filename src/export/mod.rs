// SPDX-License-Identifier: MIT OR Apache-2.0

//! The exporter seam between the pipeline and the wire.
//!
//! The pipeline never encodes telemetry itself. An [`Exporter`] receives an
//! already-encoded [`TelemetryBatch`] and reports whether the collector
//! accepted it.
//!
//! # Example
//!
//! ```ignore
//! use telemetry_pipeline::{ExportError, Exporter, TelemetryBatch};
//! use std::time::Duration;
//!
//! struct OtlpHttpExporter { client: reqwest::Client, url: String }
//!
//! impl Exporter for OtlpHttpExporter {
//!     async fn export(&self, batch: &TelemetryBatch, timeout: Duration) -> Result<(), ExportError> {
//!         let response = self.client
//!             .post(&self.url)
//!             .timeout(timeout)
//!             .body(batch.payload().clone())
//!             .send()
//!             .await
//!             .map_err(|e| ExportError::Transport(e.to_string()))?;
//!         if response.status().is_success() {
//!             Ok(())
//!         } else {
//!             Err(ExportError::Rejected(response.status().to_string()))
//!         }
//!     }
//! }
//! ```

mod batch;

pub use batch::{SignalKind, TelemetryBatch};

use crate::error::ExportError;
use std::future::Future;
use std::time::Duration;

/// Delivers encoded batches to the remote collector.
///
/// `timeout` is advisory; the pipeline enforces it independently, so a slow
/// implementation is cancelled rather than waited on.
pub trait Exporter: Send + Sync + 'static {
    /// Export one batch.
    fn export(
        &self,
        batch: &TelemetryBatch,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), ExportError>> + Send;
}
