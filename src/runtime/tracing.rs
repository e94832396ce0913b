// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spans for batch deliveries.
//!
//! Each delivery of a batch, whether from the export worker, a buffer
//! reconciliation pass or the shutdown flush, runs inside an `info_span!`
//! carrying OpenTelemetry-style attributes. Install any `tracing` subscriber
//! (for example `tracing-subscriber` with an OpenTelemetry layer) to collect
//! them.
//!
//! # Example
//!
//! ```rust
//! use telemetry_pipeline::export::TelemetryBatch;
//! use telemetry_pipeline::runtime::tracing::{DeliveryPath, DeliverySpan};
//!
//! let batch = TelemetryBatch::metrics(&b"cpu.usage 0.42"[..], 1);
//! let span = DeliverySpan::new(&batch, DeliveryPath::Worker, "http://collector:4317");
//! span.record_success(1);
//! ```
//!
//! # Attributes
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `signal.kind` | `metrics`, `traces` or `logs` |
//! | `batch.data_points` | Data points in the batch |
//! | `batch.size_bytes` | Encoded payload size |
//! | `delivery.path` | `worker`, `reconcile` or `flush` |
//! | `server.address` | Collector endpoint |
//! | `attempts` | Export attempts made |
//! | `otel.status_code` | `OK` or `ERROR` |

use crate::export::TelemetryBatch;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{field, info_span, Span};

/// Which component is delivering a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// First delivery from the inbound queue.
    Worker,
    /// Re-delivery from the retry buffer.
    Reconcile,
    /// Last-chance delivery during shutdown.
    Flush,
}

impl DeliveryPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPath::Worker => "worker",
            DeliveryPath::Reconcile => "reconcile",
            DeliveryPath::Flush => "flush",
        }
    }
}

impl fmt::Display for DeliveryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A span for one batch delivery.
#[derive(Debug)]
pub struct DeliverySpan {
    span: Span,
    start: Instant,
    path: DeliveryPath,
}

impl DeliverySpan {
    /// Create a new span for delivering `batch` to `endpoint`.
    pub fn new(batch: &TelemetryBatch, path: DeliveryPath, endpoint: &str) -> Self {
        let span = info_span!(
            "telemetry.deliver",
            signal.kind = %batch.kind(),
            batch.data_points = batch.data_points() as u64,
            batch.size_bytes = batch.size_bytes() as u64,
            delivery.path = path.as_str(),
            server.address = %endpoint,
            attempts = field::Empty,
            otel.status_code = field::Empty,
            error.message = field::Empty,
            duration_ms = field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            path,
        }
    }

    /// Get the underlying `tracing::Span`.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn path(&self) -> DeliveryPath {
        self.path
    }

    /// Get elapsed time since span creation.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record a delivered batch.
    pub fn record_success(&self, attempts: u32) {
        self.span.record("attempts", attempts);
        self.span.record("otel.status_code", "OK");
        self.span
            .record("duration_ms", self.start.elapsed().as_millis() as u64);
    }

    /// Record a delivery that did not succeed.
    pub fn record_error(&self, attempts: u32, error: &dyn fmt::Display) {
        self.span.record("attempts", attempts);
        self.span.record("otel.status_code", "ERROR");
        self.span.record("error.message", field::display(error));
        self.span
            .record("duration_ms", self.start.elapsed().as_millis() as u64);
    }
}
