// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;
use std::fmt;

/// The kind of telemetry carried by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Metric data points.
    Metrics,
    /// Trace spans.
    Traces,
    /// Log records.
    Logs,
}

impl SignalKind {
    /// Lowercase name used as a log and metric label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Metrics => "metrics",
            SignalKind::Traces => "traces",
            SignalKind::Logs => "logs",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An already-encoded batch of telemetry awaiting delivery.
///
/// The payload is opaque to the pipeline; encoding belongs to the exporter's
/// producer. Cloning is cheap because the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryBatch {
    kind: SignalKind,
    payload: Bytes,
    data_points: usize,
}

impl TelemetryBatch {
    /// Create a batch from an encoded payload.
    pub fn new(kind: SignalKind, payload: impl Into<Bytes>, data_points: usize) -> Self {
        Self {
            kind,
            payload: payload.into(),
            data_points,
        }
    }

    /// Create a metrics batch.
    pub fn metrics(payload: impl Into<Bytes>, data_points: usize) -> Self {
        Self::new(SignalKind::Metrics, payload, data_points)
    }

    /// Create a traces batch.
    pub fn traces(payload: impl Into<Bytes>, data_points: usize) -> Self {
        Self::new(SignalKind::Traces, payload, data_points)
    }

    /// Signal kind of this batch.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Encoded payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of data points (or spans) encoded in the payload.
    #[must_use]
    pub fn data_points(&self) -> usize {
        self.data_points
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}
