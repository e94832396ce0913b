// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience and observability building blocks for the delivery pipeline.
//!
//! The circuit breaker, retry executor and retry buffer are usable on their
//! own; [`ExportPipeline`](crate::ExportPipeline) wires them together.

mod buffer;
mod circuit_breaker;
pub mod metrics;
mod retry;
pub mod tracing;

pub use buffer::{
    BufferConfig, BufferedItem, ExportAttempt, FlushReport, ReconcileReport, RetryBuffer,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState, TransitionCounts,
};
pub use metrics::{DeliveryCounters, MetricsConfig, PipelineMetrics};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
pub use self::tracing::{DeliveryPath, DeliverySpan};
