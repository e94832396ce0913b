// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;
use thiserror::Error;

/// Failure of a single export attempt.
///
/// Every variant is retryable. An exporter that answers with an explicit
/// failure and one that raises a transport error are handled the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("Export rejected by collector: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Export timed out after {0:?}")]
    Timeout(Duration),
}

impl ExportError {
    /// Short label used in logs and span fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::Rejected(_) => "rejected",
            ExportError::Transport(_) => "transport",
            ExportError::Timeout(_) => "timeout",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Pipeline lifecycle error: {0}")]
    Lifecycle(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
