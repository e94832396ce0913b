// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted collaborators for exercising a pipeline without a collector.
//!
//! Both types answer from a script first and fall back to a default outcome
//! once the script runs out. The default can be flipped while a pipeline is
//! running to simulate an outage or a recovery.

use crate::error::ExportError;
use crate::export::{Exporter, TelemetryBatch};
use crate::health::Prober;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted export outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStep {
    /// Accept the batch.
    Succeed,
    /// Answer with an explicit failure.
    Reject(String),
    /// Fail as if the connection broke.
    Transport(String),
    /// Never answer; only the caller's timeout ends the attempt.
    Hang,
}

#[derive(Debug)]
struct ExporterScript {
    steps: VecDeque<ExportStep>,
    default: ExportStep,
    delivered: Vec<TelemetryBatch>,
    calls: u64,
}

/// An [`Exporter`] that replays scripted outcomes and records deliveries.
#[derive(Debug)]
pub struct ScriptedExporter {
    script: Mutex<ExporterScript>,
}

impl ScriptedExporter {
    /// An exporter that answers `default` once the script is empty.
    pub fn new(default: ExportStep) -> Self {
        Self {
            script: Mutex::new(ExporterScript {
                steps: VecDeque::new(),
                default,
                delivered: Vec::new(),
                calls: 0,
            }),
        }
    }

    /// An exporter that accepts everything.
    pub fn succeeding() -> Self {
        Self::new(ExportStep::Succeed)
    }

    /// An exporter whose collector is unreachable.
    pub fn failing() -> Self {
        Self::new(ExportStep::Transport("connection refused".to_string()))
    }

    /// An exporter that never answers.
    pub fn hanging() -> Self {
        Self::new(ExportStep::Hang)
    }

    /// An exporter that fails `times` calls, then accepts everything.
    pub fn fail_times(times: usize) -> Self {
        let exporter = Self::succeeding();
        {
            let mut script = lock(&exporter.script);
            for _ in 0..times {
                script
                    .steps
                    .push_back(ExportStep::Transport("connection refused".to_string()));
            }
        }
        exporter
    }

    /// Append a step to the script.
    #[must_use]
    pub fn then(self, step: ExportStep) -> Self {
        lock(&self.script).steps.push_back(step);
        self
    }

    /// Replace the fallback outcome.
    pub fn set_default(&self, step: ExportStep) {
        lock(&self.script).default = step;
    }

    /// Batches accepted so far, in delivery order.
    pub fn delivered(&self) -> Vec<TelemetryBatch> {
        lock(&self.script).delivered.clone()
    }

    /// Export calls made so far.
    pub fn calls(&self) -> u64 {
        lock(&self.script).calls
    }
}

impl Exporter for ScriptedExporter {
    async fn export(&self, batch: &TelemetryBatch, _timeout: Duration) -> Result<(), ExportError> {
        let step = {
            let mut script = lock(&self.script);
            script.calls += 1;
            match script.steps.pop_front() {
                Some(step) => step,
                None => script.default.clone(),
            }
        };

        match step {
            ExportStep::Succeed => {
                lock(&self.script).delivered.push(batch.clone());
                Ok(())
            }
            ExportStep::Reject(reason) => Err(ExportError::Rejected(reason)),
            ExportStep::Transport(reason) => Err(ExportError::Transport(reason)),
            ExportStep::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
struct ProberScript {
    outcomes: VecDeque<bool>,
    default: bool,
    delay: Duration,
    calls: u64,
}

/// A [`Prober`] that replays scripted reachability answers.
#[derive(Debug)]
pub struct ScriptedProber {
    script: Mutex<ProberScript>,
}

impl ScriptedProber {
    /// A prober that answers `default` once the script is empty.
    pub fn new(default: bool) -> Self {
        Self {
            script: Mutex::new(ProberScript {
                outcomes: VecDeque::new(),
                default,
                delay: Duration::ZERO,
                calls: 0,
            }),
        }
    }

    /// A prober that always finds the collector reachable.
    pub fn healthy() -> Self {
        Self::new(true)
    }

    /// A prober that never reaches the collector.
    pub fn unhealthy() -> Self {
        Self::new(false)
    }

    /// Append outcomes to the script.
    #[must_use]
    pub fn then(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        lock(&self.script).outcomes.extend(outcomes);
        self
    }

    /// Make every probe take `delay` before answering.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        lock(&self.script).delay = delay;
        self
    }

    /// Replace the fallback outcome.
    pub fn set_default(&self, healthy: bool) {
        lock(&self.script).default = healthy;
    }

    /// Probes made so far.
    pub fn calls(&self) -> u64 {
        lock(&self.script).calls
    }
}

impl Prober for ScriptedProber {
    async fn probe(&self, _timeout: Duration) -> bool {
        let (healthy, delay) = {
            let mut script = lock(&self.script);
            script.calls += 1;
            let healthy = script.outcomes.pop_front().unwrap_or(script.default);
            (healthy, script.delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        healthy
    }
}
