// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic and recovery-triggered redelivery from the retry buffer.

use super::delivery::DeliveryCore;
use crate::export::Exporter;
use crate::runtime::{DeliveryPath, ExportAttempt, FlushReport, ReconcileReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Drives reconciliation passes over the retry buffer.
///
/// Passes run on a fixed interval and whenever the health probe reports a
/// recovery. Both triggers are served by this one loop, so passes never
/// overlap.
#[derive(Debug)]
pub(crate) struct BufferReconciler<E> {
    core: Arc<DeliveryCore<E>>,
    interval: Duration,
    recovery: Arc<Notify>,
}

impl<E: Exporter> BufferReconciler<E> {
    pub(crate) fn new(
        core: Arc<DeliveryCore<E>>,
        interval: Duration,
        recovery: Arc<Notify>,
    ) -> Self {
        Self {
            core,
            interval,
            recovery,
        }
    }

    /// Reconcile until `token` is cancelled. The first periodic pass runs one
    /// interval after start.
    pub(crate) async fn run(self, token: CancellationToken) {
        info!(
            target: "telemetry_pipeline::reconciler",
            interval_ms = self.interval.as_millis() as u64,
            "buffer reconciler starting"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.recovery.notified() => {
                    info!(
                        target: "telemetry_pipeline::reconciler",
                        buffered = self.core.buffer().len(),
                        "collector recovered, reconciling buffer"
                    );
                    self.reconcile_once(&token).await;
                }
                _ = ticker.tick() => {
                    self.reconcile_once(&token).await;
                }
            }
        }

        info!(target: "telemetry_pipeline::reconciler", "buffer reconciler stopped");
    }

    /// Run one pass. The breaker is consulted before every entry, and a
    /// cancelled `token` ends the pass with the in-flight entry kept.
    pub(crate) async fn reconcile_once(&self, token: &CancellationToken) -> ReconcileReport {
        let core = &*self.core;
        let report = core
            .buffer()
            .reconcile(
                || !token.is_cancelled() && core.breaker().can_execute(),
                |batch| async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => ExportAttempt::Interrupted,
                        delivered = core.deliver(&batch, DeliveryPath::Reconcile) => {
                            ExportAttempt::from(delivered)
                        }
                    }
                },
            )
            .await;

        if report.expired > 0 || report.dropped > 0 {
            core.metrics().update(|c| {
                c.expired += report.expired;
                c.dropped += report.dropped;
            });
        }

        if report.interrupted {
            debug!(
                target: "telemetry_pipeline::reconciler",
                retained = report.retained,
                "reconciliation pass interrupted by shutdown"
            );
        }
        report
    }
}

/// Give every buffered batch one last bounded attempt and empty the buffer.
///
/// Batches that still fail are counted as dropped.
pub(crate) async fn flush_buffer<E: Exporter>(core: &DeliveryCore<E>) -> FlushReport {
    let report = core
        .buffer()
        .flush(|batch| async move { core.deliver_once(&batch).await })
        .await;
    if report.lost > 0 {
        core.metrics().update(|c| c.dropped += report.lost);
    }
    report
}
