// SPDX-License-Identifier: MIT OR Apache-2.0

//! The export worker: the single consumer of the inbound queue.

use super::delivery::DeliveryCore;
use crate::export::{Exporter, TelemetryBatch};
use crate::runtime::DeliveryPath;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Takes batches off the inbound queue and delivers them.
///
/// A batch goes straight to the retry buffer when the circuit breaker refuses
/// traffic, when every retry failed, or when shutdown interrupts its delivery.
#[derive(Debug)]
pub(crate) struct ExportWorker<E> {
    core: Arc<DeliveryCore<E>>,
    queue: mpsc::Receiver<TelemetryBatch>,
}

impl<E: Exporter> ExportWorker<E> {
    pub(crate) fn new(core: Arc<DeliveryCore<E>>, queue: mpsc::Receiver<TelemetryBatch>) -> Self {
        Self { core, queue }
    }

    /// Consume the queue until `token` is cancelled.
    ///
    /// On exit the queue is closed and whatever is still queued is moved into
    /// the retry buffer so the final flush can attempt it.
    pub(crate) async fn run(mut self, token: CancellationToken) {
        info!(target: "telemetry_pipeline::worker", "export worker starting");

        loop {
            let batch = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                batch = self.queue.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            self.handle(batch, &token).await;
        }

        self.drain();
        info!(target: "telemetry_pipeline::worker", "export worker stopped");
    }

    async fn handle(&self, batch: TelemetryBatch, token: &CancellationToken) {
        if !self.core.breaker().can_execute() {
            debug!(
                target: "telemetry_pipeline::worker",
                signal = %batch.kind(),
                "circuit open, buffering batch"
            );
            self.core.metrics().update(|c| c.rejected += 1);
            self.core.buffer_batch(batch);
            return;
        }

        let delivered = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            delivered = self.core.deliver(&batch, DeliveryPath::Worker) => Some(delivered),
        };

        match delivered {
            Some(true) => {}
            Some(false) => self.core.buffer_batch(batch),
            None => {
                debug!(
                    target: "telemetry_pipeline::worker",
                    signal = %batch.kind(),
                    "delivery interrupted by shutdown, buffering batch"
                );
                self.core.buffer_batch(batch);
            }
        }
    }

    fn drain(&mut self) {
        self.queue.close();
        let mut moved = 0u64;
        while let Ok(batch) = self.queue.try_recv() {
            self.core.buffer_batch(batch);
            moved += 1;
        }
        if moved > 0 {
            info!(
                target: "telemetry_pipeline::worker",
                moved,
                "moved queued batches into the retry buffer"
            );
        }
    }
}
