// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded FIFO buffer holding batches that await re-delivery.
//!
//! The buffer never grows past its capacity: pushing into a full buffer
//! evicts the oldest entry. Reconciliation passes expire entries older than
//! `max_age`, re-export the rest while the caller allows it, and drop entries
//! that keep failing.
//!
//! The lock is only held for bookkeeping. Entries stay in the buffer while a
//! pass exports a copy of them with the lock released, so `len` and eviction
//! keep working during the pass. Each entry carries a sequence number that
//! lets the pass find it again, or notice that a push evicted it.

use crate::error::{PipelineError, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for a [`RetryBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Maximum number of buffered entries.
    pub capacity: usize,
    /// Entries older than this are expired on the next reconciliation pass.
    pub max_age: Duration,
    /// Failed reconciliation exports after which an entry is dropped.
    pub max_retries: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_age: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}

impl BufferConfig {
    /// Create a new buffer configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the maximum entry age.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the per-entry retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check the configuration for values the buffer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::Config(
                "buffer capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_age.is_zero() {
            return Err(PipelineError::Config(
                "buffer max_age must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(PipelineError::Config(
                "buffer max_retries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// An entry owned by the buffer.
#[derive(Debug, Clone)]
pub struct BufferedItem<T> {
    seq: u64,
    payload: T,
    enqueued_at: Instant,
    retry_count: u32,
}

impl<T> BufferedItem<T> {
    fn new(seq: u64, payload: T) -> Self {
        Self {
            seq,
            payload,
            enqueued_at: Instant::now(),
            retry_count: 0,
        }
    }

    /// The buffered payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consume the entry, returning its payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Time since the entry was buffered.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Failed reconciliation exports so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

/// Outcome of one export attempt during a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportAttempt {
    /// The entry was delivered and leaves the buffer.
    Exported,
    /// The attempt failed and counts against the entry's retry budget.
    Failed,
    /// The attempt was abandoned, typically for shutdown. The entry and
    /// everything after it are kept untouched.
    Interrupted,
}

impl From<bool> for ExportAttempt {
    fn from(exported: bool) -> Self {
        if exported {
            ExportAttempt::Exported
        } else {
            ExportAttempt::Failed
        }
    }
}

/// What a reconciliation pass did.
///
/// Entries evicted by pushes while the pass runs are reported by
/// [`RetryBuffer::push`], not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries exported and removed.
    pub processed: u64,
    /// Entries removed for exceeding `max_age`.
    pub expired: u64,
    /// Entries removed after exhausting their retry budget.
    pub dropped: u64,
    /// Export attempts that failed but left the entry in place.
    pub failed: u64,
    /// Entries left in the buffer after the pass.
    pub retained: usize,
    /// The pass stopped early on an interrupted attempt.
    pub interrupted: bool,
}

impl ReconcileReport {
    /// Returns `true` if the pass neither removed nor attempted anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.processed == 0 && self.expired == 0 && self.dropped == 0 && self.failed == 0
    }
}

/// What a shutdown flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub exported: u64,
    pub lost: u64,
}

#[derive(Debug)]
struct Entries<T> {
    items: VecDeque<BufferedItem<T>>,
    next_seq: u64,
}

impl<T> Entries<T> {
    /// Index of the entry with sequence number `seq`. Entries are ordered by
    /// sequence number, oldest first.
    fn position(&self, seq: u64) -> Option<usize> {
        let index = self.items.partition_point(|item| item.seq < seq);
        match self.items.get(index) {
            Some(item) if item.seq == seq => Some(index),
            _ => None,
        }
    }
}

/// Fixed-capacity buffer with oldest-first eviction.
#[derive(Debug)]
pub struct RetryBuffer<T> {
    config: BufferConfig,
    entries: Mutex<Entries<T>>,
}

impl<T: Clone> RetryBuffer<T> {
    /// Create a new buffer.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            entries: Mutex::new(Entries {
                items: VecDeque::with_capacity(config.capacity.min(1024)),
                next_seq: 0,
            }),
            config,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Entries<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a payload, returning the entry evicted to make room, if any.
    pub fn push(&self, payload: T) -> Option<BufferedItem<T>> {
        let mut entries = self.lock();
        let evicted = if entries.items.len() >= self.config.capacity {
            entries.items.pop_front()
        } else {
            None
        };
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.items.push_back(BufferedItem::new(seq, payload));
        drop(entries);

        if let Some(ref old) = evicted {
            warn!(
                target: "telemetry_pipeline::buffer",
                capacity = self.config.capacity,
                age_ms = old.age().as_millis() as u64,
                "buffer full, evicted oldest entry"
            );
        }
        evicted
    }

    /// Find the next entry at or after `from` and before `end` that is still
    /// fresh, expiring stale ones on the way. Returns its sequence number and
    /// a copy of its payload.
    fn next_pending(&self, from: u64, end: u64, report: &mut ReconcileReport) -> Option<(u64, T)> {
        let mut entries = self.lock();
        let mut from = from;
        loop {
            let index = entries.items.partition_point(|item| item.seq < from);
            let item = entries.items.get(index)?;
            if item.seq >= end {
                return None;
            }
            if item.age() > self.config.max_age {
                from = item.seq + 1;
                entries.items.remove(index);
                report.expired += 1;
                continue;
            }
            return Some((item.seq, item.payload.clone()));
        }
    }

    /// Apply a failed export to entry `seq`. An entry evicted while the
    /// export ran is left alone.
    fn record_failure(&self, seq: u64, report: &mut ReconcileReport) {
        let mut entries = self.lock();
        let Some(index) = entries.position(seq) else {
            return;
        };
        let item = &mut entries.items[index];
        item.retry_count += 1;
        let retry_count = item.retry_count;
        if retry_count >= self.config.max_retries {
            entries.items.remove(index);
            report.dropped += 1;
            debug!(
                target: "telemetry_pipeline::buffer",
                retry_count,
                "dropping buffered entry after exhausting retries"
            );
        } else {
            report.failed += 1;
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Entries present when the pass starts are visited oldest first; entries
    /// pushed during the pass wait for the next one. Expired entries are
    /// removed without an export attempt. For the others, `can_export` is
    /// asked before each attempt; when it says no the entry is kept untouched.
    /// A failed export bumps the entry's retry count and drops it once the
    /// budget is spent. After an [`ExportAttempt::Interrupted`] no further
    /// exports are tried.
    pub async fn reconcile<G, F, Fut>(&self, mut can_export: G, mut export: F) -> ReconcileReport
    where
        G: FnMut() -> bool,
        F: FnMut(T) -> Fut,
        Fut: Future,
        Fut::Output: Into<ExportAttempt>,
    {
        let mut report = ReconcileReport::default();
        let end = self.lock().next_seq;
        let mut cursor = 0;

        while let Some((seq, payload)) = self.next_pending(cursor, end, &mut report) {
            cursor = seq + 1;
            if report.interrupted || !can_export() {
                continue;
            }
            let attempt: ExportAttempt = export(payload).await.into();
            match attempt {
                ExportAttempt::Exported => {
                    let mut entries = self.lock();
                    if let Some(index) = entries.position(seq) {
                        entries.items.remove(index);
                    }
                    report.processed += 1;
                }
                ExportAttempt::Interrupted => report.interrupted = true,
                ExportAttempt::Failed => self.record_failure(seq, &mut report),
            }
        }

        report.retained = self.len();
        if !report.is_noop() {
            info!(
                target: "telemetry_pipeline::buffer",
                processed = report.processed,
                expired = report.expired,
                dropped = report.dropped,
                failed = report.failed,
                retained = report.retained,
                "buffer reconciliation pass finished"
            );
        }
        report
    }

    /// Export every entry present at the start once, removing each as it is
    /// attempted.
    ///
    /// Entries whose export fails are lost. Flushing an empty buffer does
    /// nothing.
    pub async fn flush<F, Fut>(&self, mut export: F) -> FlushReport
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut report = FlushReport::default();
        let end = self.lock().next_seq;

        loop {
            let next = {
                let mut entries = self.lock();
                let due = entries.items.front().is_some_and(|item| item.seq < end);
                if due {
                    entries.items.pop_front()
                } else {
                    None
                }
            };
            let Some(item) = next else {
                break;
            };
            if export(item.into_payload()).await {
                report.exported += 1;
            } else {
                report.lost += 1;
            }
        }

        if report.lost > 0 {
            warn!(
                target: "telemetry_pipeline::buffer",
                exported = report.exported,
                lost = report.lost,
                "buffer flushed with data loss"
            );
        } else if report.exported > 0 {
            info!(
                target: "telemetry_pipeline::buffer",
                exported = report.exported,
                "buffer flushed"
            );
        }
        report
    }

    /// Remove every entry without exporting, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.items.len();
        entries.items.clear();
        count
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns `true` if the buffer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Copies of the buffered payloads, oldest first.
    pub fn payloads(&self) -> Vec<T> {
        self.lock()
            .items
            .iter()
            .map(|item| item.payload.clone())
            .collect()
    }

    /// Get the buffer configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }
}
