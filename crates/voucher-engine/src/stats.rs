//! Running statistics for the consume side of the pipeline.
//!
//! [`ProcessingStats`] is owned by the pipeline instance and shared by `Arc`
//! between the consumer, the persister and whoever reports on progress. The
//! counters are plain atomics; the failed-item map sits behind a mutex and is
//! capped, evicting its oldest entries first.
//!
//! Counters are cumulative until [`ProcessingStats::reset`] is called.
//! Resets bump a sequence number so that [`ProcessingStats::snapshot`] never
//! observes a half-reset state.

use core::fmt;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::collections::{HashMap, VecDeque};

/// Failed items logged alongside a progress report.
const FAILED_SAMPLE_SIZE: usize = 5;

/// A progress report includes a failure sample every this many failures.
const FAILED_SAMPLE_EVERY: u64 = 100;

/// Shared, concurrency-safe processing counters.
#[derive(Debug)]
pub struct ProcessingStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    // Odd while a reset is in progress.
    seq: AtomicU64,
    failed_items: Mutex<FailedItems>,
}

#[derive(Debug)]
struct FailedItems {
    cap: usize,
    reasons: HashMap<String, String>,
    order: VecDeque<String>,
}

impl FailedItems {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            reasons: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, voucher_number: String, reason: String) {
        if self
            .reasons
            .insert(voucher_number.clone(), reason)
            .is_none()
        {
            self.order.push_back(voucher_number);
        }
        while self.reasons.len() > self.cap {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.reasons.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn sample(&self, limit: usize) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|key| {
                self.reasons
                    .get(key)
                    .map(|reason| (key.clone(), reason.clone()))
            })
            .take(limit)
            .collect()
    }

    fn clear(&mut self) {
        self.reasons.clear();
        self.order.clear();
    }
}

impl ProcessingStats {
    /// Creates zeroed statistics retaining at most `max_failed_items` causes.
    pub fn new(max_failed_items: usize) -> Self {
        Self {
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            failed_items: Mutex::new(FailedItems::new(max_failed_items)),
        }
    }

    /// Counts `count` received records and returns the new processed total.
    pub fn record_received(&self, count: u64) -> u64 {
        self.processed.fetch_add(count, Ordering::AcqRel) + count
    }

    pub fn record_success(&self, count: u64) -> u64 {
        self.succeeded.fetch_add(count, Ordering::AcqRel) + count
    }

    /// Counts one permanently failed record and remembers why.
    pub fn record_failure(&self, voucher_number: impl Into<String>, reason: impl Into<String>) {
        self.failed_items
            .lock()
            .insert(voucher_number.into(), reason.into());
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    /// Counts a message that could not be decoded into a record.
    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::AcqRel);
    }

    pub fn failure_reason(&self, voucher_number: &str) -> Option<String> {
        self.failed_items.lock().reasons.get(voucher_number).cloned()
    }

    /// Up to `limit` failed items, oldest first.
    pub fn failed_sample(&self, limit: usize) -> Vec<(String, String)> {
        self.failed_items.lock().sample(limit)
    }

    pub fn failed_items_len(&self) -> usize {
        self.failed_items.lock().reasons.len()
    }

    /// Zeroes every counter and clears the failed items.
    pub fn reset(&self) {
        let mut items = self.failed_items.lock();
        self.seq.fetch_add(1, Ordering::AcqRel);
        self.processed.store(0, Ordering::Release);
        self.succeeded.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Release);
        self.discarded.store(0, Ordering::Release);
        items.clear();
        self.seq.fetch_add(1, Ordering::AcqRel);
    }

    /// A consistent point-in-time view of the counters.
    ///
    /// Outcome counters are read before the processed count, which only
    /// grows between resets, so the snapshot never shows more outcomes than
    /// received records unless a reset raced with in-flight persistence.
    pub fn snapshot(&self) -> StatsSnapshot {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before % 2 == 1 {
                // A reset holds the failed-items lock for its whole write.
                drop(self.failed_items.lock());
                continue;
            }
            let succeeded = self.succeeded.load(Ordering::Acquire);
            let failed = self.failed.load(Ordering::Acquire);
            let discarded = self.discarded.load(Ordering::Acquire);
            let processed = self.processed.load(Ordering::Acquire);
            if self.seq.load(Ordering::Acquire) == before {
                return StatsSnapshot {
                    processed,
                    succeeded,
                    failed,
                    discarded,
                };
            }
        }
    }

    /// Logs the current progress, with a sample of failed items whenever the
    /// failure count is a non-zero multiple of 100.
    pub fn report_progress(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            processed = snapshot.processed,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            success_rate = %format!("{:.2}%", snapshot.success_rate()),
            "Bulk voucher processing progress"
        );

        if snapshot.failed > 0 && snapshot.failed % FAILED_SAMPLE_EVERY == 0 {
            let tracked = self.failed_items_len();
            for (voucher_number, reason) in self.failed_sample(FAILED_SAMPLE_SIZE) {
                tracing::warn!(%voucher_number, %reason, "Sample failed voucher");
            }
            if tracked > FAILED_SAMPLE_SIZE {
                tracing::warn!("... and {} more failed vouchers", tracked - FAILED_SAMPLE_SIZE);
            }
        }
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Point-in-time copy of [`ProcessingStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl StatsSnapshot {
    /// `succeeded * 100 / processed`, or `0` when nothing was processed.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / self.processed as f64
        }
    }

    /// Records received but not yet persisted or failed.
    pub fn pending(&self) -> u64 {
        self.processed
            .saturating_sub(self.succeeded.saturating_add(self.failed))
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed: {}, Successful: {}, Failed: {}, Success Rate: {:.2}%",
            self.processed,
            self.succeeded,
            self.failed,
            self.success_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn success_rate_is_zero_without_processing() {
        let stats = ProcessingStats::default();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.success_rate(), 0.0);
        assert_eq!(
            snapshot.to_string(),
            "Processed: 0, Successful: 0, Failed: 0, Success Rate: 0.00%"
        );
    }

    #[test]
    fn snapshot_waits_for_reset_in_progress() {
        let stats = Arc::new(ProcessingStats::default());
        stats.record_received(3);

        let items = stats.failed_items.lock();
        stats.seq.fetch_add(1, Ordering::AcqRel);
        let reader = std::thread::spawn({
            let stats = Arc::clone(&stats);
            move || stats.snapshot()
        });
        std::thread::sleep(core::time::Duration::from_millis(20));
        assert!(!reader.is_finished());

        stats.processed.store(0, Ordering::Release);
        stats.seq.fetch_add(1, Ordering::AcqRel);
        drop(items);

        assert_eq!(reader.join().unwrap().processed, 0);
    }

    #[test]
    fn reset_after_run_zeroes_everything() {
        let stats = ProcessingStats::default();
        stats.record_received(1_000);
        stats.record_success(950);
        for i in 0..50 {
            stats.record_failure(format!("DV{i:010}"), "duplicate");
        }
        let before = stats.snapshot();
        assert_eq!(before.success_rate(), 95.0);
        assert_eq!(
            before.to_string(),
            "Processed: 1000, Successful: 950, Failed: 50, Success Rate: 95.00%"
        );

        stats.reset();
        let after = stats.snapshot();
        assert_eq!(after, StatsSnapshot::default());
        assert_eq!(after.success_rate(), 0.0);
        assert_eq!(stats.failed_items_len(), 0);
    }

    #[test]
    fn reset_is_idempotent() {
        let stats = ProcessingStats::default();
        stats.record_received(3);
        stats.record_failure("DV0000000001", "boom");
        stats.reset();
        let once = stats.snapshot();
        stats.reset();
        assert_eq!(stats.snapshot(), once);
        assert_eq!(stats.failed_items_len(), 0);
    }

    #[test]
    fn failed_items_are_capped_oldest_first() {
        let stats = ProcessingStats::new(3);
        for i in 0..5 {
            stats.record_failure(format!("V{i}"), format!("reason {i}"));
        }
        assert_eq!(stats.snapshot().failed, 5);
        assert_eq!(stats.failed_items_len(), 3);
        assert_eq!(stats.failure_reason("V0"), None);
        assert_eq!(stats.failure_reason("V4").as_deref(), Some("reason 4"));
        let sample: Vec<_> = stats.failed_sample(10).into_iter().map(|(k, _)| k).collect();
        assert_eq!(sample, ["V2", "V3", "V4"]);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(ProcessingStats::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        stats.record_received(1);
                        if i % 10 == 0 {
                            stats.record_failure(format!("T{t}-{i}"), "x");
                        } else {
                            stats.record_success(1);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 8_000);
        assert_eq!(snapshot.succeeded, 7_200);
        assert_eq!(snapshot.failed, 800);
        assert_eq!(snapshot.pending(), 0);
    }
}
