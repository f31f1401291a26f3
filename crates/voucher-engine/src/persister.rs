//! Bulk persistence with per-record fallback.
//!
//! [`BulkPersister::persist`] is an explicit two-phase write. Phase one hands
//! the whole batch to [`VoucherStore::save_all`]. If that returns an error of
//! any kind, phase two replays every record of the batch through
//! [`VoucherStore::save`], so a single poisoned record only fails itself.
//! Failed batches are always replayed in full rather than bisected.

use crate::{ProcessingStats, StoreError, VoucherRecord, metrics, store::VoucherStore};
use std::{sync::Arc, time::Instant};

/// How a batch ended up being written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistMode {
    Bulk,
    Replayed,
}

/// Outcome of persisting one batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistOutcome {
    pub mode: PersistMode,
    pub succeeded: u64,
    pub failed: u64,
}

impl PersistOutcome {
    pub const fn total(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Writes batches of vouchers and records every outcome in the shared stats.
pub struct BulkPersister {
    store: Arc<dyn VoucherStore>,
    stats: Arc<ProcessingStats>,
}

impl BulkPersister {
    pub fn new(store: Arc<dyn VoucherStore>, stats: Arc<ProcessingStats>) -> Self {
        Self { store, stats }
    }

    pub fn stats(&self) -> &Arc<ProcessingStats> {
        &self.stats
    }

    /// Persists `records`, falling back to individual writes if the bulk
    /// write fails.
    ///
    /// Every record is counted exactly once, either as a success or as a
    /// failure.
    pub async fn persist(&self, records: &[VoucherRecord]) -> PersistOutcome {
        if records.is_empty() {
            return PersistOutcome {
                mode: PersistMode::Bulk,
                succeeded: 0,
                failed: 0,
            };
        }

        let start = Instant::now();
        let outcome = match self.store.save_all(records).await {
            Ok(written) => {
                let written = written as u64;
                let total = self.stats.record_success(written);
                metrics::increment_persisted(written);
                tracing::debug!(
                    written,
                    total_success = total,
                    "Persisted vouchers in bulk"
                );
                PersistOutcome {
                    mode: PersistMode::Bulk,
                    succeeded: written,
                    failed: 0,
                }
            }
            Err(err) => self.replay_individually(records, &err).await,
        };
        metrics::record_persist_duration(start.elapsed().as_secs_f64() * 1_000.0);
        outcome
    }

    async fn replay_individually(
        &self,
        records: &[VoucherRecord],
        bulk_error: &StoreError,
    ) -> PersistOutcome {
        tracing::warn!(
            error = %bulk_error,
            records = records.len(),
            "Bulk write failed; replaying records individually"
        );
        metrics::increment_bulk_fallbacks();

        let mut succeeded = 0;
        let mut failed = 0;
        for record in records {
            match self.store.save(record).await {
                Ok(()) => {
                    succeeded += 1;
                    self.stats.record_success(1);
                }
                Err(err) => {
                    failed += 1;
                    tracing::error!(
                        voucher_number = %record.voucher_number,
                        error = %err,
                        "Voucher failed individual write"
                    );
                    self.stats
                        .record_failure(record.voucher_number.clone(), err.to_string());
                }
            }
        }
        metrics::increment_persisted(succeeded);
        metrics::increment_failed(failed);

        PersistOutcome {
            mode: PersistMode::Replayed,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VoucherGenerator, store::InMemoryVoucherStore};
    use chrono::NaiveDate;

    fn records(range: core::ops::Range<u64>) -> Vec<VoucherRecord> {
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        VoucherGenerator::new().generate_range(range, date)
    }

    fn persister(store: &Arc<InMemoryVoucherStore>) -> BulkPersister {
        BulkPersister::new(store.clone(), Arc::new(ProcessingStats::default()))
    }

    #[tokio::test]
    async fn clean_batch_is_written_in_bulk() {
        let store = Arc::new(InMemoryVoucherStore::new());
        let persister = persister(&store);

        let outcome = persister.persist(&records(0..50)).await;

        assert_eq!(outcome.mode, PersistMode::Bulk);
        assert_eq!(outcome.succeeded, 50);
        assert_eq!(store.bulk_calls(), 1);
        assert_eq!(store.single_calls(), 0);
        assert_eq!(persister.stats().snapshot().succeeded, 50);
    }

    #[tokio::test]
    async fn one_duplicate_does_not_sink_its_siblings() {
        let store = Arc::new(InMemoryVoucherStore::new());
        let batch = records(1..6);
        // #3 already exists, so the bulk insert violates the unique constraint.
        store.save(&batch[2]).await.unwrap();
        let persister = persister(&store);
        persister.stats().record_received(batch.len() as u64);

        let outcome = persister.persist(&batch).await;

        assert_eq!(outcome.mode, PersistMode::Replayed);
        assert_eq!((outcome.succeeded, outcome.failed), (4, 1));
        let snapshot = persister.stats().snapshot();
        assert_eq!(
            (snapshot.processed, snapshot.succeeded, snapshot.failed),
            (5, 4, 1)
        );
        let reason = persister.stats().failure_reason("DV0000000003").unwrap();
        assert!(reason.contains("duplicate"), "{reason}");
        for number in ["DV0000000001", "DV0000000002", "DV0000000004", "DV0000000005"] {
            assert!(store.contains(number));
        }
    }

    #[tokio::test]
    async fn bulk_outage_with_healthy_replay_counts_successes() {
        let store = Arc::new(InMemoryVoucherStore::new());
        store.set_bulk_unavailable(true);
        let persister = persister(&store);

        let outcome = persister.persist(&records(0..20)).await;

        assert_eq!(outcome.mode, PersistMode::Replayed);
        assert_eq!((outcome.succeeded, outcome.failed), (20, 0));
        assert_eq!(persister.stats().failed_items_len(), 0);
        assert_eq!(store.len(), 20);
    }

    #[tokio::test]
    async fn bulk_outage_with_failing_replay_records_every_cause() {
        let store = Arc::new(InMemoryVoucherStore::new());
        store.set_bulk_unavailable(true);
        let batch = records(0..4);
        for record in &batch {
            store.reject(record.voucher_number.clone(), "ledger closed");
        }
        let persister = persister(&store);

        let outcome = persister.persist(&batch).await;

        assert_eq!((outcome.succeeded, outcome.failed), (0, 4));
        assert_eq!(outcome.total(), batch.len() as u64);
        assert_eq!(persister.stats().failed_items_len(), 4);
        assert_eq!(persister.stats().snapshot().failed, 4);
    }

    #[tokio::test]
    async fn empty_batch_touches_nothing() {
        let store = Arc::new(InMemoryVoucherStore::new());
        let outcome = persister(&store).persist(&[]).await;
        assert_eq!(outcome.total(), 0);
        assert_eq!(store.bulk_calls(), 0);
    }
}
