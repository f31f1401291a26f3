//! In-memory store backend.
//!
//! Enforces the unique voucher-number constraint and treats bulk writes as a
//! single transaction. Rejections and bulk outages can be injected to
//! exercise the fallback paths. All data is lost when the process exits.

use super::VoucherStore;
use crate::{StoreError, VoucherRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct InMemoryVoucherStore {
    records: Mutex<HashMap<String, VoucherRecord>>,
    rejections: Mutex<HashMap<String, String>>,
    bulk_unavailable: AtomicBool,
    bulk_calls: AtomicU64,
    single_calls: AtomicU64,
}

impl InMemoryVoucherStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write of `voucher_number` fail with `reason`.
    pub fn reject(&self, voucher_number: impl Into<String>, reason: impl Into<String>) {
        self.rejections
            .lock()
            .insert(voucher_number.into(), reason.into());
    }

    /// Makes every bulk write fail as a whole while single writes still work.
    pub fn set_bulk_unavailable(&self, unavailable: bool) {
        self.bulk_unavailable.store(unavailable, Ordering::Release);
    }

    pub fn get(&self, voucher_number: &str) -> Option<VoucherRecord> {
        self.records.lock().get(voucher_number).cloned()
    }

    pub fn contains(&self, voucher_number: &str) -> bool {
        self.records.lock().contains_key(voucher_number)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of bulk writes attempted.
    pub fn bulk_calls(&self) -> u64 {
        self.bulk_calls.load(Ordering::Acquire)
    }

    /// Number of single-record writes attempted.
    pub fn single_calls(&self) -> u64 {
        self.single_calls.load(Ordering::Acquire)
    }

    fn check(
        &self,
        record: &VoucherRecord,
        existing: &HashMap<String, VoucherRecord>,
    ) -> Result<(), StoreError> {
        if let Some(reason) = self.rejections.lock().get(&record.voucher_number) {
            return Err(StoreError::Rejected {
                voucher_number: record.voucher_number.clone(),
                reason: reason.clone(),
            });
        }
        if existing.contains_key(&record.voucher_number) {
            return Err(StoreError::Duplicate {
                voucher_number: record.voucher_number.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VoucherStore for InMemoryVoucherStore {
    async fn save_all(&self, records: &[VoucherRecord]) -> Result<usize, StoreError> {
        self.bulk_calls.fetch_add(1, Ordering::AcqRel);
        if self.bulk_unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable {
                reason: "bulk writes are disabled".to_string(),
            });
        }

        let mut existing = self.records.lock();
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            self.check(record, &existing)?;
            if !seen.insert(record.voucher_number.as_str()) {
                return Err(StoreError::Duplicate {
                    voucher_number: record.voucher_number.clone(),
                });
            }
        }
        for record in records {
            existing.insert(record.voucher_number.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn save(&self, record: &VoucherRecord) -> Result<(), StoreError> {
        self.single_calls.fetch_add(1, Ordering::AcqRel);
        let mut existing = self.records.lock();
        self.check(record, &existing)?;
        existing.insert(record.voucher_number.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VoucherGenerator;
    use chrono::NaiveDate;

    fn records(range: core::ops::Range<u64>) -> Vec<VoucherRecord> {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        VoucherGenerator::new().generate_range(range, date)
    }

    #[tokio::test]
    async fn bulk_write_is_all_or_nothing() {
        let store = InMemoryVoucherStore::new();
        store.save(&records(2..3)[0]).await.unwrap();

        let err = store.save_all(&records(0..5)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Duplicate {
                voucher_number: "DV0000000002".to_string()
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn duplicates_inside_one_batch_are_rejected() {
        let store = InMemoryVoucherStore::new();
        let mut batch = records(0..3);
        batch.push(batch[0].clone());
        assert!(store.save_all(&batch).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn injected_rejection_applies_to_both_paths() {
        let store = InMemoryVoucherStore::new();
        store.reject("DV0000000001", "account frozen");

        assert!(store.save_all(&records(0..3)).await.is_err());
        let err = store.save(&records(1..2)[0]).await.unwrap_err();
        assert_eq!(err.voucher_number(), Some("DV0000000001"));
        assert_eq!(store.save_all(&records(2..4)).await, Ok(2));
    }
}
