//! Persistence backends for voucher records.
//!
//! A [`VoucherStore`] offers a bulk write that is all-or-nothing and a
//! single-record write. The [`BulkPersister`](crate::persister::BulkPersister)
//! drives both; backends only need to report failures faithfully.

pub mod memory;

use crate::{StoreError, VoucherRecord};
use async_trait::async_trait;

pub use memory::InMemoryVoucherStore;

#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Writes every record in one operation, returning the number written.
    ///
    /// Either all records are written or none are.
    async fn save_all(&self, records: &[VoucherRecord]) -> Result<usize, StoreError>;

    /// Writes a single record.
    async fn save(&self, record: &VoucherRecord) -> Result<(), StoreError>;
}
