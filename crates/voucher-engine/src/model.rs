//! Voucher records and the ranges used to partition generation work.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a voucher.
///
/// Serialized in `SCREAMING_SNAKE_CASE` (`PENDING_APPROVAL`) to match the
/// message schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherStatus {
    #[default]
    Draft,
    PendingApproval,
    Approved,
    Rejected,
}

/// A single debit voucher as it travels through the pipeline.
///
/// Records are never mutated once handed to the pipeline; stages clone or
/// borrow them. Field names on the wire are camelCase and stable across
/// versions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherRecord {
    pub voucher_number: String,
    pub voucher_date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub created_by: String,
    pub created_date: NaiveDate,
    pub status: VoucherStatus,
    pub debit_account: String,
    pub credit_account: String,
}

/// A half-open index range `[start, end)` over one generation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PartitionRange {
    pub start: u64,
    pub end: u64,
}

impl PartitionRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of indices covered by this range.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn indices(&self) -> core::ops::Range<u64> {
        self.start..self.end
    }
}
