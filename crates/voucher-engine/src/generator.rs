//! Synthetic voucher generation for load and bulk demos.
//!
//! The voucher number is a pure function of the index (`DV` followed by the
//! index zero-padded to ten digits). Everything else is drawn from the
//! supplied random source, so seeding the source makes the whole record
//! reproducible.

use crate::{VoucherRecord, VoucherStatus};
use chrono::NaiveDate;
use rand::Rng;
use rust_decimal::Decimal;

const DEBIT_ACCOUNTS: [&str; 10] = [
    "1001", "1002", "1003", "1004", "1005", "1006", "1007", "1008", "1009", "1010",
];

const CREDIT_ACCOUNTS: [&str; 10] = [
    "2001", "2002", "2003", "2004", "2005", "2006", "2007", "2008", "2009", "2010",
];

const DESCRIPTIONS: [&str; 10] = [
    "Salary payment",
    "Vendor payment",
    "Utility bill",
    "Office supplies",
    "Rent payment",
    "Insurance premium",
    "Maintenance cost",
    "Travel expense",
    "Training cost",
    "Miscellaneous expense",
];

/// Exclusive upper bound of generated amounts, in cents.
const MAX_AMOUNT_CENTS: i64 = 1_000_000;

/// Author recorded on every synthesized voucher.
pub const SYSTEM_USER: &str = "SYSTEM";

/// Produces synthetic [`VoucherRecord`]s indexed by position.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoucherGenerator;

impl VoucherGenerator {
    pub const fn new() -> Self {
        Self
    }

    /// Formats the voucher number for `index`.
    pub fn voucher_number(index: u64) -> String {
        format!("DV{index:010}")
    }

    /// Generates the voucher at `index` using the thread-local random source.
    pub fn generate(&self, index: u64, reference_date: NaiveDate) -> VoucherRecord {
        self.generate_with(index, reference_date, &mut rand::rng())
    }

    /// Generates the voucher at `index`, drawing amount, description and
    /// accounts from `rng`.
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        index: u64,
        reference_date: NaiveDate,
        rng: &mut R,
    ) -> VoucherRecord {
        let cents = rng.random_range(0..MAX_AMOUNT_CENTS);
        let description = DESCRIPTIONS[rng.random_range(0..DESCRIPTIONS.len())];
        let debit_account = DEBIT_ACCOUNTS[rng.random_range(0..DEBIT_ACCOUNTS.len())];
        let credit_account = CREDIT_ACCOUNTS[rng.random_range(0..CREDIT_ACCOUNTS.len())];

        VoucherRecord {
            voucher_number: Self::voucher_number(index),
            voucher_date: reference_date,
            amount: Decimal::new(cents, 2),
            description: description.to_string(),
            created_by: SYSTEM_USER.to_string(),
            created_date: reference_date,
            status: VoucherStatus::PendingApproval,
            debit_account: debit_account.to_string(),
            credit_account: credit_account.to_string(),
        }
    }

    /// Generates every voucher in `range` with one thread-local random source.
    pub fn generate_range(
        &self,
        range: core::ops::Range<u64>,
        reference_date: NaiveDate,
    ) -> Vec<VoucherRecord> {
        let mut rng = rand::rng();
        range
            .map(|index| self.generate_with(index, reference_date, &mut rng))
            .collect()
    }
}
