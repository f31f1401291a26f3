//! Delivers voucher records to the message channel.
//!
//! Small lists, or any list when batching is disabled or unavailable, are
//! published one record per send and every success is a confirmed delivery.
//! Larger lists go through the [`BatchingTemplate`], where a success only
//! means the record was accepted into an outgoing batch. The two are reported
//! separately in [`PublishReport`] so callers never mistake one for the other.
//!
//! If a batched submission fails, the rest of the list (starting with the
//! record whose submission failed) is published individually.

use crate::{
    Result, VoucherRecord,
    channel::{BatchingTemplate, Channel, Destination},
    codec, metrics,
};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Delivery counts for one published list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Records the channel confirmed holding.
    pub confirmed: u64,
    /// Records accepted by the batching layer but not yet confirmed.
    pub accepted: u64,
    /// Records that could not be handed to the channel at all.
    pub failed: u64,
}

impl PublishReport {
    /// Records handed to the channel, confirmed or accepted.
    pub const fn published(&self) -> u64 {
        self.confirmed + self.accepted
    }
}

/// Running delivery counts shared by concurrent publishes, updated as each
/// record is handed over.
#[derive(Debug, Default)]
pub struct PublishTally {
    confirmed: AtomicU64,
    accepted: AtomicU64,
    failed: AtomicU64,
}

impl PublishTally {
    pub fn report(&self) -> PublishReport {
        PublishReport {
            confirmed: self.confirmed.load(Ordering::Acquire),
            accepted: self.accepted.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

/// Counts for one publish call, mirrored into an optional shared tally.
struct Outcomes<'a> {
    report: PublishReport,
    shared: Option<&'a PublishTally>,
}

impl Outcomes<'_> {
    fn confirmed(&mut self) {
        self.report.confirmed += 1;
        if let Some(shared) = self.shared {
            shared.confirmed.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn accepted(&mut self) {
        self.report.accepted += 1;
        if let Some(shared) = self.shared {
            shared.accepted.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn failed(&mut self) {
        self.report.failed += 1;
        if let Some(shared) = self.shared {
            shared.failed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Publishes records individually or through an accumulating batch layer.
pub struct Publisher {
    channel: Arc<dyn Channel>,
    batching: Option<Arc<BatchingTemplate>>,
    destination: Destination,
    use_batching: bool,
    individual_threshold: usize,
}

impl Publisher {
    pub fn new(channel: Arc<dyn Channel>, destination: Destination) -> Self {
        Self {
            channel,
            batching: None,
            destination,
            use_batching: false,
            individual_threshold: 10,
        }
    }

    /// Routes large lists through `template`.
    #[must_use]
    pub fn with_batching(mut self, template: Arc<BatchingTemplate>, enabled: bool) -> Self {
        self.batching = Some(template);
        self.use_batching = enabled;
        self
    }

    /// Lists of at most `threshold` records are always sent individually.
    #[must_use]
    pub const fn with_individual_threshold(mut self, threshold: usize) -> Self {
        self.individual_threshold = threshold;
        self
    }

    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn batching(&self) -> Option<&Arc<BatchingTemplate>> {
        self.batching.as_ref()
    }

    /// Whether a list of `len` records would go through the batching layer.
    pub fn batches(&self, len: usize) -> bool {
        self.use_batching && self.batching.is_some() && len > self.individual_threshold
    }

    /// Publishes every record in `records`.
    ///
    /// Never fails as a whole: per-record problems are logged and counted in
    /// [`PublishReport::failed`].
    pub async fn publish(&self, records: &[VoucherRecord]) -> PublishReport {
        self.publish_counted(records, None).await
    }

    /// Like [`Publisher::publish`], also adding each record's outcome to
    /// `tally` as soon as it is known.
    pub async fn publish_into(
        &self,
        records: &[VoucherRecord],
        tally: &PublishTally,
    ) -> PublishReport {
        self.publish_counted(records, Some(tally)).await
    }

    async fn publish_counted(
        &self,
        records: &[VoucherRecord],
        shared: Option<&PublishTally>,
    ) -> PublishReport {
        let mut outcomes = Outcomes {
            report: PublishReport::default(),
            shared,
        };
        match self.batching.as_ref() {
            Some(template) if self.batches(records.len()) => {
                self.publish_batched(template, records, &mut outcomes).await;
            }
            _ => self.publish_individually(records, &mut outcomes).await,
        }
        let report = outcomes.report;
        metrics::increment_confirmed(report.confirmed);
        metrics::increment_accepted(report.accepted);
        report
    }

    async fn publish_batched(
        &self,
        template: &BatchingTemplate,
        records: &[VoucherRecord],
        outcomes: &mut Outcomes<'_>,
    ) {
        for (submitted, record) in records.iter().enumerate() {
            if let Err(e) = self.submit(template, record).await {
                tracing::warn!(
                    voucher_number = %record.voucher_number,
                    remaining = records.len() - submitted,
                    "Batch publishing failed, falling back to individual publishing: {e}"
                );
                self.publish_individually(&records[submitted..], outcomes)
                    .await;
                return;
            }
            outcomes.accepted();
        }
    }

    async fn submit(&self, template: &BatchingTemplate, record: &VoucherRecord) -> Result<()> {
        let message = codec::encode(record)?;
        template.submit(&self.destination, message).await
    }

    async fn publish_individually(&self, records: &[VoucherRecord], outcomes: &mut Outcomes<'_>) {
        for record in records {
            match self.send(record).await {
                Ok(()) => outcomes.confirmed(),
                Err(e) => {
                    outcomes.failed();
                    tracing::error!(
                        voucher_number = %record.voucher_number,
                        "Error publishing voucher: {e}"
                    );
                }
            }
        }
    }

    /// Sends one record and waits for the channel to hold it.
    pub async fn send(&self, record: &VoucherRecord) -> Result<()> {
        let message = codec::encode(record)?;
        self.channel.send(&self.destination, message).await
    }
}
