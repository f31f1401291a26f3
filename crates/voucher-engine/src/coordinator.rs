//! Fan-out of a generation request across a bounded worker pool.
//!
//! [`GenerationCoordinator::generate`] partitions the requested count, runs
//! one generate-then-publish job per partition on a fresh [`WorkerPool`] of
//! exactly `worker_count` workers, and waits for all of them up to the
//! generation timeout. Running out of time is not an error: whatever was
//! published so far is returned with [`GenerationReport::timed_out`] set.

use crate::{
    Error, Result, VoucherGenerator,
    partition::Partitions,
    pool::WorkerPool,
    publisher::{PublishTally, Publisher},
};
use chrono::{Local, NaiveDate};
use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::{sync::oneshot, time::timeout};

/// Grace period for the pool after every partition has reported back.
const POOL_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Result of one generation request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Number of vouchers asked for.
    pub requested: u64,
    /// Vouchers the channel confirmed holding.
    pub confirmed: u64,
    /// Vouchers accepted by the batching layer, not yet confirmed.
    pub accepted: u64,
    /// Vouchers that could not be published.
    pub failed: u64,
    /// Partitions that never reported back (panicked or cancelled).
    pub lost_partitions: u64,
    /// The generation timeout elapsed before every partition finished.
    pub timed_out: bool,
}

impl GenerationReport {
    pub const fn published(&self) -> u64 {
        self.confirmed + self.accepted
    }

    /// `published * 100 / requested`, or `0` for an empty request.
    pub fn success_rate(&self) -> f64 {
        if self.requested == 0 {
            0.0
        } else {
            self.published() as f64 * 100.0 / self.requested as f64
        }
    }
}

/// Counters shared by every job of one request.
///
/// Publish outcomes are counted per record, so a timed-out request still
/// reports what its unfinished partitions delivered.
#[derive(Default)]
struct Progress {
    published: PublishTally,
    generated: AtomicU64,
}

impl Progress {
    /// Marks one partition finished and returns the new generated total.
    fn finish(&self, generated: u64) -> u64 {
        self.generated.fetch_add(generated, Ordering::AcqRel) + generated
    }
}

/// Runs generation requests against a [`Publisher`].
pub struct GenerationCoordinator {
    publisher: Arc<Publisher>,
    generator: VoucherGenerator,
    generation_timeout: Duration,
    progress_log_interval: u64,
}

impl GenerationCoordinator {
    pub fn new(
        publisher: Arc<Publisher>,
        generation_timeout: Duration,
        progress_log_interval: u64,
    ) -> Self {
        Self {
            publisher,
            generator: VoucherGenerator::new(),
            generation_timeout,
            progress_log_interval: progress_log_interval.max(1),
        }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Generates and publishes `count` vouchers dated today.
    ///
    /// # Errors
    ///
    /// See [`GenerationCoordinator::generate_dated`].
    pub async fn generate(
        &self,
        count: u64,
        batch_size: usize,
        worker_count: usize,
    ) -> Result<GenerationReport> {
        let today = Local::now().date_naive();
        self.generate_dated(count, batch_size, worker_count, today)
            .await
    }

    /// Generates and publishes `count` vouchers dated `reference_date`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `batch_size` or `worker_count`
    /// is zero, and [`Error::ServiceShutdown`] if the pool refused a
    /// partition. Failures inside a partition are logged and counted, never
    /// returned.
    pub async fn generate_dated(
        &self,
        count: u64,
        batch_size: usize,
        worker_count: usize,
        reference_date: NaiveDate,
    ) -> Result<GenerationReport> {
        if worker_count == 0 {
            return Err(Error::invalid_argument("worker count must be greater than 0"));
        }
        let partitions = Partitions::new(count, batch_size as u64)?;

        tracing::info!(
            count,
            batch_size,
            worker_count,
            batching = self.publisher.batches(batch_size),
            "Starting bulk voucher generation"
        );

        let pool = WorkerPool::spawn("generation", worker_count)?;
        let progress = Arc::new(Progress::default());
        let mut pending = Vec::with_capacity(partitions.size_hint().0);

        for range in partitions {
            let (done_tx, done_rx) = oneshot::channel();
            let publisher = Arc::clone(&self.publisher);
            let progress = Arc::clone(&progress);
            let generator = self.generator;
            let log_every = self.progress_log_interval;

            let submitted = pool.submit(async move {
                let records = generator.generate_range(range.indices(), reference_date);
                publisher.publish_into(&records, &progress.published).await;
                let total = progress.finish(range.len());

                if total / log_every > (total - range.len()) / log_every || total == count {
                    tracing::info!("Published {total}/{count} vouchers");
                }
                let _ = done_tx.send(());
            });
            if let Err(e) = submitted {
                pool.cancel();
                return Err(e);
            }
            pending.push((range, done_rx));
        }

        let waits = pending.into_iter().map(|(range, done_rx)| async move {
            let finished = done_rx.await.is_ok();
            if !finished {
                tracing::error!(
                    start = range.start,
                    end = range.end,
                    "Generation task ended without completing"
                );
            }
            finished
        });
        let joined = timeout(self.generation_timeout, futures::future::join_all(waits)).await;

        let (timed_out, lost_partitions) = match joined {
            Ok(results) => {
                pool.shutdown(POOL_CLOSE_GRACE).await;
                (false, results.iter().filter(|finished| !**finished).count() as u64)
            }
            Err(_) => {
                tracing::warn!(
                    "Generation did not finish within {:?}, cancelling remaining tasks",
                    self.generation_timeout
                );
                pool.shutdown(Duration::ZERO).await;
                (true, 0)
            }
        };

        let published = progress.published.report();
        let report = GenerationReport {
            requested: count,
            confirmed: published.confirmed,
            accepted: published.accepted,
            failed: published.failed,
            lost_partitions,
            timed_out,
        };
        tracing::info!(
            requested = report.requested,
            published = report.published(),
            confirmed = report.confirmed,
            accepted = report.accepted,
            timed_out = report.timed_out,
            "Bulk voucher generation completed"
        );
        Ok(report)
    }
}
