//! Consume side of the pipeline.
//!
//! The [`BatchConsumer`] receives groups of records delivered by the channel,
//! counts them as processed, splits them into sub-batches of the processing
//! batch size, and hands each sub-batch to the [`BulkPersister`] on its own
//! worker pool. The pool is created on [`BatchConsumer::init`] or lazily by
//! the first batch, and torn down by [`BatchConsumer::shutdown`].

use crate::{
    Error, PipelineConfig, ProcessingStats, Result, VoucherRecord,
    channel::BatchHandler,
    codec,
    lifecycle::{Lifecycle, Phase},
    metrics,
    partition::chunk_slice,
    persister::BulkPersister,
    pool::DrainOutcome,
    store::VoucherStore,
};
use bytes::Bytes;
use core::time::Duration;
use futures::FutureExt;
use std::sync::Arc;

/// Receives channel batches and persists them concurrently.
pub struct BatchConsumer {
    persister: Arc<BulkPersister>,
    stats: Arc<ProcessingStats>,
    lifecycle: Lifecycle,
    processing_batch_size: usize,
    report_interval: u64,
    termination_timeout: Duration,
}

impl BatchConsumer {
    pub fn new(
        store: Arc<dyn VoucherStore>,
        stats: Arc<ProcessingStats>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            persister: Arc::new(BulkPersister::new(store, Arc::clone(&stats))),
            stats,
            lifecycle: Lifecycle::new(config.consumer_workers),
            processing_batch_size: config.processing_batch_size.max(1),
            report_interval: config.report_interval.max(1),
            termination_timeout: config.termination_timeout,
        }
    }

    pub fn stats(&self) -> &Arc<ProcessingStats> {
        &self.stats
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Starts the worker pool if it is not already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsumerDraining`] while a shutdown is in progress.
    pub fn init(&self) -> Result<()> {
        self.lifecycle.ensure_running().map(|_| ())
    }

    /// Drains in-flight persistence for up to the termination timeout, then
    /// cancels what is left and returns to idle.
    ///
    /// Returns `None` if the consumer was not running.
    pub async fn shutdown(&self) -> Option<DrainOutcome> {
        let pool = self.lifecycle.begin_drain()?;
        tracing::info!("Shutting down bulk voucher consumer");

        let outcome = pool.shutdown(self.termination_timeout).await;
        self.lifecycle.finish_drain();

        tracing::info!(
            drained = outcome.drained,
            abandoned = outcome.abandoned,
            "Bulk voucher consumer shut down. {}",
            self.stats.snapshot()
        );
        Some(outcome)
    }

    /// Accepts one delivered group of records.
    ///
    /// Returns the number of sub-batches handed to the persister.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsumerDraining`] if the consumer is shutting down;
    /// nothing is counted in that case. If the pool stops accepting partway
    /// through, the records it refused are counted as failed and the error
    /// is returned.
    pub fn receive_batch(&self, records: Vec<VoucherRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let pool = self.lifecycle.ensure_running()?;

        let received = records.len() as u64;
        metrics::increment_batches_received();
        let total = self.stats.record_received(received);
        tracing::debug!(received, total, "Received voucher batch");
        if total / self.report_interval > (total - received) / self.report_interval {
            self.stats.report_progress();
        }

        self.dispatch(&records, |batch| {
            let persister = Arc::clone(&self.persister);
            pool.submit(async move {
                persister.persist(&batch).await;
            })
        })
    }

    /// Hands `records` to `submit` one sub-batch at a time.
    ///
    /// On the first refusal every record not yet handed over is counted as
    /// failed, and the refusal is returned.
    fn dispatch<S>(&self, records: &[VoucherRecord], mut submit: S) -> Result<usize>
    where
        S: FnMut(Vec<VoucherRecord>) -> Result<()>,
    {
        let mut submitted = 0;
        for chunk in chunk_slice(records, self.processing_batch_size) {
            if let Err(e) = submit(chunk.to_vec()) {
                let refused = &records[submitted * self.processing_batch_size..];
                for record in refused {
                    self.stats
                        .record_failure(record.voucher_number.clone(), e.to_string());
                }
                tracing::error!(
                    refused = refused.len(),
                    "Consumer pool refused sub-batch: {e}"
                );
                return Err(e);
            }
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Decodes a delivered group of messages and passes it to
    /// [`BatchConsumer::receive_batch`].
    ///
    /// Messages that do not decode are logged and counted as discarded.
    ///
    /// # Errors
    ///
    /// See [`BatchConsumer::receive_batch`].
    pub fn receive_messages(&self, messages: Vec<Bytes>) -> Result<usize> {
        let records = messages
            .iter()
            .filter_map(|message| match codec::decode(message) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(bytes = message.len(), "Discarding undecodable message: {e}");
                    self.stats.record_discarded();
                    None
                }
            })
            .collect();
        self.receive_batch(records)
    }

    /// A channel handler feeding this consumer.
    pub fn handler(self: &Arc<Self>) -> BatchHandler {
        let consumer = Arc::clone(self);
        Arc::new(move |messages: Vec<Bytes>| {
            let consumer = Arc::clone(&consumer);
            async move {
                let count = messages.len();
                match consumer.receive_messages(messages) {
                    Ok(_) => {}
                    Err(Error::ConsumerDraining) => {
                        tracing::warn!(count, "Consumer draining, rejected delivered batch");
                    }
                    Err(e) => tracing::error!(count, "Failed to process delivered batch: {e}"),
                }
            }
            .boxed()
        })
    }
}
