//! The pipeline façade.
//!
//! [`VoucherEngine`] wires one channel and one store into the full pipeline
//! and exposes the control surface: generate, stats, reset, and explicit
//! consumer init/shutdown. Listener binding is a separate, explicit
//! [`VoucherEngine::subscribe`] call.

use crate::{
    PipelineConfig, ProcessingStats, Result, StatsSnapshot,
    channel::{BatchingStrategy, BatchingTemplate, Channel, ListenerConfig, Subscription},
    consumer::BatchConsumer,
    coordinator::{GenerationCoordinator, GenerationReport},
    lifecycle::Phase,
    pool::DrainOutcome,
    publisher::Publisher,
    store::VoucherStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct VoucherEngine {
    config: PipelineConfig,
    channel: Arc<dyn Channel>,
    stats: Arc<ProcessingStats>,
    batching: Arc<BatchingTemplate>,
    coordinator: GenerationCoordinator,
    consumer: Arc<BatchConsumer>,
    subscription: Mutex<Option<Subscription>>,
}

impl VoucherEngine {
    /// Builds the pipeline over `channel` and `store`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) if
    /// `config` fails validation.
    pub fn new(
        config: PipelineConfig,
        channel: Arc<dyn Channel>,
        store: Arc<dyn VoucherStore>,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(ProcessingStats::new(config.max_failed_items));
        let batching = Arc::new(BatchingTemplate::new(
            Arc::clone(&channel),
            BatchingStrategy {
                max_count: config.batch_size,
                max_bytes: config.max_batch_bytes,
                max_wait: config.receive_timeout,
            },
        ));
        let publisher = Publisher::new(Arc::clone(&channel), config.destination.clone())
            .with_batching(Arc::clone(&batching), config.use_batching)
            .with_individual_threshold(config.individual_publish_threshold);
        let coordinator = GenerationCoordinator::new(
            Arc::new(publisher),
            config.generation_timeout,
            config.progress_log_interval,
        );
        let consumer = Arc::new(BatchConsumer::new(store, Arc::clone(&stats), &config));

        Ok(Self {
            config,
            channel,
            stats,
            batching,
            coordinator,
            consumer,
            subscription: Mutex::new(None),
        })
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Generates and publishes `count` vouchers.
    ///
    /// # Errors
    ///
    /// Only invalid arguments and pool failures are returned; see
    /// [`GenerationCoordinator::generate_dated`].
    pub async fn generate(
        &self,
        count: u64,
        batch_size: usize,
        worker_count: usize,
    ) -> Result<GenerationReport> {
        self.coordinator
            .generate(count, batch_size, worker_count)
            .await
    }

    /// Generates `count` vouchers with the configured batch size and worker
    /// count.
    pub async fn generate_default(&self, count: u64) -> Result<GenerationReport> {
        self.generate(count, self.config.batch_size, self.config.worker_count)
            .await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The live statistics, including failed-item causes.
    pub fn stats_tracker(&self) -> &Arc<ProcessingStats> {
        &self.stats
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
        tracing::info!("Processing statistics reset");
    }

    pub fn consumer(&self) -> &Arc<BatchConsumer> {
        &self.consumer
    }

    pub fn consumer_phase(&self) -> Phase {
        self.consumer.phase()
    }

    /// # Errors
    ///
    /// Returns [`Error::ConsumerDraining`](crate::Error::ConsumerDraining)
    /// while a shutdown is in progress.
    pub fn init_consumer(&self) -> Result<()> {
        self.consumer.init()
    }

    pub async fn shutdown_consumer(&self) -> Option<DrainOutcome> {
        self.consumer.shutdown().await
    }

    /// Binds the consumer to the configured destination.
    ///
    /// Subscribing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the channel's subscription error.
    pub fn subscribe(&self) -> Result<()> {
        let mut subscription = self.subscription.lock();
        if subscription.as_ref().is_some_and(Subscription::is_active) {
            return Ok(());
        }

        let listener = ListenerConfig {
            batch_size: self.config.batch_size,
            receive_timeout: self.config.receive_timeout,
            concurrency: self.config.listener_concurrency,
        };
        *subscription = Some(self.channel.subscribe(
            &self.config.destination,
            listener,
            self.consumer.handler(),
        )?);
        tracing::info!(
            destination = %self.config.destination,
            concurrency = listener.concurrency,
            "Consumer subscribed"
        );
        Ok(())
    }

    /// Stops the listeners after their current delivery.
    pub async fn unsubscribe(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.close().await;
        }
    }

    /// Sends every batch still open in the publish-side batching layer.
    ///
    /// # Errors
    ///
    /// Returns the channel error of the first batch that failed to send.
    pub async fn flush(&self) -> Result<()> {
        self.batching.flush().await
    }

    /// Flushes pending publishes, stops the listeners and drains the
    /// consumer.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush; the consumer is shut down
    /// regardless.
    pub async fn close(&self) -> Result<()> {
        let flushed = self.batching.close().await;
        self.unsubscribe().await;
        self.consumer.shutdown().await;
        flushed
    }
}
