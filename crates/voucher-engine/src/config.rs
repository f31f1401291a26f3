use crate::{Error, Result, channel::Destination};
use core::time::Duration;

/// Exchange debit vouchers are published to.
pub const DEBIT_VOUCHER_EXCHANGE: &str = "debit.voucher.exchange";

/// Routing key debit vouchers are published with.
pub const DEBIT_VOUCHER_ROUTING_KEY: &str = "debit.voucher.routingkey";

/// Runtime configuration for the voucher pipeline.
///
/// The defaults mirror a single-node deployment: four generation workers,
/// four listener tasks and hundred-record batches on both sides of the
/// channel.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Publish-side: maximum records per wire batch, and consume-side:
    /// maximum records the channel delivers to a listener at once.
    pub batch_size: usize,
    /// How long an incomplete batch may wait before it is flushed (publish
    /// side) or delivered (consume side).
    pub receive_timeout: Duration,
    /// Maximum encoded bytes per publish-side wire batch.
    pub max_batch_bytes: usize,
    /// Lists at or below this size are always published one record at a time.
    pub individual_publish_threshold: usize,
    /// Publish large lists through the accumulating batch layer.
    pub use_batching: bool,
    /// Default generation concurrency.
    pub worker_count: usize,
    /// How long a generation job may run before remaining tasks are cancelled.
    pub generation_timeout: Duration,
    /// Producer progress is logged every this many records.
    pub progress_log_interval: u64,
    /// Records per bulk write on the consume side.
    pub processing_batch_size: usize,
    /// Size of the consumer's worker pool.
    pub consumer_workers: usize,
    /// Number of competing listener tasks bound to the queue.
    pub listener_concurrency: usize,
    /// Consumer progress is reported whenever the processed total crosses a
    /// multiple of this value.
    pub report_interval: u64,
    /// Grace period for in-flight persistence when the consumer shuts down.
    pub termination_timeout: Duration,
    /// Maximum failed-item causes retained by the statistics.
    pub max_failed_items: usize,
    pub destination: Destination,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            receive_timeout: Duration::from_millis(1_000),
            max_batch_bytes: 1024 * 1024,
            individual_publish_threshold: 10,
            use_batching: true,
            worker_count: 4,
            generation_timeout: Duration::from_secs(30 * 60),
            progress_log_interval: 10_000,
            processing_batch_size: 100,
            consumer_workers: 4,
            listener_concurrency: 4,
            report_interval: 1_000,
            termination_timeout: Duration::from_secs(30),
            max_failed_items: 10_000,
            destination: Destination::new(DEBIT_VOUCHER_EXCHANGE, DEBIT_VOUCHER_ROUTING_KEY),
        }
    }
}

impl PipelineConfig {
    /// Checks every size and count is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size as u64),
            ("max_batch_bytes", self.max_batch_bytes as u64),
            ("worker_count", self.worker_count as u64),
            ("processing_batch_size", self.processing_batch_size as u64),
            ("consumer_workers", self.consumer_workers as u64),
            ("listener_concurrency", self.listener_concurrency as u64),
            ("report_interval", self.report_interval),
            ("progress_log_interval", self.progress_log_interval),
            ("max_failed_items", self.max_failed_items as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::configuration(format!("{name} must be greater than 0")));
        }
        if self.receive_timeout.is_zero() {
            return Err(Error::configuration("receive_timeout must be non-zero"));
        }
        if self.destination.exchange.is_empty() {
            return Err(Error::configuration("destination exchange must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_worker_count_is_rejected() {
        let config = PipelineConfig {
            worker_count: 0,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { ref reason } if reason.contains("worker_count")));
    }

    #[test]
    fn zero_receive_timeout_is_rejected() {
        let config = PipelineConfig {
            receive_timeout: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
