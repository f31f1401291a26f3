use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use voucher_engine::{
    DEBIT_VOUCHER_EXCHANGE, DEBIT_VOUCHER_ROUTING_KEY, PipelineConfig, channel::Destination,
};

/// Runtime configuration for the `voucher-engine-server` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a
/// `.env` file in the working directory is loaded first). The defaults match
/// a single-node deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "voucher-engine-server",
    version,
    about = "Generates, publishes and persists a bulk batch of debit vouchers"
)]
pub struct CliArgs {
    /// Number of vouchers to generate.
    ///
    /// Environment variable: `VOUCHER_COUNT`
    #[arg(long, env = "VOUCHER_COUNT", default_value_t = 10_000)]
    pub count: u64,

    /// Records per generation partition, per wire batch and per delivered
    /// group.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Number of generation workers.
    ///
    /// Environment variable: `WORKER_COUNT`
    #[arg(long, env = "WORKER_COUNT", default_value_t = 4)]
    pub worker_count: usize,

    /// How long an incomplete batch waits before it is flushed or delivered.
    ///
    /// Environment variable: `RECEIVE_TIMEOUT_MS`
    #[arg(long, env = "RECEIVE_TIMEOUT_MS", default_value_t = 1_000)]
    pub receive_timeout_ms: u64,

    /// Consumer progress is logged whenever the processed total crosses a
    /// multiple of this value.
    ///
    /// Environment variable: `REPORT_INTERVAL`
    #[arg(long, env = "REPORT_INTERVAL", default_value_t = 1_000)]
    pub report_interval: u64,

    /// Publish large lists through the accumulating batch layer.
    ///
    /// Environment variable: `USE_BATCHING_MODE`
    #[arg(long, env = "USE_BATCHING_MODE", default_value_t = true, action = clap::ArgAction::Set)]
    pub use_batching: bool,

    /// Number of competing listener tasks on the consume side.
    ///
    /// Environment variable: `LISTENER_CONCURRENCY`
    #[arg(long, env = "LISTENER_CONCURRENCY", default_value_t = 4)]
    pub listener_concurrency: usize,

    /// Records per bulk write.
    ///
    /// Environment variable: `PROCESSING_BATCH_SIZE`
    #[arg(long, env = "PROCESSING_BATCH_SIZE", default_value_t = 100)]
    pub processing_batch_size: usize,

    /// Number of persistence workers.
    ///
    /// Environment variable: `CONSUMER_WORKERS`
    #[arg(long, env = "CONSUMER_WORKERS", default_value_t = 4)]
    pub consumer_workers: usize,

    /// Generation gives up on unfinished partitions after this many seconds.
    ///
    /// Environment variable: `GENERATION_TIMEOUT_SECS`
    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value_t = 30 * 60)]
    pub generation_timeout_secs: u64,

    /// Grace period for in-flight persistence on shutdown.
    ///
    /// Environment variable: `TERMINATION_TIMEOUT_SECS`
    #[arg(long, env = "TERMINATION_TIMEOUT_SECS", default_value_t = 30)]
    pub termination_timeout_secs: u64,

    /// How long to wait for the consumer to persist everything published
    /// before shutting down.
    ///
    /// Environment variable: `DRAIN_WAIT_SECS`
    #[arg(long, env = "DRAIN_WAIT_SECS", default_value_t = 60)]
    pub drain_wait_secs: u64,

    /// Exchange vouchers are published to.
    ///
    /// Environment variable: `VOUCHER_EXCHANGE`
    #[arg(long, env = "VOUCHER_EXCHANGE", default_value_t = String::from(DEBIT_VOUCHER_EXCHANGE))]
    pub exchange: String,

    /// Routing key vouchers are published with.
    ///
    /// Environment variable: `VOUCHER_ROUTING_KEY`
    #[arg(long, env = "VOUCHER_ROUTING_KEY", default_value_t = String::from(DEBIT_VOUCHER_ROUTING_KEY))]
    pub routing_key: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub count: u64,
    pub drain_wait: Duration,
    pub pipeline: PipelineConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }
        if args.worker_count == 0 {
            bail!("WORKER_COUNT must be greater than 0");
        }
        if args.receive_timeout_ms == 0 {
            bail!("RECEIVE_TIMEOUT_MS must be greater than 0");
        }
        if args.exchange.is_empty() {
            bail!("VOUCHER_EXCHANGE must not be empty");
        }

        let pipeline = PipelineConfig {
            batch_size: args.batch_size,
            receive_timeout: Duration::from_millis(args.receive_timeout_ms),
            use_batching: args.use_batching,
            worker_count: args.worker_count,
            generation_timeout: Duration::from_secs(args.generation_timeout_secs),
            processing_batch_size: args.processing_batch_size,
            consumer_workers: args.consumer_workers,
            listener_concurrency: args.listener_concurrency,
            report_interval: args.report_interval,
            termination_timeout: Duration::from_secs(args.termination_timeout_secs),
            destination: Destination::new(args.exchange, args.routing_key),
            ..PipelineConfig::default()
        };
        if let Err(e) = pipeline.validate() {
            bail!("{e}");
        }

        Ok(Self {
            count: args.count,
            drain_wait: Duration::from_secs(args.drain_wait_secs),
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(
            core::iter::once("voucher-engine-server").chain(args.iter().copied()),
        )?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--count",
            "250",
            "--batch-size",
            "100",
            "--use-batching",
            "false",
            "--receive-timeout-ms",
            "250",
        ])
        .unwrap();

        assert_eq!(config.count, 250);
        assert_eq!(config.pipeline.batch_size, 100);
        assert!(!config.pipeline.use_batching);
        assert_eq!(config.pipeline.receive_timeout, Duration::from_millis(250));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = parse(&["--batch-size", "0"]).unwrap_err();
        assert!(err.to_string().contains("BATCH_SIZE"));
    }

    #[test]
    fn zero_consumer_workers_fail_pipeline_validation() {
        let err = parse(&["--consumer-workers", "0"]).unwrap_err();
        assert!(err.to_string().contains("consumer_workers"));
    }
}
