#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use core::time::Duration;
use server::config::{CliArgs, ServerConfig};
use server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::{signal, time::Instant};
use voucher_engine::{
    GenerationReport, VoucherEngine, channel::InMemoryChannel, store::InMemoryVoucherStore,
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Polling period while waiting for the consumer to catch up.
const CATCH_UP_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let store = Arc::new(InMemoryVoucherStore::new());
    let engine = VoucherEngine::new(
        config.pipeline.clone(),
        Arc::new(InMemoryChannel::new()),
        store.clone(),
    )?;
    engine.init_consumer()?;
    engine.subscribe()?;

    tokio::select! {
        result = run_job(&engine, &config) => {
            if let Err(e) = result {
                tracing::error!("Generation job failed: {e}");
            }
        }
        () = shutdown_signal() => {
            tracing::info!("Shutdown signal received, terminating gracefully...");
        }
    }

    if let Err(e) = engine.close().await {
        tracing::error!("Error during engine shutdown: {e}");
    }

    let stats = engine.stats();
    tracing::info!(stored = store.len(), "Final statistics: {stats}");
    for (voucher_number, reason) in engine.stats_tracker().failed_sample(5) {
        tracing::warn!(%voucher_number, %reason, "Failed voucher");
    }

    providers.shutdown();
    tracing::info!("Service shut down successfully");
    Ok(())
}

/// Generates the configured count, then waits for the consumer to account
/// for every published voucher.
async fn run_job(engine: &VoucherEngine, config: &ServerConfig) -> voucher_engine::Result<()> {
    let started = Instant::now();
    let report = engine.generate_default(config.count).await?;
    log_report(&report, started.elapsed());

    engine.flush().await?;

    let deadline = Instant::now() + config.drain_wait;
    loop {
        let stats = engine.stats();
        let settled = stats.succeeded + stats.failed;
        if settled >= report.published() {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Consumer caught up with all published vouchers"
            );
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                settled,
                published = report.published(),
                "Consumer did not catch up within {:?}",
                config.drain_wait
            );
            break;
        }
        tokio::time::sleep(CATCH_UP_POLL).await;
    }
    Ok(())
}

fn log_report(report: &GenerationReport, elapsed: Duration) {
    tracing::info!(
        requested = report.requested,
        published = report.published(),
        confirmed = report.confirmed,
        accepted = report.accepted,
        failed = report.failed,
        timed_out = report.timed_out,
        elapsed_ms = elapsed.as_millis() as u64,
        success_rate = %format!("{:.2}%", report.success_rate()),
        "Generation finished"
    );
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting voucher engine for {} vouchers with full config: {:#?}",
            config.count,
            config
        );
    } else {
        tracing::info!(
            "Starting voucher engine for {} vouchers with {} workers",
            config.count,
            config.pipeline.worker_count
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
