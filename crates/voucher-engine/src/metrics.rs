//! OpenTelemetry metric handles for the pipeline.
//!
//! Handles are registered once via [`init_metric_handles`] by whoever owns the
//! meter provider (the server binary). The recording functions compile to
//! no-ops when the `metrics` feature is disabled, so call sites never need
//! their own `cfg` guards.

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static VOUCHERS_CONFIRMED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static VOUCHERS_ACCEPTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static VOUCHERS_PERSISTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static VOUCHERS_FAILED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BATCHES_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BULK_FALLBACKS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PERSIST_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
pub fn init_metric_handles(meter: &Meter) {
    let _ = VOUCHERS_CONFIRMED.set(
        meter
            .u64_counter("vouchers_published")
            .with_description("Vouchers confirmed delivered to the channel")
            .build(),
    );

    let _ = VOUCHERS_ACCEPTED.set(
        meter
            .u64_counter("vouchers_accepted")
            .with_description("Vouchers accepted by the batching layer")
            .build(),
    );

    let _ = VOUCHERS_PERSISTED.set(
        meter
            .u64_counter("vouchers_persisted")
            .with_description("Vouchers written to the store")
            .build(),
    );

    let _ = VOUCHERS_FAILED.set(
        meter
            .u64_counter("vouchers_failed")
            .with_description("Vouchers that failed even individually")
            .build(),
    );

    let _ = BATCHES_RECEIVED.set(
        meter
            .u64_counter("batches_received")
            .with_description("Batches delivered to the consumer")
            .build(),
    );

    let _ = BULK_FALLBACKS.set(
        meter
            .u64_counter("bulk_fallbacks")
            .with_description("Bulk writes replayed record by record")
            .build(),
    );

    let _ = PERSIST_DURATION_MS.set(
        meter
            .f64_histogram("persist_duration")
            .with_unit("ms")
            .with_description("Duration of one sub-batch persistence")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn add(counter: &OnceLock<Counter<u64>>, count: u64) {
    if let Some(counter) = counter.get() {
        counter.add(count, &[]);
    }
}

#[cfg(feature = "metrics")]
pub fn increment_confirmed(count: u64) {
    add(&VOUCHERS_CONFIRMED, count);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_confirmed(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_accepted(count: u64) {
    add(&VOUCHERS_ACCEPTED, count);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_accepted(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_persisted(count: u64) {
    add(&VOUCHERS_PERSISTED, count);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_persisted(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_failed(count: u64) {
    add(&VOUCHERS_FAILED, count);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_failed(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_batches_received() {
    add(&BATCHES_RECEIVED, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_batches_received() {}

#[cfg(feature = "metrics")]
pub fn increment_bulk_fallbacks() {
    add(&BULK_FALLBACKS, 1);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_bulk_fallbacks() {}

#[cfg(feature = "metrics")]
pub fn record_persist_duration(duration_ms: f64) {
    if let Some(histogram) = PERSIST_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_persist_duration(_duration_ms: f64) {}
