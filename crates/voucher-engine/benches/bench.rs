use chrono::NaiveDate;
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::{sync::Arc, time::Instant};
use tokio::runtime::Builder;
use voucher_engine::{
    BulkPersister, GenerationCoordinator, ProcessingStats, Publisher, VoucherGenerator,
    channel::{Destination, InMemoryChannel},
    codec,
    store::InMemoryVoucherStore,
};

// Number of vouchers handled per benchmark iteration.
const TOTAL_VOUCHERS: u64 = 4096;

fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn destination() -> Destination {
    Destination::new("bench.exchange", "bench.key")
}

/// Synthesizes and encodes vouchers on one thread.
fn bench_generate_and_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    group.throughput(Throughput::Elements(TOTAL_VOUCHERS));

    group.bench_function(format!("elems/{TOTAL_VOUCHERS}"), |b| {
        let generator = VoucherGenerator::new();
        b.iter(|| {
            for record in generator.generate_range(0..TOTAL_VOUCHERS, reference_date()) {
                black_box(codec::encode(&record).unwrap());
            }
        });
    });

    group.finish();
}

/// Partitioned generation and individual publishing over the in-process
/// channel, for a range of worker counts.
fn bench_coordinated_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(TOTAL_VOUCHERS));

    for workers in [1, 2, 4, 8] {
        group.bench_function(format!("workers/{workers}"), |b| {
            let rt = Builder::new_multi_thread()
                .enable_all()
                .worker_threads(workers)
                .build()
                .unwrap();

            b.to_async(&rt).iter_custom(|iters| async move {
                let start = Instant::now();
                for _ in 0..iters {
                    let channel = Arc::new(InMemoryChannel::new());
                    let publisher = Publisher::new(channel, destination());
                    let coordinator = GenerationCoordinator::new(
                        Arc::new(publisher),
                        core::time::Duration::from_secs(60),
                        u64::MAX,
                    );
                    let report = coordinator
                        .generate_dated(TOTAL_VOUCHERS, 256, workers, reference_date())
                        .await
                        .unwrap();
                    black_box(report);
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Bulk writes, clean and with one duplicate per batch forcing the
/// per-record fallback.
fn bench_persist(c: &mut Criterion) {
    let mut group = c.benchmark_group("persist");
    group.throughput(Throughput::Elements(TOTAL_VOUCHERS));
    let records = VoucherGenerator::new().generate_range(0..TOTAL_VOUCHERS, reference_date());

    for poisoned in [false, true] {
        let name = if poisoned { "fallback" } else { "bulk" };
        let records = records.clone();
        group.bench_function(name, |b| {
            let rt = Builder::new_multi_thread()
                .enable_all()
                .worker_threads(1)
                .build()
                .unwrap();

            b.to_async(&rt).iter_custom(|iters| {
                let records = records.clone();
                async move {
                    let start = Instant::now();
                    for _ in 0..iters {
                        let store = Arc::new(InMemoryVoucherStore::new());
                        if poisoned {
                            for batch in records.chunks(100) {
                                store.reject(batch[0].voucher_number.clone(), "poisoned");
                            }
                        }
                        let persister =
                            BulkPersister::new(store, Arc::new(ProcessingStats::default()));
                        for batch in records.chunks(100) {
                            black_box(persister.persist(batch).await);
                        }
                    }
                    start.elapsed()
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_generate_and_encode,
    bench_coordinated_publish,
    bench_persist,
);
criterion_main!(benches);
