//! Group-commit throughput benchmarks.

use std::sync::{Arc, Barrier};
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cascadedb::prelude::*;

fn single_writer_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_writer");
    for &batch_size in &[1usize, 8, 64] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let db = Database::in_memory().unwrap();
                let mut n = 0u64;
                b.iter(|| {
                    let mut batch = WriteBatch::new();
                    for i in 0..batch_size {
                        batch.put(format!("k{n}-{i}").into_bytes(), "value");
                    }
                    n += 1;
                    db.write(batch).unwrap()
                });
            },
        );
    }
    group.finish();
}

fn concurrent_writers(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_writers");
    for &threads in &[2usize, 4, 8] {
        let writes_per_thread = 200u64;
        group.throughput(Throughput::Elements(threads as u64 * writes_per_thread));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter_custom(|iters| {
                    let mut total = std::time::Duration::ZERO;
                    for round in 0..iters {
                        let db = Arc::new(Database::in_memory().unwrap());
                        let barrier = Arc::new(Barrier::new(threads + 1));
                        let handles: Vec<_> = (0..threads)
                            .map(|t| {
                                let db = Arc::clone(&db);
                                let barrier = Arc::clone(&barrier);
                                std::thread::spawn(move || {
                                    barrier.wait();
                                    for i in 0..writes_per_thread {
                                        let mut batch = WriteBatch::new();
                                        batch.put(
                                            format!("r{round}-t{t}-{i}").into_bytes(),
                                            "value",
                                        );
                                        db.write(batch).unwrap();
                                    }
                                })
                            })
                            .collect();
                        barrier.wait();
                        let start = Instant::now();
                        for h in handles {
                            h.join().unwrap();
                        }
                        total += start.elapsed();
                    }
                    total
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, single_writer_batches, concurrent_writers);
criterion_main!(benches);
