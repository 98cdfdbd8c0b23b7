//! Benchmarks for the bounded SPSC stage channel.
//!
//! Measures same-thread try-op throughput across capacities and the
//! cross-thread blocking handoff path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use pipekit::channel::bounded;

const OPS_PER_ITER: u64 = 10_000;

fn bench_same_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_same_thread");
    group.throughput(Throughput::Elements(OPS_PER_ITER));
    for cap in [8usize, 64, 1024] {
        group.bench_with_input(BenchmarkId::new("try_send_try_recv", cap), &cap, |b, &cap| {
            b.iter(|| {
                let (mut tx, mut rx) = bounded::<u64>(cap);
                let mut next = 0u64;
                let mut received = 0u64;
                while received < OPS_PER_ITER {
                    while next < OPS_PER_ITER && tx.try_send(next).is_ok() {
                        next += 1;
                    }
                    while let Some(v) = rx.try_recv() {
                        received += 1;
                        black_box(v);
                    }
                }
            });
        });
    }
    group.finish();
}

fn bench_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_cross_thread");
    group.throughput(Throughput::Elements(OPS_PER_ITER));
    group.bench_function("blocking_send_recv", |b| {
        b.iter(|| {
            let (mut tx, mut rx) = bounded::<u64>(64);
            let producer = std::thread::spawn(move || {
                for i in 0..OPS_PER_ITER {
                    if tx.send(i).is_err() {
                        break;
                    }
                }
            });
            let mut sum = 0u64;
            while let Some(v) = rx.recv() {
                sum = sum.wrapping_add(v);
            }
            producer.join().unwrap();
            black_box(sum)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_same_thread, bench_cross_thread);
criterion_main!(benches);
