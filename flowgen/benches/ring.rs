use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use flowgen::ring::ring;

const BATCH: u64 = 1024;

/// Same-thread round trip through a ring, direct path.
fn bench_try_send_recv(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(BATCH));

    group.bench_function("try_send_recv", |b| {
        let (mut tx, mut rx) = ring::<u64>(2048).unwrap();
        b.iter(|| {
            for i in 0..BATCH {
                tx.try_send(i).unwrap();
            }
            let mut sum = 0;
            while let Some(v) = rx.try_recv() {
                sum += v;
            }
            sum
        });
    });

    group.bench_function("secured_send_recv", |b| {
        let (mut tx, mut rx) = ring::<u64>(2048).unwrap();
        b.iter(|| {
            for i in 0..BATCH {
                tx.send(i);
            }
            let mut sum = 0;
            while let Some(v) = rx.try_recv() {
                sum += v;
            }
            sum
        });
    });

    group.finish();
}

criterion_group!(benches, bench_try_send_recv);
criterion_main!(benches);
