//! Benchmarks for the GETCPM exchange.
//!
//! Separates payload decoding from a full request/response round over an
//! in-memory transport so regressions in either can be told apart.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use geiger_exporter::{Cpm, GETCPM_REQUEST, query};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_test::io::Builder;

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("from_be_bytes", |b| {
        b.iter(|| Cpm::from_be_bytes(black_box([0x01, 0x2C])))
    });
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("query");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_read", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut device = Builder::new().write(GETCPM_REQUEST).read(&[0x01, 0x2C]).build();
                query(&mut device, Duration::from_secs(3)).await.unwrap()
            })
        })
    });

    group.bench_function("split_read", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut device = Builder::new()
                    .write(GETCPM_REQUEST)
                    .read(&[0x01])
                    .read(&[0x2C])
                    .build();
                query(&mut device, Duration::from_secs(3)).await.unwrap()
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_query);
criterion_main!(benches);
