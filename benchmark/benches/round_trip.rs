// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Produce-then-consume round trips through the in-process broker.
//!
//! `single` measures one message end to end on a warm connection. `batch`
//! runs the full loopback harness, registry and consumer task included.

use std::sync::Arc;
use std::time::Duration;

use commbench_benchmark::LoopbackHarness;
use commbench_core::backends::{memory, BackendParts, MemoryBroker};
use commbench_core::{
    BackendConfig, BackendKind, Consumer, MemoryTimestampStore, MetricObservation, MetricsSink,
    Producer,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Drops observations so long runs do not grow memory.
struct DiscardSink;

impl MetricsSink for DiscardSink {
    fn observe(&self, _observation: MetricObservation) {}
}

fn bench_single_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let config = BackendConfig::defaults(BackendKind::Memory);
    let BackendParts {
        publisher,
        receivers,
        ..
    } = memory::build(&config, MemoryBroker::new(BackendKind::Memory));
    let store = Arc::new(MemoryTimestampStore::new());
    let sink = Arc::new(DiscardSink);

    let producer = Arc::new(Producer::new(publisher, store.clone(), sink.clone()));
    let consumer = Arc::new(Mutex::new(Consumer::new(receivers(), store, sink)));
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("round_trip");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single", |b| {
        b.to_async(&rt).iter(|| {
            let producer = Arc::clone(&producer);
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            async move {
                producer.produce(b"ping", &cancel).await.unwrap();
                consumer.lock().await.poll_once(&cancel).await.unwrap();
            }
        });
    });
    group.finish();
}

fn bench_loopback_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("loopback_batch");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for &concurrency in &[1usize, 4, 16] {
        let harness = LoopbackHarness::new().messages(1_000).concurrency(concurrency);
        group.throughput(Throughput::Elements(1_000));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &harness,
            |b, harness| {
                b.to_async(&rt).iter(|| async { harness.run().await.unwrap() });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_round_trip, bench_loopback_batch);
criterion_main!(benches);
