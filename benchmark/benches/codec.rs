// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Envelope codec microbenchmarks at various payload sizes.

use commbench_core::{DelimitedCodec, MessageCodec, MessageId};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Payload sizes to benchmark (in bytes).
const PAYLOAD_SIZES: &[usize] = &[0, 64, 1024, 16384, 262144];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");
    let id = MessageId::generate();

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let payload = vec![0xABu8; size];
            b.iter(|| DelimitedCodec.encode(black_box(&id), black_box(&payload)));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode");
    let id = MessageId::generate();

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            // Delimiters in the payload must not slow down the id split.
            let envelope = DelimitedCodec.encode(&id, &vec![b':'; size]);
            b.iter(|| DelimitedCodec.decode(black_box(&envelope)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
