use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use webgate::websocket::apply_mask;
use webgate::{OpCode, WebSocketFrame};

const PAYLOAD_SIZES: [usize; 4] = [16, 125, 4096, 70_000];

fn frame_encode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in PAYLOAD_SIZES.iter() {
        let payload = Bytes::from(vec![b'x'; *size]);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("unmasked", size), &payload, |b, payload| {
            b.iter(|| WebSocketFrame::new(OpCode::Binary, payload.clone(), false).to_bytes());
        });
        group.bench_with_input(BenchmarkId::new("masked", size), &payload, |b, payload| {
            b.iter(|| WebSocketFrame::new(OpCode::Binary, payload.clone(), true).to_bytes());
        });
    }

    group.finish();
}

fn frame_parse_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");

    for size in PAYLOAD_SIZES.iter() {
        let wire = WebSocketFrame::new(OpCode::Text, vec![b'a'; *size], true).to_bytes();
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| WebSocketFrame::parse(black_box(wire)).unwrap());
        });
    }

    group.finish();
}

fn frame_parse_partial_benchmark(c: &mut Criterion) {
    let wire = WebSocketFrame::new(OpCode::Binary, vec![0u8; 4096], true).to_bytes();
    let partial = wire.slice(..wire.len() / 2);

    c.bench_function("frame_parse_partial", |b| {
        b.iter(|| WebSocketFrame::parse(black_box(&partial)).unwrap());
    });
}

fn apply_mask_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_mask");

    for size in PAYLOAD_SIZES.iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut payload = vec![0x5au8; size];
            b.iter(|| apply_mask(black_box(&mut payload), [0x37, 0xfa, 0x21, 0x3d]));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    frame_encode_benchmark,
    frame_parse_benchmark,
    frame_parse_partial_benchmark,
    apply_mask_benchmark
);
criterion_main!(benches);
