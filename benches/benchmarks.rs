//! Benchmarks for deltastream operations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

use deltastream::{
    frame, FileSink, FileSource, RollingChecksum, Session, SessionBuilder, Signature,
    SignatureParams, SocketSink, SocketSource, StrongHash,
};

fn sample(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 251) as u8).collect()
}

fn bench_rolling_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("rolling_checksum");

    for size in [64, 512, 2048, 8192] {
        let data = vec![42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("new", size), &data, |b, data| {
            b.iter(|| RollingChecksum::new(black_box(data)));
        });
    }

    let mut checksum = RollingChecksum::new(&[42u8; 2048]);
    group.bench_function("roll", |b| {
        b.iter(|| checksum.roll(black_box(42), black_box(43)));
    });

    group.finish();
}

fn bench_strong_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("strong_hash");

    for size in [64, 2048, 65536] {
        let data = vec![42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("compute", size), &data, |b, data| {
            b.iter(|| StrongHash::compute(black_box(data)));
        });
    }

    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    let payload = vec![7u8; frame::MAX_FRAME_LEN];

    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode_max", |b| {
        b.iter(|| frame::encode(black_box(&payload), false));
    });

    let wire = frame::encode(&payload, true).unwrap_or_default();
    group.bench_function("decode_max", |b| {
        b.iter(|| frame::decode(black_box(&wire)).map(|(h, p)| (h.eof, p.len())));
    });

    group.finish();
}

fn bench_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");

    for capacity in [4096, frame::MAX_FRAME_LEN] {
        let session = SessionBuilder::new().capacity(capacity).build().unwrap();
        let data = sample(1024 * 1024);

        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("framed", capacity), &data, |b, data| {
            b.iter(|| {
                let mut sink = SocketSink::new(Vec::with_capacity(64 * 1024));
                session
                    .generate_signature(
                        data.len() as u64,
                        &mut FileSource::new(data.as_slice()),
                        &mut sink,
                    )
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta");
    let session = Session::new();
    let basis = sample(1024 * 1024);
    let params = SignatureParams::recommended(basis.len() as u64);
    let table = Signature::generate(&basis, params).into_table();

    let mut modified = basis.clone();
    for i in (0..modified.len()).step_by(100_000) {
        modified[i] ^= 0xff;
    }

    for (name, data) in [("identical", &basis), ("modified", &modified)] {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("generate", name), data, |b, data| {
            b.iter(|| {
                let mut sink = FileSink::new(Vec::with_capacity(data.len()));
                session
                    .generate_delta(&table, &mut FileSource::new(data.as_slice()), &mut sink)
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch");
    let session = Session::new();
    let basis = sample(1024 * 1024);
    let table = Signature::generate(&basis, SignatureParams::recommended(basis.len() as u64))
        .into_table();

    let mut wire = Vec::new();
    session
        .generate_delta(
            &table,
            &mut FileSource::new(basis.as_slice()),
            &mut SocketSink::new(&mut wire),
        )
        .unwrap();

    group.throughput(Throughput::Bytes(basis.len() as u64));
    group.bench_function("apply_framed", |b| {
        b.iter(|| {
            let mut out = FileSink::new(Vec::with_capacity(basis.len()));
            session
                .apply_patch(
                    Cursor::new(basis.as_slice()),
                    &mut SocketSource::new(wire.as_slice()),
                    &mut out,
                )
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_rolling_checksum,
    bench_strong_hash,
    bench_frame,
    bench_signature,
    bench_delta,
    bench_patch,
);

criterion_main!(benches);
