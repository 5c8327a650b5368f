//! Transport benchmarks.
//!
//! Measures segment framing throughput and end-to-end control-block
//! performance over a lossless in-memory link.

use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use rapide::{ControlBlock, Segment};

type Captured = Arc<Mutex<Vec<Vec<u8>>>>;

fn capture_output(cb: &mut ControlBlock) -> Captured {
    let sent: Captured = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&sent);
    cb.set_output(move |datagram| {
        captured.lock().unwrap().push(datagram.to_vec());
    });
    sent
}

fn bench_segment_encode(c: &mut Criterion) {
    let mut seg = Segment::payload(BytesMut::from(&vec![0u8; 1376][..]));
    seg.conv = 1;
    seg.sn = 42;
    seg.ts = 1000;

    let mut group = c.benchmark_group("segment_encode");
    group.throughput(Throughput::Bytes(seg.wire_size() as u64));

    group.bench_function("1376_bytes", |b| {
        let mut buf = BytesMut::with_capacity(2048);
        b.iter(|| {
            buf.clear();
            seg.encode_into(&mut buf);
            black_box(buf.len())
        })
    });

    group.finish();
}

fn bench_input_data(c: &mut Criterion) {
    // One full-size data segment, pre-encoded, ingested by a fresh
    // receiver each iteration.
    let mut a = ControlBlock::new(7);
    let a_out = capture_output(&mut a);
    a.send(&vec![0u8; 1376]).unwrap();
    a.update(0);
    a.update(100);
    let datagram = a_out.lock().unwrap().concat();

    let mut group = c.benchmark_group("input_data");
    group.throughput(Throughput::Bytes(datagram.len() as u64));

    group.bench_function("1376_bytes", |b| {
        b.iter_batched(
            || ControlBlock::new(7),
            |mut receiver| {
                receiver.input(black_box(&datagram)).unwrap();
                black_box(receiver.peek_size().unwrap())
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    const MESSAGE: usize = 1200;

    let mut group = c.benchmark_group("round_trip");
    group.throughput(Throughput::Bytes(MESSAGE as u64));

    group.bench_function("lossless_link", |b| {
        let mut a = ControlBlock::new(9);
        let mut b_cb = ControlBlock::new(9);
        a.set_nodelay(Some(1), Some(10), Some(3), Some(true));
        b_cb.set_nodelay(Some(1), Some(10), Some(3), Some(true));
        let a_out = capture_output(&mut a);
        let b_out = capture_output(&mut b_cb);

        let payload = vec![0u8; MESSAGE];
        let mut recv_buf = [0u8; 4096];
        let mut t = 0u32;

        a.update(t);
        b_cb.update(t);

        b.iter(|| {
            t += 10;
            a.send(&payload).unwrap();
            a.update(t);
            for datagram in a_out.lock().unwrap().drain(..) {
                b_cb.input(&datagram).unwrap();
            }
            b_cb.update(t);
            for datagram in b_out.lock().unwrap().drain(..) {
                a.input(&datagram).unwrap();
            }
            black_box(b_cb.recv(&mut recv_buf).unwrap())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_segment_encode,
    bench_input_data,
    bench_round_trip
);
criterion_main!(benches);
