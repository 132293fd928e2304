//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serline_core::core::buffer::ReceiveBuffer;
use std::hint::black_box;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

fn buffer_benchmark(c: &mut Criterion) {
    let chunk: Vec<u8> = (0..64).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("receive_buffer");
    group.throughput(Throughput::Bytes((chunk.len() * 64) as u64));

    group.bench_function("push_drain", |b| {
        let buffer = ReceiveBuffer::new(usize::MAX);
        b.iter(|| {
            for _ in 0..64 {
                buffer.push(black_box(&chunk));
            }
            black_box(buffer.drain())
        })
    });

    group.bench_function("push_if_live", |b| {
        let buffer = ReceiveBuffer::new(usize::MAX);
        let live = AtomicBool::new(true);
        b.iter(|| {
            for _ in 0..64 {
                buffer.push_if_live(&live, black_box(&chunk));
            }
            black_box(buffer.drain())
        })
    });

    group.finish();
}

fn contention_benchmark(c: &mut Criterion) {
    let chunk = [0x55u8; 32];

    let mut group = c.benchmark_group("receive_buffer_contended");
    group.throughput(Throughput::Bytes((chunk.len() * 4 * 256) as u64));

    group.bench_function("four_producers", |b| {
        let buffer = Arc::new(ReceiveBuffer::new(usize::MAX));
        b.iter(|| {
            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let buffer = buffer.clone();
                    thread::spawn(move || {
                        for _ in 0..256 {
                            buffer.push(&chunk);
                        }
                    })
                })
                .collect();
            for producer in producers {
                producer.join().unwrap();
            }
            black_box(buffer.drain())
        })
    });

    group.finish();
}

criterion_group!(benches, buffer_benchmark, contention_benchmark);
criterion_main!(benches);
