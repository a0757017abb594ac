//! Criterion benchmarks for ring buffer hot paths.
//!
//! Key metrics:
//! - Publish throughput (write + notify every subscriber) for growing fan-out
//! - Poll latency for a batch of pending messages
//! - Concurrent publish/poll with one consumer thread
//!
//! Run with: cargo bench --bench ring_buffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensor_gateway::data::source::channel;
use std::thread;

/// Frame-sized payload, comparable to a decoded CAN message.
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct Sample {
    id: u32,
    data: [u8; 8],
    timestamp_us: u64,
}

fn sample(i: u64) -> Sample {
    Sample {
        id: (i % 2048) as u32,
        data: i.to_le_bytes(),
        timestamp_us: i,
    }
}

/// Publish cost as the number of subscribers grows.
///
/// Every publish increments one counter per subscriber, so this shows how the
/// notification fan-out scales.
fn ring_buffer_publish_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_publish");
    group.throughput(Throughput::Elements(1));

    for subscribers in [0usize, 1, 4, 16, 64] {
        let (mut publisher, feed) = channel::<Sample>(1024).unwrap();
        let _subscribers: Vec<_> = (0..subscribers).map(|_| feed.subscribe()).collect();

        let mut i = 0u64;
        group.bench_with_input(
            BenchmarkId::new("publish", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    publisher.publish(black_box(sample(i)));
                    i += 1;
                });
            },
        );
    }

    group.finish();
}

/// Poll latency for batches of pending messages.
fn ring_buffer_poll_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_poll");

    for batch in [1usize, 64, 512, 1024] {
        let (mut publisher, feed) = channel::<Sample>(1024).unwrap();
        let mut subscriber = feed.subscribe();

        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("poll", batch), &batch, |b, &batch| {
            b.iter(|| {
                for i in 0..batch as u64 {
                    publisher.publish(sample(i));
                }
                black_box(subscriber.poll());
            });
        });
    }

    group.finish();
}

/// One producer and one consumer thread exchanging 10k messages.
fn ring_buffer_concurrent(c: &mut Criterion) {
    const MESSAGES: u64 = 10_000;

    let mut group = c.benchmark_group("ring_buffer_concurrent");
    group.throughput(Throughput::Elements(MESSAGES));
    group.sample_size(20);

    group.bench_function("publish_poll_10k", |b| {
        b.iter(|| {
            let (mut publisher, feed) = channel::<Sample>(4096).unwrap();
            let mut subscriber = feed.subscribe();

            let consumer = thread::spawn(move || {
                let mut seen = 0u64;
                while seen < MESSAGES {
                    let news = subscriber.poll();
                    seen += (news.len() + news.lost) as u64;
                    if news.is_empty() {
                        thread::yield_now();
                    }
                }
                seen
            });

            for i in 0..MESSAGES {
                publisher.publish(sample(i));
            }
            black_box(consumer.join().unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    ring_buffer_publish_throughput,
    ring_buffer_poll_batch,
    ring_buffer_concurrent
);
criterion_main!(benches);
