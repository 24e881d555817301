//! # MicroBus Benchmarks
//!
//! Local routing cost, without the network:
//!
//! | Path | Measures |
//! |------|----------|
//! | group fan-out | clone + enqueue per subscriber |
//! | directed | registry lookup + single enqueue |
//! | wire encode | bincode framing of a data packet |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mbus_net::wire::{encode_data, Packet};
use micro_bus::{BusConfig, EndpointId, Message, MicroBus};
use rand::Rng;
use std::time::Duration;

// ============================================================================
// Group fan-out
// ============================================================================

fn bench_group_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("group-fanout");
    group.measurement_time(Duration::from_secs(5));

    for subscribers in [1usize, 10, 100] {
        let bus = MicroBus::new(BusConfig::default());
        let producer = bus.channel();
        let consumers: Vec<_> = (0..subscribers)
            .map(|_| {
                let channel = bus.channel_with_sink(|message| {
                    black_box(message);
                });
                let _ = channel.join("bench");
                channel
            })
            .collect();

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("send_to_group", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    let message = Message::new(vec![0u8; 64]);
                    black_box(producer.send_to_group(message, "bench").ok())
                })
            },
        );

        drop(consumers);
        bus.shutdown();
    }

    group.finish();
}

// ============================================================================
// Directed delivery
// ============================================================================

fn bench_directed(c: &mut Criterion) {
    let bus = MicroBus::new(BusConfig::default());
    let producer = bus.channel();
    let targets: Vec<_> = (0..100)
        .map(|_| bus.channel_with_sink(|message| drop(black_box(message))))
        .collect();
    let mut rng = rand::thread_rng();

    c.bench_function("directed/random_target_of_100", |b| {
        b.iter(|| {
            let target = &targets[rng.gen_range(0..targets.len())];
            let message = Message::new(vec![0u8; 64]);
            black_box(producer.send_to(message, target.address()).ok())
        })
    });

    bus.shutdown();
}

// ============================================================================
// Wire encoding
// ============================================================================

fn bench_wire_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");

    for size in [64usize, 1024, 16 * 1024] {
        let message = Message::new(vec![7u8; size])
            .with_group("bench")
            .with_header("k", "v");
        let encoded = encode_data(EndpointId::new(1), &message).ok();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_data", size), &message, |b, m| {
            b.iter(|| black_box(encode_data(EndpointId::new(1), m).ok()))
        });
        if let Some(bytes) = encoded {
            group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
                b.iter(|| black_box(Packet::decode(bytes).ok()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_group_fanout, bench_directed, bench_wire_encode);
criterion_main!(benches);
