//! Latency benchmarks for Ripple.
//!
//! These benchmarks focus on the cost of a single operation as seen by the
//! caller.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ripple_bench::{bench_config, channel_with_subscribers};
use ripple_core::{Client, Filter, Message, Registry};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Benchmark publish-to-delivery latency.
fn bench_pubsub_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pubsub_latency");

    group.bench_function("single_subscriber", |b| {
        b.iter_custom(|iters| {
            let (channel, delivered) = channel_with_subscribers("test", 1, Filter::All);

            let start = Instant::now();
            for i in 0..iters {
                let _ = channel.publish(None, None, json!(i));
            }
            let elapsed = start.elapsed();
            assert_eq!(delivered.load(Ordering::Relaxed) as u64, iters);
            elapsed
        });
    });

    group.bench_function("ten_subscribers", |b| {
        b.iter_custom(|iters| {
            let (channel, _) = channel_with_subscribers("test", 10, Filter::All);

            let start = Instant::now();
            for i in 0..iters {
                let _ = channel.publish(None, None, json!(i));
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark the client handle path, including channel lookup.
fn bench_client_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_roundtrip");

    group.bench_function("lookup_and_publish", |b| {
        let registry = Arc::new(Registry::with_config(bench_config()));
        let alice = Client::with_client_id("alice").connect_to(Arc::clone(&registry));
        let bob = Client::with_client_id("bob").connect_to(registry);
        let _ = alice
            .channels()
            .map(|channels| channels.get("test").subscribe(Filter::All, |_| Ok(())));
        let Ok(channels) = bob.channels() else {
            return;
        };

        b.iter(|| channels.get(black_box("test")).publish(json!("message text")));
    });

    group.finish();
}

/// Benchmark message creation latency.
fn bench_message_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_creation");

    group.bench_function("simple", |b| {
        b.iter(|| Message::new(black_box("test:channel"), black_box(json!({"n": 1}))))
    });

    group.bench_function("with_metadata", |b| {
        b.iter(|| {
            Message::new(black_box("test:channel"), black_box(json!({"n": 1})))
                .with_client_id(black_box("client-123").into())
                .with_name(black_box("user:message"))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_pubsub_latency,
    bench_client_roundtrip,
    bench_message_creation,
);
criterion_main!(benches);
