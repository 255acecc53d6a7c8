//! Shared fixtures for the broker benchmarks.

use ripple_core::{BrokerConfig, Channel, ClientId, Filter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Messages kept per channel while benchmarking.
pub const BENCH_LOG_LIMIT: usize = 1024;

/// Broker config with a bounded message log.
#[must_use]
pub fn bench_config() -> BrokerConfig {
    BrokerConfig {
        message_log_limit: Some(BENCH_LOG_LIMIT),
        ..BrokerConfig::default()
    }
}

/// A channel with `subscribers` distinct clients listening on `filter`.
///
/// Every delivery bumps the returned counter.
///
/// # Panics
///
/// Panics if the channel rejects a subscription.
#[must_use]
pub fn channel_with_subscribers(
    name: &str,
    subscribers: usize,
    filter: Filter<String>,
) -> (Arc<Channel>, Arc<AtomicUsize>) {
    let channel = Arc::new(Channel::with_config(name, &bench_config()));
    let delivered = Arc::new(AtomicUsize::new(0));

    for i in 0..subscribers {
        let counter = Arc::clone(&delivered);
        let client = ClientId::new(format!("client-{i}"));
        channel
            .subscribe(&client, filter.clone(), move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .expect("fresh channel accepts subscriptions");
    }

    (channel, delivered)
}
