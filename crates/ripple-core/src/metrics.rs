//! Broker instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding program installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_PUBLISHED: &str = "ripple_messages_published_total";
    pub const MESSAGES_DELIVERED: &str = "ripple_messages_delivered_total";
    pub const PRESENCE_EVENTS: &str = "ripple_presence_events_total";
    pub const LISTENER_ERRORS: &str = "ripple_listener_errors_total";
    pub const CHANNELS_ACTIVE: &str = "ripple_channels_active";
}

/// Describe the broker's metrics to the installed recorder.
pub fn describe() {
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Total number of messages published");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Total number of listener invocations for published messages"
    );
    metrics::describe_counter!(names::PRESENCE_EVENTS, "Total number of presence events");
    metrics::describe_counter!(names::LISTENER_ERRORS, "Total number of listener failures");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of channels");
}

/// Record a publish and its fan-out.
pub fn record_publish(delivered: usize) {
    counter!(names::MESSAGES_PUBLISHED).increment(1);
    counter!(names::MESSAGES_DELIVERED).increment(delivered as u64);
}

/// Record a presence event.
pub fn record_presence_event(action: &'static str) {
    counter!(names::PRESENCE_EVENTS, "action" => action).increment(1);
}

/// Record a listener failure.
pub fn record_listener_error() {
    counter!(names::LISTENER_ERRORS).increment(1);
}

/// Update the channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}
