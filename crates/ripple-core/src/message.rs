//! Messages delivered to channel subscribers.

use crate::identity::ClientId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let timestamp = now_nanos();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

pub(crate) fn now_millis() -> u64 {
    now_nanos() / 1_000_000
}

/// A message published on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Publishing client, if the message came through a client handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Channel the message was published on.
    pub channel: String,
    /// Event name. `None` for unnamed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Message payload.
    pub data: Value,
    /// Timestamp (ms since epoch) when the message was created.
    pub timestamp: u64,
}

impl Message {
    /// Create a new unnamed message.
    #[must_use]
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self {
            id: generate_message_id(),
            client_id: None,
            channel: channel.into(),
            name: None,
            data,
            timestamp: now_millis(),
        }
    }

    /// Set the publishing client.
    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Set the event name. An empty name leaves the message unnamed.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.is_empty() { None } else { Some(name) };
        self
    }

    /// The event name, or `""` for unnamed messages.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}
