//! Presence tracking.
//!
//! Presence records which clients are "in" a channel along with a status
//! payload for each. A client has at most one entry per channel: entering or
//! updating again replaces the previous payload.

use crate::config::ListenerErrorPolicy;
use crate::dispatcher::{DispatchReport, Dispatcher, Filter, ListenerId};
use crate::error::{BrokerError, ListenerResult};
use crate::identity::ClientId;
use crate::message::now_millis;
use crate::metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// What happened to a presence member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    /// The client entered the presence set.
    Enter,
    /// The client replaced its payload.
    Update,
    /// The client left.
    Leave,
}

impl PresenceAction {
    /// Lowercase action name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceAction::Enter => "enter",
            PresenceAction::Update => "update",
            PresenceAction::Leave => "leave",
        }
    }
}

impl fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client's current entry in a presence set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    /// The present client.
    pub client_id: ClientId,
    /// User-defined status payload.
    pub data: Value,
}

/// Notification delivered to presence watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMessage {
    /// What happened.
    pub action: PresenceAction,
    /// The client it happened to.
    pub client_id: ClientId,
    /// The payload sent with the action.
    pub data: Value,
    /// Timestamp (ms since epoch).
    pub timestamp: u64,
}

/// Presence set for a channel.
#[derive(Debug)]
pub struct Presence {
    channel: String,
    /// Members in first-entry order.
    members: Mutex<Vec<PresenceMember>>,
    watchers: Dispatcher<PresenceAction, PresenceMessage>,
}

impl Presence {
    /// Create an empty presence set for `channel`.
    #[must_use]
    pub fn new(channel: impl Into<String>, policy: ListenerErrorPolicy) -> Self {
        let channel = channel.into();
        Self {
            watchers: Dispatcher::new(channel.clone(), policy),
            channel,
            members: Mutex::new(Vec::new()),
        }
    }

    /// Add or replace `client_id`'s entry and notify watchers with `enter`.
    ///
    /// # Errors
    ///
    /// Returns a listener error when the dispatch policy propagates failures.
    pub fn enter(&self, client_id: &ClientId, data: Value) -> Result<DispatchReport, BrokerError> {
        self.store(client_id, data.clone());
        debug!(channel = %self.channel, client = %client_id, "Presence: member entered");
        self.notify(PresenceAction::Enter, client_id, data)
    }

    /// Replace `client_id`'s entry and notify watchers with `update`.
    ///
    /// Updating without entering first behaves like `enter` but still notifies
    /// with `update`. Identical payloads are not deduplicated.
    ///
    /// # Errors
    ///
    /// Returns a listener error when the dispatch policy propagates failures.
    pub fn update(&self, client_id: &ClientId, data: Value) -> Result<DispatchReport, BrokerError> {
        self.store(client_id, data.clone());
        debug!(channel = %self.channel, client = %client_id, "Presence: member updated");
        self.notify(PresenceAction::Update, client_id, data)
    }

    /// Remove `client_id`'s entry and notify watchers with `leave`.
    ///
    /// `data` is informational: watchers receive it, or the member's last
    /// payload when it is `None`. Returns the removed member, if any.
    ///
    /// # Errors
    ///
    /// Returns a listener error when the dispatch policy propagates failures.
    pub fn leave(
        &self,
        client_id: &ClientId,
        data: Option<Value>,
    ) -> Result<Option<PresenceMember>, BrokerError> {
        let removed = {
            let mut members = self.members.lock();
            members
                .iter()
                .position(|m| &m.client_id == client_id)
                .map(|idx| members.remove(idx))
        };
        if removed.is_some() {
            debug!(channel = %self.channel, client = %client_id, "Presence: member left");
        }

        let data = data
            .or_else(|| removed.as_ref().map(|m| m.data.clone()))
            .unwrap_or(Value::Null);
        self.notify(PresenceAction::Leave, client_id, data)?;
        Ok(removed)
    }

    /// Snapshot of all current members.
    #[must_use]
    pub fn get(&self) -> Vec<PresenceMember> {
        self.members.lock().clone()
    }

    /// The entry for a single client.
    #[must_use]
    pub fn get_member(&self, client_id: &ClientId) -> Option<PresenceMember> {
        self.members
            .lock()
            .iter()
            .find(|m| &m.client_id == client_id)
            .cloned()
    }

    /// Check if a client is present.
    #[must_use]
    pub fn is_present(&self, client_id: &ClientId) -> bool {
        self.members.lock().iter().any(|m| &m.client_id == client_id)
    }

    /// Number of present members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Check if nobody is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Watch presence changes on behalf of `client_id`.
    pub fn subscribe<F>(
        &self,
        client_id: &ClientId,
        filter: Filter<PresenceAction>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&PresenceMessage) -> ListenerResult + Send + Sync + 'static,
    {
        debug!(channel = %self.channel, client = %client_id, filter = ?filter, "Presence: watcher added");
        self.watchers.add(Some(client_id.clone()), filter, listener)
    }

    /// Stop watching `action` (or every action) on behalf of `client_id`.
    ///
    /// Returns the number of watchers removed.
    pub fn unsubscribe(&self, client_id: &ClientId, action: Option<PresenceAction>) -> usize {
        self.watchers.remove_owner(client_id, action.as_ref())
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    fn store(&self, client_id: &ClientId, data: Value) {
        let mut members = self.members.lock();
        match members.iter_mut().find(|m| &m.client_id == client_id) {
            Some(member) => member.data = data,
            None => members.push(PresenceMember {
                client_id: client_id.clone(),
                data,
            }),
        }
    }

    fn notify(
        &self,
        action: PresenceAction,
        client_id: &ClientId,
        data: Value,
    ) -> Result<DispatchReport, BrokerError> {
        metrics::record_presence_event(action.as_str());
        let message = PresenceMessage {
            action,
            client_id: client_id.clone(),
            data,
            timestamp: now_millis(),
        };
        self.watchers.dispatch(Some(&action), &message)
    }
}
