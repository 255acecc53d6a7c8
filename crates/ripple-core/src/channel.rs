//! Channel abstraction.
//!
//! A channel is a named scope clients publish to and subscribe on. Each channel
//! owns its subscription table, an append-only message log, a state machine
//! and a presence set.

use crate::config::BrokerConfig;
use crate::dispatcher::{DispatchReport, Dispatcher, Filter, ListenerId};
use crate::error::{BrokerError, ListenerResult};
use crate::identity::ClientId;
use crate::message::Message;
use crate::metrics;
use crate::presence::{Presence, PresenceMember};
use crate::state::{ErrorInfo, State, StateChange, StateEmitter};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with('$') {
        return Err("Channel names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

impl ChannelState {
    /// Every channel state.
    pub const ALL: [ChannelState; 7] = [
        ChannelState::Initialized,
        ChannelState::Attaching,
        ChannelState::Attached,
        ChannelState::Detaching,
        ChannelState::Detached,
        ChannelState::Suspended,
        ChannelState::Failed,
    ];

    /// Lowercase state name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Initialized => "initialized",
            ChannelState::Attaching => "attaching",
            ChannelState::Attached => "attached",
            ChannelState::Detaching => "detaching",
            ChannelState::Detached => "detached",
            ChannelState::Suspended => "suspended",
            ChannelState::Failed => "failed",
        }
    }
}

impl FromStr for ChannelState {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| BrokerError::UnknownState(s.to_string()))
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl State for ChannelState {
    fn can_transition_to(self, next: Self) -> bool {
        use ChannelState::*;
        match next {
            Initialized => false,
            Attaching => matches!(self, Initialized | Detaching | Detached | Suspended | Failed),
            // Attached -> Attached is the update refresh.
            Attached => matches!(self, Attaching | Attached),
            Detaching => matches!(self, Attaching | Attached),
            Detached => matches!(self, Detaching | Suspended),
            Suspended => !matches!(self, Suspended | Failed),
            Failed => self != Failed,
        }
    }
}

/// Per-channel options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Free-form channel parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ChannelOptions {
    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

struct ChannelInner {
    options: ChannelOptions,
    log: VecDeque<Message>,
}

/// A channel for pub/sub messaging and presence.
pub struct Channel {
    /// Channel name.
    name: ChannelId,
    state: StateEmitter<ChannelState>,
    subscriptions: Dispatcher<String, Message>,
    presence: Presence,
    inner: Mutex<ChannelInner>,
    /// Held across multi-step lifecycle changes. Re-entrant so state
    /// listeners may call back into the channel.
    lifecycle: ReentrantMutex<()>,
    log_limit: Option<usize>,
}

impl Channel {
    /// Create a new channel with default configuration.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self::with_config(name, &BrokerConfig::default())
    }

    /// Create a new channel using the registry's configuration.
    #[must_use]
    pub fn with_config(name: impl Into<ChannelId>, config: &BrokerConfig) -> Self {
        let name = name.into();
        let policy = config.listener_errors;
        Self {
            state: StateEmitter::new(name.clone(), ChannelState::Initialized, policy),
            subscriptions: Dispatcher::new(name.clone(), policy),
            presence: Presence::new(name.clone(), policy),
            inner: Mutex::new(ChannelInner {
                options: ChannelOptions::default(),
                log: VecDeque::new(),
            }),
            lifecycle: ReentrantMutex::new(()),
            log_limit: config.message_log_limit,
            name,
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state.state()
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> ChannelOptions {
        self.inner.lock().options.clone()
    }

    /// The channel's presence set.
    #[must_use]
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Publish `data` on this channel.
    ///
    /// Returns the number of listeners invoked.
    ///
    /// # Errors
    ///
    /// Fails if the channel is suspended or failed, or if a listener fails
    /// and listener errors propagate.
    pub fn publish(
        &self,
        client_id: Option<&ClientId>,
        name: Option<&str>,
        data: Value,
    ) -> Result<usize, BrokerError> {
        self.ensure_usable("publish")?;
        let mut message = Message::new(self.name.clone(), data);
        if let Some(client_id) = client_id {
            message = message.with_client_id(client_id.clone());
        }
        if let Some(name) = name {
            message = message.with_name(name);
        }
        self.deliver(message)
    }

    /// Publish each item as its own message, in order.
    ///
    /// Returns the total number of listener invocations.
    ///
    /// # Errors
    ///
    /// Stops at the first failing publish.
    pub fn publish_batch(
        &self,
        client_id: Option<&ClientId>,
        name: Option<&str>,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<usize, BrokerError> {
        let mut delivered = 0;
        for data in items {
            delivered += self.publish(client_id, name, data)?;
        }
        Ok(delivered)
    }

    /// Publish an already built message.
    ///
    /// # Errors
    ///
    /// Same as [`Channel::publish`].
    pub fn publish_message(&self, message: Message) -> Result<usize, BrokerError> {
        self.ensure_usable("publish")?;
        self.deliver(message)
    }

    fn deliver(&self, message: Message) -> Result<usize, BrokerError> {
        {
            let mut inner = self.inner.lock();
            inner.log.push_back(message.clone());
            if let Some(limit) = self.log_limit {
                while inner.log.len() > limit {
                    inner.log.pop_front();
                }
            }
        }

        trace!(channel = %self.name, event = %message.event_name(), "Publishing message");
        let report = self.subscriptions.dispatch(message.name.as_ref(), &message)?;
        metrics::record_publish(report.invoked);
        Ok(report.invoked)
    }

    /// Subscribe `listener` on behalf of `client_id`.
    ///
    /// `Filter::All` receives every message; named filters receive only
    /// messages with a matching name. Subscribing twice registers two
    /// independent listeners. Attaches the channel if needed.
    ///
    /// # Errors
    ///
    /// Fails if the channel is suspended or failed, or if the implicit
    /// attach is rejected by a state listener.
    pub fn subscribe<F>(
        &self,
        client_id: &ClientId,
        filter: Filter<String>,
        listener: F,
    ) -> Result<ListenerId, BrokerError>
    where
        F: Fn(&Message) -> ListenerResult + Send + Sync + 'static,
    {
        let filter = filter.normalize_events();
        self.ensure_attached("subscribe")?;
        debug!(channel = %self.name, client = %client_id, filter = ?filter, "Client subscribed");
        Ok(self.subscriptions.add(Some(client_id.clone()), filter, listener))
    }

    /// Remove `client_id`'s listeners for `event`, or all of them.
    ///
    /// The empty event name addresses the client's wildcard listeners.
    /// Returns the number of listeners removed.
    pub fn unsubscribe(&self, client_id: &ClientId, event: Option<&str>) -> usize {
        let removed = match event {
            Some("") => self.subscriptions.remove_owner_wildcards(client_id),
            Some(event) => self
                .subscriptions
                .remove_owner(client_id, Some(&event.to_string())),
            None => self.subscriptions.remove_owner(client_id, None),
        };
        if removed > 0 {
            debug!(channel = %self.name, client = %client_id, removed, "Client unsubscribed");
        }
        removed
    }

    /// Remove a single listener by id.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.subscriptions.remove(id)
    }

    /// Check if any message listener is registered.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Number of message listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of message listeners registered by `client_id`.
    #[must_use]
    pub fn client_subscriber_count(&self, client_id: &ClientId) -> usize {
        self.subscriptions.owner_len(client_id)
    }

    /// Snapshot of the message log, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().log.iter().cloned().collect()
    }

    /// Number of logged messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// Attach the channel: `attaching` then `attached`.
    ///
    /// Attaching an attached channel, or one that is already attaching,
    /// does nothing. A concurrent caller waits for the attach in progress.
    /// The channel reaches `attached` even when an `attaching` listener
    /// fails; that failure is returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns a listener error when the dispatch policy propagates failures.
    pub fn attach(&self) -> Result<(), BrokerError> {
        let _lifecycle = self.lifecycle.lock();
        match self.state() {
            ChannelState::Attached | ChannelState::Attaching => Ok(()),
            _ => {
                let attaching = self.state.transition(ChannelState::Attaching, None);
                if let Err(BrokerError::InvalidTransition { .. }) = attaching {
                    return attaching.map(|_| ());
                }
                let attached = self.state.transition(ChannelState::Attached, None);
                attaching?;
                attached?;
                Ok(())
            }
        }
    }

    /// Detach the channel: `detaching` then `detached`.
    ///
    /// Subscriptions are kept; detaching only changes state. Detaching a
    /// channel that was never attached, is already detached or is detaching
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Fails on a failed channel, or with a listener error.
    pub fn detach(&self) -> Result<(), BrokerError> {
        let _lifecycle = self.lifecycle.lock();
        match self.state() {
            ChannelState::Initialized | ChannelState::Detached | ChannelState::Detaching => Ok(()),
            ChannelState::Failed => Err(self.invalid_state("detach")),
            ChannelState::Suspended => {
                self.state.transition(ChannelState::Detached, None)?;
                Ok(())
            }
            ChannelState::Attaching | ChannelState::Attached => {
                let detaching = self.state.transition(ChannelState::Detaching, None);
                if let Err(BrokerError::InvalidTransition { .. }) = detaching {
                    return detaching.map(|_| ());
                }
                let detached = self.state.transition(ChannelState::Detached, None);
                detaching?;
                detached?;
                Ok(())
            }
        }
    }

    /// Move to `suspended` after a connectivity problem.
    ///
    /// # Errors
    ///
    /// Fails if the channel is already suspended or failed.
    pub fn suspend(&self, reason: ErrorInfo) -> Result<StateChange<ChannelState>, BrokerError> {
        let _lifecycle = self.lifecycle.lock();
        self.state.transition(ChannelState::Suspended, Some(reason))
    }

    /// Move to `failed`.
    ///
    /// # Errors
    ///
    /// Fails if the channel has already failed.
    pub fn fail(&self, reason: ErrorInfo) -> Result<StateChange<ChannelState>, BrokerError> {
        let _lifecycle = self.lifecycle.lock();
        self.state.transition(ChannelState::Failed, Some(reason))
    }

    /// Emit an `attached -> attached` update.
    ///
    /// # Errors
    ///
    /// Fails unless the channel is attached.
    pub fn refresh(
        &self,
        reason: Option<ErrorInfo>,
    ) -> Result<StateChange<ChannelState>, BrokerError> {
        let _lifecycle = self.lifecycle.lock();
        if self.state() != ChannelState::Attached {
            return Err(self.invalid_state("refresh"));
        }
        self.state.transition(ChannelState::Attached, reason)
    }

    /// Replace the channel options.
    ///
    /// Returns `true` if they changed. An attached channel emits an update
    /// when its options change.
    ///
    /// # Errors
    ///
    /// Returns a listener error from the update notification.
    pub fn set_options(&self, options: ChannelOptions) -> Result<bool, BrokerError> {
        {
            let mut inner = self.inner.lock();
            if inner.options == options {
                return Ok(false);
            }
            inner.options = options;
        }
        debug!(channel = %self.name, "Channel options updated");
        if self.state() == ChannelState::Attached {
            self.refresh(Some(ErrorInfo::new("Channel options updated")))?;
        }
        Ok(true)
    }

    /// Listen for state changes whose new state matches `filter`.
    pub fn on<F>(&self, filter: Filter<ChannelState>, listener: F) -> ListenerId
    where
        F: Fn(&StateChange<ChannelState>) -> ListenerResult + Send + Sync + 'static,
    {
        self.state.on(filter, listener)
    }

    /// Remove a state listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.state.off(id)
    }

    /// Enter presence on behalf of `client_id`. Attaches the channel if needed.
    ///
    /// # Errors
    ///
    /// Fails if the channel is suspended or failed, or with a listener error.
    pub fn presence_enter(
        &self,
        client_id: &ClientId,
        data: Value,
    ) -> Result<DispatchReport, BrokerError> {
        self.ensure_attached("enter presence")?;
        self.presence.enter(client_id, data)
    }

    /// Update presence on behalf of `client_id`. Attaches the channel if needed.
    ///
    /// # Errors
    ///
    /// Fails if the channel is suspended or failed, or with a listener error.
    pub fn presence_update(
        &self,
        client_id: &ClientId,
        data: Value,
    ) -> Result<DispatchReport, BrokerError> {
        self.ensure_attached("update presence")?;
        self.presence.update(client_id, data)
    }

    /// Leave presence on behalf of `client_id`.
    ///
    /// # Errors
    ///
    /// Fails if the channel is suspended or failed, or with a listener error.
    pub fn presence_leave(
        &self,
        client_id: &ClientId,
        data: Option<Value>,
    ) -> Result<Option<PresenceMember>, BrokerError> {
        self.ensure_usable("leave presence")?;
        self.presence.leave(client_id, data)
    }

    fn ensure_usable(&self, operation: &'static str) -> Result<(), BrokerError> {
        match self.state() {
            ChannelState::Suspended | ChannelState::Failed => Err(self.invalid_state(operation)),
            _ => Ok(()),
        }
    }

    fn ensure_attached(&self, operation: &'static str) -> Result<(), BrokerError> {
        self.ensure_usable(operation)?;
        self.attach()
    }

    fn invalid_state(&self, operation: &'static str) -> BrokerError {
        BrokerError::InvalidState {
            channel: self.name.clone(),
            state: self.state().to_string(),
            operation,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .field("presence", &self.presence.len())
            .field("messages", &self.message_count())
            .finish()
    }
}
