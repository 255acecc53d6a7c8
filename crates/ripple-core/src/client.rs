//! Client handles.
//!
//! A [`Client`] is one participant's view of a shared [`Registry`]. Every
//! operation made through its handles is tagged with the client's id, so two
//! clients addressing the same channel name interact through the one shared
//! channel.

use crate::channel::{Channel, ChannelState};
use crate::connection::Connection;
use crate::dispatcher::{DispatchReport, Filter, ListenerId};
use crate::error::{BrokerError, ListenerResult};
use crate::identity::ClientId;
use crate::message::Message;
use crate::presence::{PresenceAction, PresenceMember, PresenceMessage};
use crate::registry::{ChannelTarget, Registry};
use crate::state::StateChange;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A client of the broker.
#[derive(Debug, Clone)]
pub struct Client {
    client_id: ClientId,
    registry: Option<Arc<Registry>>,
}

impl Client {
    /// Create an unbound client with a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client_id(ClientId::generate())
    }

    /// Create an unbound client with a given id.
    #[must_use]
    pub fn with_client_id(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            registry: None,
        }
    }

    /// Bind the client to a registry.
    #[must_use]
    pub fn connect_to(mut self, registry: Arc<Registry>) -> Self {
        debug!(client = %self.client_id, "Client bound to registry");
        self.registry = Some(registry);
        self
    }

    /// The client's id.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Check if the client is bound to a registry.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.registry.is_some()
    }

    fn registry(&self) -> Result<&Arc<Registry>, BrokerError> {
        self.registry.as_ref().ok_or_else(|| BrokerError::NotConfigured {
            client_id: self.client_id.to_string(),
        })
    }

    /// The client's channel collection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConfigured`] if the client is unbound.
    pub fn channels(&self) -> Result<ClientChannels, BrokerError> {
        Ok(ClientChannels {
            client_id: self.client_id.clone(),
            registry: Arc::clone(self.registry()?),
        })
    }

    /// The registry's connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConfigured`] if the client is unbound.
    pub fn connection(&self) -> Result<Arc<Connection>, BrokerError> {
        Ok(self.registry()?.connection())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Channels as seen by one client.
#[derive(Debug, Clone)]
pub struct ClientChannels {
    client_id: ClientId,
    registry: Arc<Registry>,
}

impl ClientChannels {
    /// Get a handle on a channel, creating the channel on first use.
    pub fn get(&self, target: impl Into<ChannelTarget>) -> ChannelHandle {
        ChannelHandle {
            client_id: self.client_id.clone(),
            channel: self.registry.get(target),
        }
    }

    /// Get a handle, validating the channel name and the channel limit.
    ///
    /// # Errors
    ///
    /// See [`Registry::try_get`].
    pub fn try_get(&self, target: impl Into<ChannelTarget>) -> Result<ChannelHandle, BrokerError> {
        Ok(ChannelHandle {
            client_id: self.client_id.clone(),
            channel: self.registry.try_get(target)?,
        })
    }
}

/// One client's handle on a shared channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    client_id: ClientId,
    channel: Arc<Channel>,
}

impl ChannelHandle {
    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// The owning client's id.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The shared channel behind this handle.
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Publish an unnamed message.
    ///
    /// # Errors
    ///
    /// See [`Channel::publish`].
    pub fn publish(&self, data: Value) -> Result<usize, BrokerError> {
        self.channel.publish(Some(&self.client_id), None, data)
    }

    /// Publish a named message.
    ///
    /// # Errors
    ///
    /// See [`Channel::publish`].
    pub fn publish_event(&self, name: &str, data: Value) -> Result<usize, BrokerError> {
        self.channel.publish(Some(&self.client_id), Some(name), data)
    }

    /// Publish several messages under one optional name, in order.
    ///
    /// # Errors
    ///
    /// See [`Channel::publish_batch`].
    pub fn publish_batch(
        &self,
        name: Option<&str>,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<usize, BrokerError> {
        self.channel.publish_batch(Some(&self.client_id), name, items)
    }

    /// Subscribe to messages matching `filter`.
    ///
    /// # Errors
    ///
    /// See [`Channel::subscribe`].
    pub fn subscribe<F>(&self, filter: Filter<String>, listener: F) -> Result<ListenerId, BrokerError>
    where
        F: Fn(&Message) -> ListenerResult + Send + Sync + 'static,
    {
        self.channel.subscribe(&self.client_id, filter, listener)
    }

    /// Remove this client's listeners for `event`, or all of them.
    pub fn unsubscribe(&self, event: Option<&str>) -> usize {
        self.channel.unsubscribe(&self.client_id, event)
    }

    /// Attach the channel.
    ///
    /// # Errors
    ///
    /// See [`Channel::attach`].
    pub fn attach(&self) -> Result<(), BrokerError> {
        self.channel.attach()
    }

    /// Remove this client's listeners, then detach the channel.
    ///
    /// # Errors
    ///
    /// See [`Channel::detach`].
    pub fn detach(&self) -> Result<(), BrokerError> {
        self.channel.unsubscribe(&self.client_id, None);
        self.channel.detach()
    }

    /// Listen for channel state changes.
    pub fn on<F>(&self, filter: Filter<ChannelState>, listener: F) -> ListenerId
    where
        F: Fn(&StateChange<ChannelState>) -> ListenerResult + Send + Sync + 'static,
    {
        self.channel.on(filter, listener)
    }

    /// Remove a channel state listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.channel.off(id)
    }

    /// This client's presence handle for the channel.
    #[must_use]
    pub fn presence(&self) -> PresenceHandle {
        PresenceHandle {
            client_id: self.client_id.clone(),
            channel: Arc::clone(&self.channel),
        }
    }
}

/// One client's handle on a channel's presence set.
#[derive(Debug, Clone)]
pub struct PresenceHandle {
    client_id: ClientId,
    channel: Arc<Channel>,
}

impl PresenceHandle {
    /// Enter presence with `data`.
    ///
    /// # Errors
    ///
    /// See [`Channel::presence_enter`].
    pub fn enter(&self, data: Value) -> Result<DispatchReport, BrokerError> {
        self.channel.presence_enter(&self.client_id, data)
    }

    /// Replace this client's presence data.
    ///
    /// # Errors
    ///
    /// See [`Channel::presence_update`].
    pub fn update(&self, data: Value) -> Result<DispatchReport, BrokerError> {
        self.channel.presence_update(&self.client_id, data)
    }

    /// Leave presence.
    ///
    /// # Errors
    ///
    /// See [`Channel::presence_leave`].
    pub fn leave(&self, data: Option<Value>) -> Result<Option<PresenceMember>, BrokerError> {
        self.channel.presence_leave(&self.client_id, data)
    }

    /// Snapshot of the current members.
    #[must_use]
    pub fn get(&self) -> Vec<PresenceMember> {
        self.channel.presence().get()
    }

    /// Watch presence changes.
    pub fn subscribe<F>(&self, filter: Filter<PresenceAction>, listener: F) -> ListenerId
    where
        F: Fn(&PresenceMessage) -> ListenerResult + Send + Sync + 'static,
    {
        self.channel.presence().subscribe(&self.client_id, filter, listener)
    }

    /// Stop watching `action`, or every action.
    pub fn unsubscribe(&self, action: Option<PresenceAction>) -> usize {
        self.channel.presence().unsubscribe(&self.client_id, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ErrorInfo;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    const TEST_CHANNEL: &str = "testChannel";

    fn setup() -> (Arc<Registry>, Client, Client) {
        let registry = Arc::new(Registry::with_channels(Default::default(), [TEST_CHANNEL]));
        let client = Client::new().connect_to(Arc::clone(&registry));
        let other = Client::new().connect_to(Arc::clone(&registry));
        (registry, client, other)
    }

    #[test]
    fn test_unbound_client_fails_fast() {
        let client = Client::with_client_id("lonely");
        assert!(!client.is_connected());

        let err = client.channels().unwrap_err();
        assert!(matches!(err, BrokerError::NotConfigured { ref client_id } if client_id == "lonely"));
        assert!(client.connection().is_err());
    }

    #[test]
    fn test_clients_share_channel_messages() {
        let (_registry, client, other) = setup();
        let received = Arc::new(StdMutex::new(Vec::new()));
        let r = Arc::clone(&received);

        client
            .channels()
            .unwrap()
            .get("blah")
            .subscribe(Filter::All, move |m| {
                r.lock().unwrap().push(m.clone());
                Ok(())
            })
            .unwrap();

        other
            .channels()
            .unwrap()
            .get("blah")
            .publish(json!({"text": "message text"}))
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data["text"], "message text");
        assert_eq!(received[0].client_id.as_ref(), Some(other.client_id()));
    }

    #[test]
    fn test_named_subscription_through_handle() {
        let (_registry, client, other) = setup();
        let count = Arc::new(StdMutex::new(0));
        let c = Arc::clone(&count);
        client
            .channels()
            .unwrap()
            .get(TEST_CHANNEL)
            .subscribe("greeting".into(), move |_| {
                *c.lock().unwrap() += 1;
                Ok(())
            })
            .unwrap();

        let channel = other.channels().unwrap().get(TEST_CHANNEL);
        channel.publish_event("greeting", json!("hi")).unwrap();
        channel.publish_event("farewell", json!("bye")).unwrap();
        channel.publish(json!("plain")).unwrap();

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_only_affects_own_client() {
        let (registry, client, other) = setup();
        let mine = client.channels().unwrap().get(TEST_CHANNEL);
        let theirs = other.channels().unwrap().get(TEST_CHANNEL);
        mine.subscribe(Filter::All, |_| Ok(())).unwrap();
        theirs.subscribe(Filter::All, |_| Ok(())).unwrap();

        assert_eq!(mine.unsubscribe(None), 1);
        assert_eq!(registry.get(TEST_CHANNEL).subscriber_count(), 1);
    }

    #[test]
    fn test_detach_removes_own_subscriptions() {
        let (registry, client, other) = setup();
        let mine = client.channels().unwrap().get(TEST_CHANNEL);
        mine.subscribe(Filter::All, |_| Ok(())).unwrap();
        other
            .channels()
            .unwrap()
            .get(TEST_CHANNEL)
            .subscribe(Filter::All, |_| Ok(()))
            .unwrap();

        mine.detach().unwrap();
        assert_eq!(mine.state(), ChannelState::Detached);
        assert!(registry.has_subscribers(TEST_CHANNEL));
        assert_eq!(registry.get(TEST_CHANNEL).client_subscriber_count(client.client_id()), 0);
    }

    #[test]
    fn test_presence_from_two_clients() {
        let (_registry, client, other) = setup();
        client.channels().unwrap().get(TEST_CHANNEL).presence().enter(json!("bar")).unwrap();
        other.channels().unwrap().get(TEST_CHANNEL).presence().enter(json!("boop")).unwrap();

        let members = client.channels().unwrap().get(TEST_CHANNEL).presence().get();
        assert_eq!(members.len(), 2);
        let bar: Vec<_> = members.iter().filter(|m| m.data == json!("bar")).collect();
        let boop: Vec<_> = members.iter().filter(|m| m.data == json!("boop")).collect();
        assert_eq!(bar.len(), 1);
        assert_eq!(boop.len(), 1);
        assert_eq!(&bar[0].client_id, client.client_id());
        assert_eq!(&boop[0].client_id, other.client_id());
    }

    #[test]
    fn test_leave_is_visible_to_other_clients() {
        let (_registry, client, other) = setup();
        let presence = client.channels().unwrap().get(TEST_CHANNEL).presence();
        presence.enter(json!("bar")).unwrap();
        presence.leave(None).unwrap();

        let seen_by_other = other.channels().unwrap().get(TEST_CHANNEL).presence().get();
        assert!(seen_by_other.iter().all(|m| &m.client_id != client.client_id()));
    }

    #[test]
    fn test_presence_watcher_refreshes_snapshot() {
        let (_registry, client, other) = setup();
        let handle = client.channels().unwrap().get(TEST_CHANNEL);
        let snapshots = Arc::new(StdMutex::new(Vec::new()));

        for action in [PresenceAction::Enter, PresenceAction::Leave, PresenceAction::Update] {
            let presence = handle.presence();
            let s = Arc::clone(&snapshots);
            handle.presence().subscribe(Filter::One(action), move |_| {
                s.lock().unwrap().push(presence.get().len());
                Ok(())
            });
        }

        handle.presence().enter(json!("bar")).unwrap();
        handle.presence().update(json!("baz")).unwrap();
        other.channels().unwrap().get(TEST_CHANNEL).presence().enter(json!("boop")).unwrap();
        other.channels().unwrap().get(TEST_CHANNEL).presence().leave(None).unwrap();

        assert_eq!(*snapshots.lock().unwrap(), vec![1, 1, 2, 1]);
        let current = handle.presence().get();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].data, json!("baz"));

        assert_eq!(handle.presence().unsubscribe(None), 3);
    }

    #[test]
    fn test_channel_state_listener_through_handle() {
        let (_registry, client, _other) = setup();
        let handle = client.channels().unwrap().get(TEST_CHANNEL);
        let states = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&states);
        let id = handle.on(Filter::All, move |change| {
            s.lock().unwrap().push(change.current);
            Ok(())
        });

        handle.attach().unwrap();
        handle.channel().fail(ErrorInfo::new("broken")).unwrap();
        assert!(handle.off(id));
        handle.attach().unwrap();

        assert_eq!(
            *states.lock().unwrap(),
            vec![ChannelState::Attaching, ChannelState::Attached, ChannelState::Failed]
        );
        assert!(handle.publish(json!(1)).is_ok());
    }

    #[test]
    fn test_connection_shared_between_clients() {
        let (_registry, client, other) = setup();
        let reasons = Arc::new(StdMutex::new(Vec::new()));
        let r = Arc::clone(&reasons);
        client
            .connection()
            .unwrap()
            .on(Filter::One(crate::ConnectionState::Failed), move |change| {
                r.lock().unwrap().push(change.reason.clone().map(|e| e.message));
                Ok(())
            });

        other.connection().unwrap().connect().unwrap();
        other.connection().unwrap().fail(ErrorInfo::new("foo")).unwrap();

        assert_eq!(*reasons.lock().unwrap(), vec![Some("foo".to_string())]);
    }

    #[test]
    fn test_publish_batch_through_handle() {
        let (registry, client, _other) = setup();
        let handle = client.channels().unwrap().get(TEST_CHANNEL);
        handle.publish_batch(Some("chat"), vec![json!("a"), json!("b")]).unwrap();

        let log = registry.get(TEST_CHANNEL).messages();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|m| m.name.as_deref() == Some("chat")));
        assert!(log.iter().all(|m| m.client_id.as_ref() == Some(client.client_id())));
    }

    #[test]
    fn test_try_get_rejects_bad_names() {
        let (_registry, client, _other) = setup();
        assert!(client.channels().unwrap().try_get("$reserved").is_err());
        assert!(client.channels().unwrap().try_get(TEST_CHANNEL).is_ok());
    }
}
