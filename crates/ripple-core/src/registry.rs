//! Channel registry.
//!
//! The registry is the shared broker scope: every client handle created from
//! the same registry sees the same channels and the same connection.

use crate::channel::{validate_channel_name, Channel, ChannelId, ChannelOptions};
use crate::config::BrokerConfig;
use crate::connection::Connection;
use crate::error::BrokerError;
use crate::metrics;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a caller addresses a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTarget {
    /// Just a name.
    Name(ChannelId),
    /// A name plus options to apply to the channel.
    NameWithOptions {
        /// Channel name.
        name: ChannelId,
        /// Options to apply.
        options: ChannelOptions,
    },
}

impl ChannelTarget {
    /// Address a channel and apply options to it.
    #[must_use]
    pub fn with_options(name: impl Into<ChannelId>, options: ChannelOptions) -> Self {
        ChannelTarget::NameWithOptions {
            name: name.into(),
            options,
        }
    }

    /// The addressed channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ChannelTarget::Name(name) | ChannelTarget::NameWithOptions { name, .. } => name,
        }
    }

    fn into_parts(self) -> (ChannelId, Option<ChannelOptions>) {
        match self {
            ChannelTarget::Name(name) => (name, None),
            ChannelTarget::NameWithOptions { name, options } => (name, Some(options)),
        }
    }
}

impl From<&str> for ChannelTarget {
    fn from(name: &str) -> Self {
        ChannelTarget::Name(name.to_string())
    }
}

impl From<String> for ChannelTarget {
    fn from(name: String) -> Self {
        ChannelTarget::Name(name)
    }
}

impl From<&String> for ChannelTarget {
    fn from(name: &String) -> Self {
        ChannelTarget::Name(name.clone())
    }
}

/// The channel registry.
///
/// Channels are created on first lookup and live as long as the registry;
/// there is no eviction, which suits a test broker but not a long-running
/// service.
pub struct Registry {
    /// Channels indexed by name.
    channels: DashMap<ChannelId, Arc<Channel>>,
    connection: Arc<Connection>,
    config: BrokerConfig,
}

impl Registry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        info!("Creating registry with config: {:?}", config);
        Self {
            channels: DashMap::new(),
            connection: Arc::new(Connection::new(config.listener_errors)),
            config,
        }
    }

    /// Create a registry with the named channels already present.
    #[must_use]
    pub fn with_channels<I, S>(config: BrokerConfig, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ChannelId>,
    {
        let registry = Self::with_config(config);
        for name in names {
            registry.get(ChannelTarget::Name(name.into()));
        }
        registry
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The process-wide connection.
    #[must_use]
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    /// Get a channel, creating it on first use.
    ///
    /// Repeated lookups of the same name return the same channel. Options in
    /// the target replace the channel's options when they differ.
    pub fn get(&self, target: impl Into<ChannelTarget>) -> Arc<Channel> {
        let (name, options) = target.into().into_parts();
        let channel = self.lookup(name);

        if let Some(options) = options {
            if let Err(e) = channel.set_options(options) {
                warn!(channel = %channel.name(), error = %e, "Listener failed during options update");
            }
        }
        channel
    }

    /// Get a channel, validating the name and the channel limit first.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the limit is reached, or a
    /// listener fails while options are applied.
    pub fn try_get(&self, target: impl Into<ChannelTarget>) -> Result<Arc<Channel>, BrokerError> {
        let (name, options) = target.into().into_parts();
        validate_channel_name(&name).map_err(BrokerError::InvalidChannel)?;

        if !self.channels.contains_key(&name) && self.channels.len() >= self.config.max_channels {
            return Err(BrokerError::MaxChannelsReached(self.config.max_channels));
        }

        let channel = self.lookup(name);
        if let Some(options) = options {
            channel.set_options(options)?;
        }
        Ok(channel)
    }

    fn lookup(&self, name: ChannelId) -> Arc<Channel> {
        // The map guard is dropped before any listener can run.
        if let Some(existing) = self.channels.get(&name) {
            return Arc::clone(existing.value());
        }
        let channel = self
            .channels
            .entry(name.clone())
            .or_insert_with(|| {
                debug!(channel = %name, "Creating new channel");
                Arc::new(Channel::with_config(name.clone(), &self.config))
            })
            .value()
            .clone();
        metrics::set_active_channels(self.channels.len());
        channel
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Check if a channel has any message listeners.
    #[must_use]
    pub fn has_subscribers(&self, name: &str) -> bool {
        self.channels
            .get(name)
            .map(|c| c.has_subscribers())
            .unwrap_or(false)
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel was ever looked up.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let mut stats = BrokerStats {
            channel_count: self.channels.len(),
            ..BrokerStats::default()
        };
        for entry in self.channels.iter() {
            let channel = entry.value();
            stats.total_subscriptions += channel.subscriber_count();
            stats.presence_members += channel.presence().len();
            stats.logged_messages += channel.message_count();
        }
        stats
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("channels", &self.channels.len())
            .field("connection", &self.connection.state())
            .field("config", &self.config)
            .finish()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BrokerStats {
    /// Number of channels.
    pub channel_count: usize,
    /// Message listeners across all channels.
    pub total_subscriptions: usize,
    /// Presence members across all channels.
    pub presence_members: usize,
    /// Logged messages across all channels.
    pub logged_messages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Filter;
    use crate::identity::ClientId;
    use crate::state::ErrorInfo;
    use crate::ChannelState;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_get_returns_same_instance() {
        let registry = Registry::new();
        let first = registry.get("room");
        let second = registry.get("room");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), ChannelState::Initialized);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_listener_on_first_lookup_sees_publish_on_second() {
        let registry = Registry::new();
        let received = Arc::new(StdMutex::new(Vec::new()));
        let r = Arc::clone(&received);
        registry
            .get("room")
            .subscribe(&ClientId::new("a"), Filter::All, move |m| {
                r.lock().unwrap().push(m.data.clone());
                Ok(())
            })
            .unwrap();

        registry.get("room").publish(None, None, json!("hello")).unwrap();
        assert_eq!(*received.lock().unwrap(), vec![json!("hello")]);
    }

    #[test]
    fn test_with_channels_preseeds() {
        let registry = Registry::with_channels(BrokerConfig::default(), ["a", "b"]);
        assert!(registry.contains("a"));
        assert!(registry.contains("b"));
        assert!(!registry.contains("c"));

        let mut names = registry.channel_names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_try_get_validates() {
        let registry = Registry::with_config(BrokerConfig {
            max_channels: 1,
            ..BrokerConfig::default()
        });

        assert!(matches!(registry.try_get(""), Err(BrokerError::InvalidChannel(_))));
        assert!(matches!(registry.try_get("$system"), Err(BrokerError::InvalidChannel(_))));
        assert!(registry.try_get("one").is_ok());
        assert!(registry.try_get("one").is_ok());
        assert!(matches!(
            registry.try_get("two"),
            Err(BrokerError::MaxChannelsReached(1))
        ));

        // The infallible lookup ignores the limit.
        registry.get("two");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_options_target_updates_attached_channel() {
        let registry = Registry::new();
        let channel = registry.get("room");
        channel.attach().unwrap();

        let updates = Arc::new(StdMutex::new(0));
        let u = Arc::clone(&updates);
        channel.on(Filter::One(ChannelState::Attached), move |change| {
            assert!(change.is_update());
            *u.lock().unwrap() += 1;
            Ok(())
        });

        let options = ChannelOptions::default().with_param("rewind", "1");
        let again = registry.get(ChannelTarget::with_options("room", options.clone()));
        assert!(Arc::ptr_eq(&channel, &again));
        assert_eq!(again.options(), options);

        registry.get(ChannelTarget::with_options("room", options));
        assert_eq!(*updates.lock().unwrap(), 1);
    }

    #[test]
    fn test_has_subscribers() {
        let registry = Registry::new();
        assert!(!registry.has_subscribers("room"));

        let id = registry
            .get("room")
            .subscribe(&ClientId::new("a"), Filter::All, |_| Ok(()))
            .unwrap();
        assert!(registry.has_subscribers("room"));

        registry.get("room").remove_listener(id);
        assert!(!registry.has_subscribers("room"));
    }

    #[test]
    fn test_registry_stats() {
        let registry = Registry::new();
        let a = ClientId::new("a");
        let b = ClientId::new("b");

        registry.get("one").subscribe(&a, Filter::All, |_| Ok(())).unwrap();
        registry.get("one").subscribe(&b, "x".into(), |_| Ok(())).unwrap();
        registry.get("two").presence_enter(&a, json!("here")).unwrap();
        registry.get("two").publish(Some(&a), None, json!(1)).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.total_subscriptions, 2);
        assert_eq!(stats.presence_members, 1);
        assert_eq!(stats.logged_messages, 1);
    }

    #[test]
    fn test_registry_owns_one_connection() {
        let registry = Registry::new();
        assert!(Arc::ptr_eq(&registry.connection(), &registry.connection()));
        registry.connection().fail(ErrorInfo::new("down")).unwrap();
        assert_eq!(
            registry.connection().state(),
            crate::ConnectionState::Failed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_first_subscribers_attach_once() {
        let registry = Arc::new(Registry::new());
        let channel = registry.get("shared");
        let changes = Arc::new(StdMutex::new(Vec::new()));
        let c = Arc::clone(&changes);
        channel.on(Filter::All, move |change| {
            c.lock().unwrap().push((change.previous, change.current));
            Ok(())
        });

        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                registry
                    .get("shared")
                    .subscribe(&ClientId::new(format!("client-{i}")), Filter::All, |_| Ok(()))
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(channel.state(), ChannelState::Attached);
        assert_eq!(channel.subscriber_count(), 8);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                (ChannelState::Initialized, ChannelState::Attaching),
                (ChannelState::Attaching, ChannelState::Attached),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_on_independent_channels() {
        let registry = Arc::new(Registry::new());
        let counts: Vec<Arc<StdMutex<usize>>> =
            (0..4).map(|_| Arc::new(StdMutex::new(0))).collect();

        for (i, count) in counts.iter().enumerate() {
            let count = Arc::clone(count);
            registry
                .get(format!("room-{i}"))
                .subscribe(&ClientId::new("watcher"), Filter::All, move |_| {
                    *count.lock().unwrap() += 1;
                    Ok(())
                })
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..4 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let publisher = ClientId::new(format!("pub-{i}"));
                for n in 0..100 {
                    registry
                        .get(format!("room-{i}"))
                        .publish(Some(&publisher), None, json!(n))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for (i, count) in counts.iter().enumerate() {
            assert_eq!(*count.lock().unwrap(), 100);
            let data: Vec<i64> = registry
                .get(format!("room-{i}"))
                .messages()
                .iter()
                .filter_map(|m| m.data.as_i64())
                .collect();
            assert_eq!(data, (0..100).collect::<Vec<_>>());
        }
    }
}
