//! Keyed listener dispatch.
//!
//! A [`Dispatcher`] is an ordered list of `(owner, filter, callback)` entries.
//! Channel events, presence events and state changes all register and deliver
//! through it:
//!
//! - entries fire in registration order;
//! - the matching entries are copied out under the lock and invoked after it
//!   is released, so a callback may subscribe, unsubscribe or publish without
//!   deadlocking and without disturbing the pass already in progress.

use crate::config::ListenerErrorPolicy;
use crate::error::{BrokerError, ListenerResult};
use crate::identity::ClientId;
use crate::metrics;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned on registration, used to remove a single listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Which keys a listener is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter<K> {
    /// Every event, named or not.
    All,
    /// Only events with this key.
    One(K),
    /// Events with any of these keys.
    Any(Vec<K>),
}

impl<K: PartialEq> Filter<K> {
    /// Check whether an event with the given key should reach this listener.
    ///
    /// Unkeyed events (`None`) only match [`Filter::All`].
    #[must_use]
    pub fn matches(&self, key: Option<&K>) -> bool {
        match (self, key) {
            (Filter::All, _) => true,
            (Filter::One(k), Some(key)) => k == key,
            (Filter::Any(keys), Some(key)) => keys.contains(key),
            _ => false,
        }
    }

    /// Drop `key` from the filter. Returns `true` if nothing is left.
    fn remove_key(&mut self, key: &K) -> bool {
        match self {
            Filter::All => false,
            Filter::One(k) => k == key,
            Filter::Any(keys) => {
                keys.retain(|k| k != key);
                keys.is_empty()
            }
        }
    }
}

impl<K> Default for Filter<K> {
    fn default() -> Self {
        Filter::All
    }
}

impl Filter<String> {
    /// Treat the empty event name as the wildcard.
    ///
    /// `One("")` and any `Any` containing `""` become [`Filter::All`], as
    /// does an empty `Any`.
    #[must_use]
    pub fn normalize_events(self) -> Self {
        match self {
            Filter::One(key) if key.is_empty() => Filter::All,
            Filter::Any(keys) if keys.is_empty() || keys.iter().any(String::is_empty) => {
                Filter::All
            }
            filter => filter,
        }
    }
}

impl From<&str> for Filter<String> {
    fn from(key: &str) -> Self {
        Filter::from(key.to_string())
    }
}

impl From<String> for Filter<String> {
    fn from(key: String) -> Self {
        Filter::One(key).normalize_events()
    }
}

impl From<Vec<&str>> for Filter<String> {
    fn from(keys: Vec<&str>) -> Self {
        Filter::Any(keys.into_iter().map(str::to_string).collect()).normalize_events()
    }
}

impl<K> From<Option<K>> for Filter<K> {
    fn from(key: Option<K>) -> Self {
        key.map_or(Filter::All, Filter::One)
    }
}

/// A listener callback.
pub type Callback<E> = Arc<dyn Fn(&E) -> ListenerResult + Send + Sync>;

struct Entry<K, E> {
    id: ListenerId,
    owner: Option<ClientId>,
    filter: Filter<K>,
    callback: Callback<E>,
}

/// Outcome of a single dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that were called.
    pub invoked: usize,
    /// Listeners that returned an error (only non-zero when isolating).
    pub failed: usize,
}

/// An ordered, filtered listener list.
pub struct Dispatcher<K, E> {
    /// Used in logs and errors: channel name or `connection`.
    target: String,
    policy: ListenerErrorPolicy,
    entries: Mutex<Vec<Entry<K, E>>>,
}

impl<K, E> Dispatcher<K, E>
where
    K: Clone + PartialEq + fmt::Debug,
{
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new(target: impl Into<String>, policy: ListenerErrorPolicy) -> Self {
        Self {
            target: target.into(),
            policy,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener.
    pub fn add<F>(&self, owner: Option<ClientId>, filter: Filter<K>, callback: F) -> ListenerId
    where
        F: Fn(&E) -> ListenerResult + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.entries.lock().push(Entry {
            id,
            owner,
            filter,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a single listener. Returns `true` if it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Remove an owner's listeners.
    ///
    /// With `key`, only that key is dropped from the owner's filters; entries
    /// left with nothing to match are removed and wildcard entries are kept.
    /// Without `key`, every listener the owner registered is removed.
    ///
    /// Returns the number of entries removed.
    pub fn remove_owner(&self, owner: &ClientId, key: Option<&K>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain_mut(|e| {
            if e.owner.as_ref() != Some(owner) {
                return true;
            }
            match key {
                Some(key) => !e.filter.remove_key(key),
                None => false,
            }
        });
        before - entries.len()
    }

    /// Remove an owner's [`Filter::All`] listeners.
    ///
    /// Returns the number of entries removed.
    pub fn remove_owner_wildcards(&self, owner: &ClientId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !(e.owner.as_ref() == Some(owner) && matches!(e.filter, Filter::All)));
        before - entries.len()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of listeners registered by `owner`.
    #[must_use]
    pub fn owner_len(&self, owner: &ClientId) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.owner.as_ref() == Some(owner))
            .count()
    }

    /// Copy out the callbacks that match `key`, in registration order.
    #[must_use]
    pub fn snapshot(&self, key: Option<&K>) -> Vec<(ListenerId, Callback<E>)> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.filter.matches(key))
            .map(|e| (e.id, Arc::clone(&e.callback)))
            .collect()
    }

    /// Deliver `event` to every listener matching `key`.
    ///
    /// # Errors
    ///
    /// With [`ListenerErrorPolicy::Propagate`], the first listener error stops
    /// the pass and is returned. With [`ListenerErrorPolicy::Isolate`] errors
    /// are logged and counted in the report instead.
    pub fn dispatch(&self, key: Option<&K>, event: &E) -> Result<DispatchReport, BrokerError> {
        let listeners = self.snapshot(key);
        let mut report = DispatchReport::default();

        trace!(target_name = %self.target, key = ?key, listeners = listeners.len(), "Dispatching");

        for (id, callback) in listeners {
            report.invoked += 1;
            if let Err(err) = callback(event) {
                metrics::record_listener_error();
                match self.policy {
                    ListenerErrorPolicy::Propagate => {
                        return Err(BrokerError::listener(self.target.clone(), err));
                    }
                    ListenerErrorPolicy::Isolate => {
                        warn!(target_name = %self.target, listener = %id, error = %err, "Listener failed");
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}

impl<K, E> fmt::Debug for Dispatcher<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("listeners", &self.entries.lock().len())
            .finish()
    }
}
