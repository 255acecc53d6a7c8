//! State-change notifications shared by channels and the connection.

use crate::config::ListenerErrorPolicy;
use crate::dispatcher::{DispatchReport, Dispatcher, Filter, ListenerId};
use crate::error::{BrokerError, ListenerResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use tracing::debug;

/// A state in one of the broker's state machines.
pub trait State:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Whether the machine may move from `self` to `next`.
    fn can_transition_to(self, next: Self) -> bool;
}

/// Error details attached to a failure-driven state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable description.
    pub message: String,
    /// Application error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    /// HTTP-style status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ErrorInfo {
    /// Create error details with just a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status_code: None,
        }
    }

    /// Attach an error code.
    #[must_use]
    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a status code.
    #[must_use]
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A state transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange<S> {
    /// The new state.
    pub current: S,
    /// The state before the change.
    pub previous: S,
    /// Why the change happened, for failure-driven or update transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorInfo>,
}

impl<S: State> StateChange<S> {
    /// Create a state change.
    #[must_use]
    pub fn new(previous: S, current: S, reason: Option<ErrorInfo>) -> Self {
        Self {
            current,
            previous,
            reason,
        }
    }

    /// A same-state refresh, such as an attached channel whose options changed.
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.current == self.previous
    }
}

/// Holds a current state and notifies listeners as it changes.
///
/// Listener filters are compared against the new (`current`) state only.
pub struct StateEmitter<S: State> {
    target: String,
    current: Mutex<S>,
    listeners: Dispatcher<S, StateChange<S>>,
}

impl<S: State> StateEmitter<S> {
    /// Create an emitter starting in `initial`.
    #[must_use]
    pub fn new(target: impl Into<String>, initial: S, policy: ListenerErrorPolicy) -> Self {
        let target = target.into();
        Self {
            listeners: Dispatcher::new(target.clone(), policy),
            target,
            current: Mutex::new(initial),
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> S {
        *self.current.lock()
    }

    /// Register a listener. `Filter::All` sees every change.
    pub fn on<F>(&self, filter: Filter<S>, listener: F) -> ListenerId
    where
        F: Fn(&StateChange<S>) -> ListenerResult + Send + Sync + 'static,
    {
        self.listeners.add(None, filter, listener)
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Record `change` as the current state and notify matching listeners.
    ///
    /// No transition rules are checked; see [`StateEmitter::transition`].
    ///
    /// # Errors
    ///
    /// Returns a listener error when the dispatch policy propagates failures.
    pub fn emit(&self, change: StateChange<S>) -> Result<DispatchReport, BrokerError> {
        *self.current.lock() = change.current;
        self.notify(&change)
    }

    /// Move to `next` if the state machine allows it, then notify listeners.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidTransition`] if the move is not allowed
    /// (the state is left unchanged), or a listener error.
    pub fn transition(
        &self,
        next: S,
        reason: Option<ErrorInfo>,
    ) -> Result<StateChange<S>, BrokerError> {
        let change = {
            let mut current = self.current.lock();
            if !current.can_transition_to(next) {
                return Err(BrokerError::InvalidTransition {
                    target: self.target.clone(),
                    from: current.to_string(),
                    to: next.to_string(),
                });
            }
            let previous = std::mem::replace(&mut *current, next);
            StateChange::new(previous, next, reason)
        };
        self.notify(&change)?;
        Ok(change)
    }

    fn notify(&self, change: &StateChange<S>) -> Result<DispatchReport, BrokerError> {
        debug!(
            target_name = %self.target,
            previous = %change.previous,
            current = %change.current,
            reason = ?change.reason.as_ref().map(|r| r.message.as_str()),
            "State change"
        );
        self.listeners.dispatch(Some(&change.current), change)
    }
}

impl<S: State> fmt::Debug for StateEmitter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateEmitter")
            .field("target", &self.target)
            .field("current", &self.state())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
