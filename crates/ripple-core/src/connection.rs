//! Connection state.
//!
//! There is no transport behind the broker, so the connection is purely a
//! state machine that client code can observe and tests can drive.

use crate::config::ListenerErrorPolicy;
use crate::dispatcher::{Filter, ListenerId};
use crate::error::{BrokerError, ListenerResult};
use crate::state::{ErrorInfo, State, StateChange, StateEmitter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Every connection state.
    pub const ALL: [ConnectionState; 8] = [
        ConnectionState::Initialized,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::Suspended,
        ConnectionState::Closing,
        ConnectionState::Closed,
        ConnectionState::Failed,
    ];

    /// Lowercase state name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Suspended => "suspended",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}

impl FromStr for ConnectionState {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| BrokerError::UnknownState(s.to_string()))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl State for ConnectionState {
    fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        match next {
            Initialized => false,
            Connecting => matches!(self, Initialized | Disconnected | Suspended | Closed | Failed),
            Connected => self == Connecting,
            Disconnected => matches!(self, Connecting | Connected),
            Suspended => matches!(self, Connecting | Connected | Disconnected),
            Closing => matches!(self, Connecting | Connected | Disconnected | Suspended),
            Closed => matches!(self, Initialized | Closing),
            Failed => !matches!(self, Closed | Failed),
        }
    }
}

/// The broker-wide connection.
#[derive(Debug)]
pub struct Connection {
    state: StateEmitter<ConnectionState>,
}

impl Connection {
    /// Create a connection in `initialized`.
    #[must_use]
    pub fn new(policy: ListenerErrorPolicy) -> Self {
        Self {
            state: StateEmitter::new("connection", ConnectionState::Initialized, policy),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Listen for state changes whose new state matches `filter`.
    pub fn on<F>(&self, filter: Filter<ConnectionState>, listener: F) -> ListenerId
    where
        F: Fn(&StateChange<ConnectionState>) -> ListenerResult + Send + Sync + 'static,
    {
        self.state.on(filter, listener)
    }

    /// Remove a state listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.state.off(id)
    }

    /// Move to `next`, notifying listeners.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidTransition`] for moves the connection
    /// state machine does not allow, or a listener error.
    pub fn transition(
        &self,
        next: ConnectionState,
        reason: Option<ErrorInfo>,
    ) -> Result<StateChange<ConnectionState>, BrokerError> {
        self.state.transition(next, reason)
    }

    /// `connecting` then `connected`. Does nothing when already connected.
    ///
    /// # Errors
    ///
    /// Fails while closing, or with a listener error.
    pub fn connect(&self) -> Result<(), BrokerError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.transition(ConnectionState::Connecting, None)?;
        self.transition(ConnectionState::Connected, None)?;
        Ok(())
    }

    /// `closing` then `closed`. Does nothing when already closed.
    ///
    /// # Errors
    ///
    /// Fails on a failed connection, or with a listener error.
    pub fn close(&self) -> Result<(), BrokerError> {
        match self.state() {
            ConnectionState::Closed => Ok(()),
            ConnectionState::Initialized => {
                self.transition(ConnectionState::Closed, None)?;
                Ok(())
            }
            _ => {
                self.transition(ConnectionState::Closing, None)?;
                self.transition(ConnectionState::Closed, None)?;
                Ok(())
            }
        }
    }

    /// Drop to `disconnected`.
    ///
    /// # Errors
    ///
    /// Fails unless connecting or connected, or with a listener error.
    pub fn disconnect(
        &self,
        reason: ErrorInfo,
    ) -> Result<StateChange<ConnectionState>, BrokerError> {
        self.transition(ConnectionState::Disconnected, Some(reason))
    }

    /// Move to `suspended`.
    ///
    /// # Errors
    ///
    /// Fails from states that cannot be suspended, or with a listener error.
    pub fn suspend(&self, reason: ErrorInfo) -> Result<StateChange<ConnectionState>, BrokerError> {
        self.transition(ConnectionState::Suspended, Some(reason))
    }

    /// Move to `failed`.
    ///
    /// # Errors
    ///
    /// Fails if already failed or closed, or with a listener error.
    pub fn fail(&self, reason: ErrorInfo) -> Result<StateChange<ConnectionState>, BrokerError> {
        self.transition(ConnectionState::Failed, Some(reason))
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(ListenerErrorPolicy::default())
    }
}
