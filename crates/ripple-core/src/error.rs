//! Error types for the broker core.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A client facade was used before being bound to a registry.
    #[error("Client {client_id} is not connected to a registry; call connect_to() first")]
    NotConfigured {
        /// The unbound client.
        client_id: String,
    },

    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Maximum number of channels reached.
    #[error("Maximum channels reached ({0})")]
    MaxChannelsReached(usize),

    /// A state name that matches no known state.
    #[error("Unknown state: {0}")]
    UnknownState(String),

    /// Operation is not permitted in the channel's current state.
    #[error("Cannot {operation} on channel {channel} while {state}")]
    InvalidState {
        /// Channel name.
        channel: String,
        /// The state the channel was in.
        state: String,
        /// The rejected operation.
        operation: &'static str,
    },

    /// A state machine was asked to make a move it does not allow.
    #[error("Invalid transition on {target}: {from} -> {to}")]
    InvalidTransition {
        /// Channel name, or `connection`.
        target: String,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// A listener returned an error during dispatch.
    #[error("Listener failed on {target}: {source}")]
    Listener {
        /// Channel name, or `connection`.
        target: String,
        /// The error returned by the listener.
        #[source]
        source: ListenerError,
    },
}

impl BrokerError {
    pub(crate) fn listener(target: impl Into<String>, source: ListenerError) -> Self {
        Self::Listener {
            target: target.into(),
            source,
        }
    }
}

/// An error returned by a subscriber callback.
pub struct ListenerError(Box<dyn StdError + Send + Sync>);

impl ListenerError {
    /// Wrap any error, or a message, as a listener error.
    pub fn new(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self(error.into())
    }

    /// The wrapped error.
    #[must_use]
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for ListenerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// What every listener callback returns.
pub type ListenerResult = Result<(), ListenerError>;
