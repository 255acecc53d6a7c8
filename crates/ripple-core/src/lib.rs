//! # ripple-core
//!
//! An in-memory realtime broker for exercising client code without a network.
//!
//! This crate provides the building blocks a realtime client binding talks to:
//!
//! - **Registry** - Lazily created, shared channels addressed by name
//! - **Channel** - Event-filtered pub/sub with a state machine and message log
//! - **Presence** - Which clients are in a channel, and their status payload
//! - **Connection** - Process-wide connection state notifications
//! - **Client** - Per-client handles that tag every operation with a client id
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Client    │────▶│  Registry   │────▶│   Channel   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │ Connection  │     │  Presence   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! Channel events, presence events and state changes are all delivered by the
//! same [`Dispatcher`]: listeners fire synchronously, in registration order,
//! over a snapshot taken before the first callback runs.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use ripple_core::{Client, Filter, Registry};
//!
//! let registry = Arc::new(Registry::new());
//! let alice = Client::new().connect_to(registry.clone());
//! let bob = Client::new().connect_to(registry);
//!
//! let channel = alice.channels()?.get("blah");
//! channel.subscribe(Filter::All, |message| {
//!     assert_eq!(message.data["text"], "message text");
//!     Ok(())
//! })?;
//!
//! let delivered = bob
//!     .channels()?
//!     .get("blah")
//!     .publish(serde_json::json!({ "text": "message text" }))?;
//! assert_eq!(delivered, 1);
//! # Ok::<(), ripple_core::BrokerError>(())
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod state;

pub use channel::{Channel, ChannelId, ChannelOptions, ChannelState};
pub use client::{ChannelHandle, Client, ClientChannels, PresenceHandle};
pub use config::{BrokerConfig, ListenerErrorPolicy};
pub use connection::{Connection, ConnectionState};
pub use dispatcher::{DispatchReport, Dispatcher, Filter, ListenerId};
pub use error::{BrokerError, ListenerError, ListenerResult};
pub use identity::ClientId;
pub use message::Message;
pub use presence::{Presence, PresenceAction, PresenceMember, PresenceMessage};
pub use registry::{BrokerStats, ChannelTarget, Registry};
pub use state::{ErrorInfo, State, StateChange, StateEmitter};
