//! Scenario files.
//!
//! A scenario declares a set of clients and an ordered list of steps, each
//! performed by one client against one channel (or the shared connection):
//!
//! ```toml
//! channels = ["room"]
//!
//! [[clients]]
//! id = "alice"
//!
//! [[clients]]
//! id = "bob"
//!
//! [[steps]]
//! client = "alice"
//! op = "subscribe"
//! channel = "room"
//!
//! [[steps]]
//! client = "bob"
//! op = "publish"
//! channel = "room"
//! data = { text = "message text" }
//! ```

use anyhow::{bail, Context, Result};
use ripple_core::PresenceAction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// A parsed scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Channels created before the first step.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Participating clients.
    #[serde(default)]
    pub clients: Vec<ClientSpec>,

    /// Steps, run in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A participating client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSpec {
    /// Client id.
    pub id: String,

    /// Whether the client is bound to the registry. Unbound clients fail
    /// every channel operation.
    #[serde(default = "default_true")]
    pub connected: bool,
}

fn default_true() -> bool {
    true
}

/// Step operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Subscribe,
    Unsubscribe,
    Publish,
    PublishBatch,
    Enter,
    Update,
    Leave,
    WatchPresence,
    UnwatchPresence,
    WatchChannel,
    Attach,
    Detach,
    Suspend,
    Fail,
    WatchConnection,
    Connect,
    Disconnect,
    Close,
    FailConnection,
}

impl Op {
    /// Whether the step addresses a channel.
    #[must_use]
    pub fn needs_channel(self) -> bool {
        !matches!(
            self,
            Op::WatchConnection | Op::Connect | Op::Disconnect | Op::Close | Op::FailConnection
        )
    }
}

/// A single scenario step.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// The acting client.
    pub client: String,

    /// What to do.
    pub op: Op,

    /// Target channel.
    #[serde(default)]
    pub channel: Option<String>,

    /// Event name for publish, or the event to unsubscribe from.
    #[serde(default)]
    pub event: Option<String>,

    /// Event names for subscribe. Empty subscribes to everything.
    #[serde(default)]
    pub events: Vec<String>,

    /// Payload for publish and presence operations.
    #[serde(default)]
    pub data: Option<Value>,

    /// Payloads for `publish_batch`.
    #[serde(default)]
    pub items: Vec<Value>,

    /// Presence action for presence watches. Absent watches every action.
    #[serde(default)]
    pub action: Option<PresenceAction>,

    /// State names for state watches. Empty watches every change.
    #[serde(default)]
    pub states: Vec<String>,

    /// Reason message for failure-driven transitions.
    #[serde(default)]
    pub reason: Option<String>,

    /// The step is expected to fail.
    #[serde(default)]
    pub expect_error: bool,
}

impl Scenario {
    /// Parse a scenario from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the scenario is
    /// inconsistent.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(contents).context("Failed to parse scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("In scenario {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for client in &self.clients {
            if !ids.insert(client.id.as_str()) {
                bail!("Duplicate client id: {}", client.id);
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            if !ids.contains(step.client.as_str()) {
                bail!("Step {number}: unknown client {}", step.client);
            }
            if step.op.needs_channel() && step.channel.is_none() {
                bail!("Step {number}: {:?} needs a channel", step.op);
            }
        }
        Ok(())
    }
}
