//! Scenario execution.
//!
//! Every scenario client is bound to one shared [`Registry`]. Steps run in
//! order; whatever each client's listeners observe is recorded in its inbox
//! and returned in the final [`Report`].

use crate::scenario::{Op, Scenario, Step};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use ripple_core::{
    BrokerConfig, BrokerError, BrokerStats, ChannelState, Client, ConnectionState, ErrorInfo,
    Filter, Message, PresenceMember, PresenceMessage, Registry, StateChange,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Reason attached to failure-driven transitions when a step names none.
const DEFAULT_REASON: &str = "scenario";

/// What one client observed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inbox {
    /// Messages delivered to the client's subscriptions.
    pub messages: Vec<Message>,
    /// Presence events delivered to the client's watches.
    pub presence: Vec<PresenceMessage>,
    /// Channel state changes, tagged with the channel name.
    pub channel_states: Vec<ChannelStateEvent>,
    /// Connection state changes.
    pub connection_states: Vec<StateChange<ConnectionState>>,
}

/// A channel state change seen by a client.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStateEvent {
    pub channel: String,
    #[serde(flatten)]
    pub change: StateChange<ChannelState>,
}

/// Final state of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub state: ChannelState,
    pub members: Vec<PresenceMember>,
    pub subscribers: usize,
    pub message_count: usize,
}

/// A step that failed as expected.
#[derive(Debug, Clone, Serialize)]
pub struct ExpectedError {
    pub step: usize,
    pub op: Op,
    pub error: String,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub clients: BTreeMap<String, Inbox>,
    pub channels: BTreeMap<String, ChannelReport>,
    pub connection: ConnectionState,
    pub stats: BrokerStats,
    pub expected_errors: Vec<ExpectedError>,
}

struct Participant {
    client: Client,
    inbox: Arc<Mutex<Inbox>>,
}

/// Runs scenarios against a fresh registry.
pub struct Runner {
    registry: Arc<Registry>,
    participants: BTreeMap<String, Participant>,
    steps: Vec<Step>,
}

impl Runner {
    /// Build the registry and the scenario's clients.
    #[must_use]
    pub fn new(config: BrokerConfig, scenario: Scenario) -> Self {
        let registry = Arc::new(Registry::with_channels(config, scenario.channels.iter().cloned()));

        let participants = scenario
            .clients
            .iter()
            .map(|spec| {
                let mut client = Client::with_client_id(spec.id.as_str());
                if spec.connected {
                    client = client.connect_to(Arc::clone(&registry));
                }
                let participant = Participant {
                    client,
                    inbox: Arc::new(Mutex::new(Inbox::default())),
                };
                (spec.id.clone(), participant)
            })
            .collect();

        Self {
            registry,
            participants,
            steps: scenario.steps,
        }
    }

    /// Run every step, then collect the report.
    ///
    /// # Errors
    ///
    /// Fails on the first step whose outcome differs from its `expect_error`.
    pub fn run(&self) -> Result<Report> {
        let mut expected_errors = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            debug!(step = number, client = %step.client, op = ?step.op, "Running step");

            match (self.execute(step), step.expect_error) {
                (Ok(()), false) => {}
                (Err(e), true) => {
                    info!(step = number, op = ?step.op, error = %e, "Step failed as expected");
                    expected_errors.push(ExpectedError {
                        step: number,
                        op: step.op,
                        error: format!("{e:#}"),
                    });
                }
                (Ok(()), true) => {
                    bail!("Step {number}: {:?} succeeded but an error was expected", step.op)
                }
                (Err(e), false) => {
                    return Err(e.context(format!("Step {number}: {:?} failed", step.op)));
                }
            }
        }

        info!(steps = self.steps.len(), "Scenario complete");
        Ok(self.report(expected_errors))
    }

    fn participant(&self, id: &str) -> Result<&Participant> {
        self.participants
            .get(id)
            .with_context(|| format!("Unknown client {id}"))
    }

    fn execute(&self, step: &Step) -> Result<()> {
        let participant = self.participant(&step.client)?;
        let client = &participant.client;

        match step.op {
            Op::WatchConnection => {
                let filter = state_filter::<ConnectionState>(&step.states)?;
                let inbox = Arc::clone(&participant.inbox);
                client.connection()?.on(filter, move |change| {
                    inbox.lock().connection_states.push(change.clone());
                    Ok(())
                });
            }
            Op::Connect => client.connection()?.connect()?,
            Op::Disconnect => {
                client.connection()?.disconnect(reason(step))?;
            }
            Op::Close => client.connection()?.close()?,
            Op::FailConnection => {
                client.connection()?.fail(reason(step))?;
            }
            _ => self.execute_on_channel(participant, step)?,
        }
        Ok(())
    }

    fn execute_on_channel(&self, participant: &Participant, step: &Step) -> Result<()> {
        let name = step.channel.as_deref().context("Step needs a channel")?;
        let handle = participant.client.channels()?.try_get(name)?;
        let data = || step.data.clone().unwrap_or(Value::Null);

        match step.op {
            Op::Subscribe => {
                let inbox = Arc::clone(&participant.inbox);
                handle.subscribe(filter_of(step.events.clone()), move |message| {
                    inbox.lock().messages.push(message.clone());
                    Ok(())
                })?;
            }
            Op::Unsubscribe => {
                let removed = handle.unsubscribe(step.event.as_deref());
                debug!(channel = name, removed, "Unsubscribed");
            }
            Op::Publish => {
                let delivered = match step.event.as_deref() {
                    Some(event) => handle.publish_event(event, data())?,
                    None => handle.publish(data())?,
                };
                debug!(channel = name, delivered, "Published");
            }
            Op::PublishBatch => {
                handle.publish_batch(step.event.as_deref(), step.items.clone())?;
            }
            Op::Enter => {
                handle.presence().enter(data())?;
            }
            Op::Update => {
                handle.presence().update(data())?;
            }
            Op::Leave => {
                handle.presence().leave(step.data.clone())?;
            }
            Op::WatchPresence => {
                let inbox = Arc::clone(&participant.inbox);
                handle.presence().subscribe(Filter::from(step.action), move |event| {
                    inbox.lock().presence.push(event.clone());
                    Ok(())
                });
            }
            Op::UnwatchPresence => {
                handle.presence().unsubscribe(step.action);
            }
            Op::WatchChannel => {
                let filter = state_filter::<ChannelState>(&step.states)?;
                let inbox = Arc::clone(&participant.inbox);
                let channel = name.to_string();
                handle.on(filter, move |change| {
                    inbox.lock().channel_states.push(ChannelStateEvent {
                        channel: channel.clone(),
                        change: change.clone(),
                    });
                    Ok(())
                });
            }
            Op::Attach => handle.attach()?,
            Op::Detach => handle.detach()?,
            Op::Suspend => {
                handle.channel().suspend(reason(step))?;
            }
            Op::Fail => {
                handle.channel().fail(reason(step))?;
            }
            Op::WatchConnection | Op::Connect | Op::Disconnect | Op::Close | Op::FailConnection => {
                bail!("{:?} does not address a channel", step.op)
            }
        }
        Ok(())
    }

    fn report(&self, expected_errors: Vec<ExpectedError>) -> Report {
        let clients = self
            .participants
            .iter()
            .map(|(id, participant)| (id.clone(), participant.inbox.lock().clone()))
            .collect();

        let channels = self
            .registry
            .channel_names()
            .into_iter()
            .map(|name| {
                let channel = self.registry.get(name.as_str());
                let report = ChannelReport {
                    state: channel.state(),
                    members: channel.presence().get(),
                    subscribers: channel.subscriber_count(),
                    message_count: channel.message_count(),
                };
                (name, report)
            })
            .collect();

        Report {
            clients,
            channels,
            connection: self.registry.connection().state(),
            stats: self.registry.stats(),
            expected_errors,
        }
    }
}

fn reason(step: &Step) -> ErrorInfo {
    ErrorInfo::new(step.reason.as_deref().unwrap_or(DEFAULT_REASON))
}

fn filter_of<K>(mut keys: Vec<K>) -> Filter<K> {
    match keys.len() {
        0 => Filter::All,
        1 => keys.pop().map_or(Filter::All, Filter::One),
        _ => Filter::Any(keys),
    }
}

fn state_filter<S>(names: &[String]) -> Result<Filter<S>>
where
    S: FromStr<Err = BrokerError>,
{
    let states = names
        .iter()
        .map(|name| name.parse::<S>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(filter_of(states))
}
