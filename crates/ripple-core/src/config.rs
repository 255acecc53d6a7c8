//! Broker configuration.

use serde::{Deserialize, Serialize};

/// How a dispatcher reacts when a listener returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerErrorPolicy {
    /// Stop delivery and return the error to the caller that triggered it.
    #[default]
    Propagate,
    /// Log the failure and keep delivering to the remaining listeners.
    Isolate,
}

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum number of channels `Registry::try_get` will create.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Maximum number of messages kept in each channel's log.
    /// `None` keeps every message.
    #[serde(default)]
    pub message_log_limit: Option<usize>,

    /// Listener failure handling.
    #[serde(default)]
    pub listener_errors: ListenerErrorPolicy,
}

fn default_max_channels() -> usize {
    10_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            message_log_limit: None,
            listener_errors: ListenerErrorPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.max_channels, 10_000);
        assert!(config.message_log_limit.is_none());
        assert_eq!(config.listener_errors, ListenerErrorPolicy::Propagate);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            message_log_limit = 100
            listener_errors = "isolate"
        "#;

        let config: BrokerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_channels, 10_000);
        assert_eq!(config.message_log_limit, Some(100));
        assert_eq!(config.listener_errors, ListenerErrorPolicy::Isolate);
    }
}
