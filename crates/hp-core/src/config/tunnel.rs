//! Tunnel client configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;
use crate::types::{BrokerAddress, Forward};

/// Top-level configuration file for the tunnel client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Broker connection settings
    #[serde(default)]
    pub ssh_server: SshServerConfig,

    /// Reconnect backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Ordered list of reverse forwards
    #[serde(default)]
    pub forwards: Vec<Forward>,
}

/// Connection settings for the remote broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshServerConfig {
    /// Broker address.
    ///
    /// `host:port` dials a plain TCP stream; `ws://` or `wss://` URLs tunnel
    /// the SSH session through a WebSocket.
    pub address: String,

    /// Username for SSH authentication
    pub username: String,

    /// Path to the private key used for authentication
    pub private_key_file_path: PathBuf,

    /// Dial timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// TCP keep-alive interval on the broker connection
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,
}

impl Default for SshServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: whoami::username(),
            private_key_file_path: super::default_config_dir().join("id_ed25519"),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(rename = "initial_ms", with = "duration_millis")]
    pub initial: Duration,

    /// Upper bound on any single delay
    #[serde(rename = "max_ms", with = "duration_millis")]
    pub max: Duration,

    /// Give up after this many failed cycles (unset or 0: never)
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(2000),
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    /// Attempt limit, treating 0 the same as unset
    pub fn attempt_limit(&self) -> Option<u32> {
        self.max_attempts.filter(|n| *n > 0)
    }
}

impl TunnelConfig {
    /// Parse the configured broker address
    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        self.ssh_server.address.parse()
    }

    /// Check everything that would otherwise only fail after connecting
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_address()?;

        if self.ssh_server.username.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh_server.username".to_string()));
        }
        if self.ssh_server.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "ssh_server.connect_timeout must be positive".to_string(),
            ));
        }
        if self.forwards.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[forwards]] entry is required".to_string(),
            ));
        }
        for forward in &self.forwards {
            if forward.local.host.is_empty() || forward.remote.host.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "forward {} has an empty host",
                    forward
                )));
            }
        }
        if self.backoff.initial.is_zero() {
            return Err(ConfigError::Invalid(
                "backoff.initial_ms must be positive".to_string(),
            ));
        }
        if self.backoff.max < self.backoff.initial {
            return Err(ConfigError::Invalid(
                "backoff.max_ms must not be below backoff.initial_ms".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endpoint;

    const SAMPLE: &str = r#"
[ssh_server]
address = "ws://broker.example.com/_ssh"
username = "holepunch"
private_key_file_path = "/etc/holepunch/id_ed25519"
connect_timeout = 5

[backoff]
initial_ms = 50
max_ms = 1000

[[forwards]]
local = { host = "127.0.0.1", port = 80 }
remote = { host = "0.0.0.0", port = 8080 }

[[forwards]]
local = { host = "127.0.0.1", port = 22 }
remote = { host = "0.0.0.0", port = 2222 }
"#;

    #[test]
    fn test_parse_sample() {
        let config: TunnelConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.ssh_server.username, "holepunch");
        assert_eq!(config.ssh_server.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.ssh_server.keepalive_interval, Duration::from_secs(15));
        assert_eq!(config.backoff.initial, Duration::from_millis(50));
        assert_eq!(config.backoff.max, Duration::from_millis(1000));
        assert_eq!(config.backoff.attempt_limit(), None);
        assert_eq!(config.forwards.len(), 2);
        assert_eq!(config.forwards[1].remote, Endpoint::new("0.0.0.0", 2222));
        assert!(config.broker_address().unwrap().is_websocket());
        config.validate().unwrap();
    }

    #[test]
    fn test_backoff_defaults() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.initial, Duration::from_millis(100));
        assert_eq!(backoff.max, Duration::from_millis(2000));
        assert_eq!(backoff.attempt_limit(), None);
    }

    #[test]
    fn test_zero_attempts_means_unlimited() {
        let backoff = BackoffConfig {
            max_attempts: Some(0),
            ..BackoffConfig::default()
        };
        assert_eq!(backoff.attempt_limit(), None);
    }

    #[test]
    fn test_duplicate_forwards_are_kept() {
        let mut config: TunnelConfig = toml::from_str(SAMPLE).unwrap();
        let first = config.forwards[0].clone();
        config.forwards.push(first.clone());
        config.validate().unwrap();
        assert_eq!(config.forwards.len(), 3);
        assert_eq!(config.forwards[2], first);
    }

    #[test]
    fn test_validate_rejects_missing_forwards() {
        let mut config: TunnelConfig = toml::from_str(SAMPLE).unwrap();
        config.forwards.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let mut config: TunnelConfig = toml::from_str(SAMPLE).unwrap();
        config.ssh_server.address = "broker-without-port".to_string();
        assert!(config.validate().is_err());

        config.ssh_server.address = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config: TunnelConfig = toml::from_str(SAMPLE).unwrap();
        config.backoff.max = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }
}
