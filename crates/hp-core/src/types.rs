//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::ConfigError;

/// A network endpoint, formatted as `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bare IPv6 literals need brackets to stay parseable
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A reverse forward: connections accepted on `remote` are relayed to `local`
///
/// Forwards are never deduplicated. Configuring the same remote endpoint
/// twice produces two independent listen requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    /// Locally reachable service
    pub local: Endpoint,
    /// Endpoint the broker listens on
    pub remote: Endpoint,
}

impl fmt::Display for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.remote, self.local)
    }
}

/// Address of the remote broker, selecting the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAddress {
    /// Plain TCP byte stream
    Tcp { host: String, port: u16 },
    /// Message-oriented WebSocket (`ws://` or `wss://`)
    WebSocket(Url),
}

impl BrokerAddress {
    /// Hostname used for host identity handling
    pub fn hostname(&self) -> &str {
        match self {
            BrokerAddress::Tcp { host, .. } => host,
            BrokerAddress::WebSocket(url) => url.host_str().unwrap_or_default(),
        }
    }

    /// Whether this address selects the WebSocket transport
    pub fn is_websocket(&self) -> bool {
        matches!(self, BrokerAddress::WebSocket(_))
    }
}

impl FromStr for BrokerAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::MissingField("ssh_server.address".to_string()));
        }

        if s.starts_with("ws://") || s.starts_with("wss://") {
            let url = Url::parse(s)
                .map_err(|e| ConfigError::Invalid(format!("broker address {:?}: {}", s, e)))?;
            if url.host_str().map_or(true, str::is_empty) {
                return Err(ConfigError::Invalid(format!(
                    "broker address {:?} has no host",
                    s
                )));
            }
            return Ok(BrokerAddress::WebSocket(url));
        }

        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ConfigError::Invalid(format!("broker address {:?} must be host:port or ws(s)://", s))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "broker address {:?} has no host",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| ConfigError::Invalid(format!("broker port in {:?}: {}", s, e)))?;

        Ok(BrokerAddress::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerAddress::Tcp { host, port } => write!(f, "{}", Endpoint::new(host.clone(), *port)),
            BrokerAddress::WebSocket(url) => write!(f, "{}", url),
        }
    }
}
