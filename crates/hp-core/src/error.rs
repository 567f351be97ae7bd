//! Core error types for holepunch

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Endpoint;

/// Top-level error type for the holepunch crates
#[derive(Error, Debug)]
pub enum HpError {
    /// Tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Transport and session errors
///
/// Every variant is retryable: the reconnect supervisor logs it and backs off.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Network failure while dialing the broker
    #[error("Dial {address} failed: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Dialing the broker took longer than the connect timeout
    #[error("Dial {0} timed out")]
    DialTimeout(String),

    /// Cancellation was requested while dialing
    #[error("Dial cancelled")]
    Cancelled,

    /// WebSocket upgrade failed
    #[error("WebSocket handshake with {address} failed: {message}")]
    WebSocket { address: String, message: String },

    /// SSH transport handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The broker refused our key
    #[error("Authentication rejected for user {0}")]
    AuthRejected(String),

    /// A remote listen request failed
    #[error("Listen on remote {endpoint} failed: {message}")]
    Listen { endpoint: Endpoint, message: String },

    /// A remote listener stopped delivering connections
    #[error("Accept on remote {endpoint} failed: {message}")]
    Accept { endpoint: Endpoint, message: String },
}

/// Configuration-related errors, fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Private key could not be read or parsed
    #[error("Private key {path}: {message}")]
    Key { path: PathBuf, message: String },
}
