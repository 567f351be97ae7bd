//! hp-core: Core abstractions and configuration for holepunch
//!
//! This crate provides the shared types, configuration structures, error
//! taxonomy and tunnel traits used by the agent and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, HpError, TunnelError};
pub use types::{BrokerAddress, Endpoint, Forward};
