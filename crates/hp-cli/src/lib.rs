//! holepunch: command-line front end for the tunnel agent
//!
//! Provides the `holepunch` binary: run the tunnel, export the public key
//! for the broker's `authorized_keys`, and inspect the configuration.

pub mod commands;
pub mod output;
