//! Core trait definitions

mod tunnel;

pub use tunnel::{Accepted, Broker, RemoteListener, TunnelSession};
