//! Reverse tunnel to the broker
//!
//! Layered bottom-up: [`transport`] dials the broker, [`connector`] runs the
//! SSH session over it, [`forwards`] and [`listener`] serve the configured
//! forwards, [`pipe`] relays each connection and [`supervisor`] keeps the
//! whole thing alive.

pub mod connector;
pub mod forwards;
pub mod listener;
pub mod pipe;
pub mod reconnect;
pub mod supervisor;
pub mod transport;
pub mod ws_stream;

pub use connector::{SshBroker, SshRemoteListener, SshSession};
pub use forwards::open_forwards;
pub use listener::ForwardListener;
pub use pipe::{pipe, PipeStats, PipeWorker};
pub use reconnect::ExponentialBackoff;
pub use supervisor::{ReconnectSupervisor, SupervisorState};
pub use transport::{DialedTransport, TransportDialer, TransportStream};
pub use ws_stream::WsByteStream;
