//! Tunnel traits
//!
//! These describe the secure multiplexed session the tunnel runs over: a
//! broker we can connect and authenticate to, a live session that can be
//! asked to listen on remote endpoints, and the listeners themselves. The
//! production implementation is SSH; tests substitute in-memory doubles.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::TunnelError;
use crate::types::Endpoint;

/// A remote-originated connection handed out by a [`RemoteListener`]
#[derive(Debug)]
pub struct Accepted<C> {
    /// The byte stream, exclusively owned by whoever accepted it
    pub conn: C,
    /// Originator address as reported by the broker
    pub peer: String,
}

/// Something that can produce authenticated tunnel sessions
#[async_trait]
pub trait Broker: Send + Sync {
    /// The session type produced on success
    type Session: TunnelSession;

    /// Dial the broker and authenticate.
    ///
    /// The dial honours `cancel`; the handshake that follows does not.
    async fn connect(&self, cancel: &CancellationToken) -> Result<Self::Session, TunnelError>;
}

/// A live, authenticated tunnel session
#[async_trait]
pub trait TunnelSession: Send + 'static {
    /// Listener type returned by [`TunnelSession::listen`]
    type Listener: RemoteListener;

    /// Ask the broker to listen on `remote`
    async fn listen(&mut self, remote: &Endpoint) -> Result<Self::Listener, TunnelError>;

    /// Ask the broker to stop listening on `remote`
    async fn unlisten(&mut self, remote: &Endpoint) -> Result<(), TunnelError>;

    /// Tear down the session and its connection.
    ///
    /// Every listener's pending and future `accept` calls fail afterwards.
    /// Calling this more than once is a no-op.
    async fn close(&mut self);
}

/// A listener opened on the broker's side of a session
#[async_trait]
pub trait RemoteListener: Send + 'static {
    /// Byte stream type of accepted connections
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Remote endpoint this listener was requested for
    fn endpoint(&self) -> &Endpoint;

    /// Wait for the next remote-originated connection
    async fn accept(&mut self) -> Result<Accepted<Self::Conn>, TunnelError>;
}
