//! SSH tunnel session
//!
//! Connects to the broker over a dialed transport, authenticates with the
//! configured key and asks the broker to listen on remote endpoints. Each
//! `forwarded-tcpip` channel the broker opens back to us is routed to the
//! listener registered for its endpoint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelStream, Disconnect};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use hp_core::traits::{Accepted, Broker, RemoteListener, TunnelSession};
use hp_core::{Endpoint, TunnelError};

use super::transport::TransportDialer;
use crate::keys::Credentials;

/// Channels buffered per listener before new ones are refused.
///
/// A listener that falls this far behind is not accepting; closing the
/// extra channels lets the remote client see a prompt failure instead of a
/// hang.
const ACCEPT_BACKLOG: usize = 64;

/// A forwarded channel plus its originator address
type Incoming = (Channel<Msg>, String);

/// Delivery target for forwarded channels on one remote endpoint
struct Route {
    remote: Endpoint,
    /// Port the broker actually bound. Zero until the broker assigns one
    /// for a `remote.port` of zero.
    port: Arc<AtomicU32>,
    tx: mpsc::Sender<Incoming>,
}

impl Route {
    fn bound_port(&self) -> u32 {
        self.port.load(Ordering::Acquire)
    }
}

/// Connects to the broker and produces [`SshSession`]s
pub struct SshBroker {
    dialer: TransportDialer,
    credentials: Credentials,
    config: Arc<Config>,
}

impl SshBroker {
    /// Create a broker client
    pub fn new(dialer: TransportDialer, credentials: Credentials) -> Self {
        Self {
            dialer,
            credentials,
            config: Arc::new(Config::default()),
        }
    }
}

#[async_trait]
impl Broker for SshBroker {
    type Session = SshSession;

    async fn connect(&self, cancel: &CancellationToken) -> Result<SshSession, TunnelError> {
        let dialed = self.dialer.dial(cancel).await?;
        let transport = dialed.stream.kind();

        let (route_tx, route_rx) = mpsc::unbounded_channel();
        let handler = ClientHandler {
            host: dialed.host,
            routes: Vec::new(),
            route_rx,
        };

        // The dial timeout does not cover a broker that accepts and then stalls
        let limit = self.dialer.connect_timeout();
        let stalled = |stage: &str| {
            TunnelError::Handshake(format!("{} timed out after {:?}", stage, limit))
        };

        let mut handle = timeout(
            limit,
            client::connect_stream(Arc::clone(&self.config), dialed.stream, handler),
        )
        .await
        .map_err(|_| stalled("SSH handshake"))?
        .map_err(|e| TunnelError::Handshake(e.to_string()))?;

        tracing::debug!(
            transport,
            user = %self.credentials.username,
            "Authenticating"
        );
        let authenticated = timeout(
            limit,
            handle.authenticate_publickey(
                &self.credentials.username,
                Arc::clone(&self.credentials.key),
            ),
        )
        .await
        .map_err(|_| stalled("Authentication"))?
        .map_err(|e| TunnelError::Handshake(e.to_string()))?;

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication rejected", "en")
                .await;
            return Err(TunnelError::AuthRejected(self.credentials.username.clone()));
        }

        tracing::info!(
            address = %self.dialer.address(),
            transport,
            "Connected to broker"
        );

        Ok(SshSession {
            handle,
            route_tx,
            bound: Vec::new(),
            closed: false,
        })
    }
}

/// An authenticated SSH connection to the broker
pub struct SshSession {
    handle: Handle<ClientHandler>,
    /// Registers routes with the handler
    route_tx: mpsc::UnboundedSender<Route>,
    /// Port the broker bound for each listen, in request order. Several
    /// port-0 forwards share one endpoint, so entries may repeat.
    bound: Vec<(Endpoint, u32)>,
    closed: bool,
}

#[async_trait]
impl TunnelSession for SshSession {
    type Listener = SshRemoteListener;

    async fn listen(&mut self, remote: &Endpoint) -> Result<SshRemoteListener, TunnelError> {
        let listen_error = |message: String| TunnelError::Listen {
            endpoint: remote.clone(),
            message,
        };

        // Route first, so a channel opened right after the reply is never orphaned
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let requested = u32::from(remote.port);
        let port = Arc::new(AtomicU32::new(requested));
        self.route_tx
            .send(Route {
                remote: remote.clone(),
                port: Arc::clone(&port),
                tx,
            })
            .map_err(|_| listen_error("session closed".to_string()))?;

        let assigned = self
            .handle
            .tcpip_forward(remote.host.clone(), requested)
            .await
            .map_err(|e| listen_error(e.to_string()))?;

        let bound = if requested == 0 && assigned != 0 {
            assigned
        } else {
            requested
        };
        port.store(bound, Ordering::Release);
        self.bound.push((remote.clone(), bound));

        tracing::debug!(remote = %remote, port = bound, "Remote listener open");

        Ok(SshRemoteListener {
            endpoint: remote.clone(),
            rx,
        })
    }

    async fn unlisten(&mut self, remote: &Endpoint) -> Result<(), TunnelError> {
        let port = match self.bound.iter().position(|(endpoint, _)| endpoint == remote) {
            Some(i) => self.bound.remove(i).1,
            None => u32::from(remote.port),
        };
        self.handle
            .cancel_tcpip_forward(remote.host.clone(), port)
            .await
            .map_err(|e| TunnelError::Listen {
                endpoint: remote.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::info!("Disconnecting from broker");

        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!(error = %e, "Disconnect failed, connection already gone");
        }
    }
}

/// Receives the forwarded channels for one remote endpoint
pub struct SshRemoteListener {
    endpoint: Endpoint,
    rx: mpsc::Receiver<Incoming>,
}

#[async_trait]
impl RemoteListener for SshRemoteListener {
    type Conn = ChannelStream<Msg>;

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn accept(&mut self) -> Result<Accepted<ChannelStream<Msg>>, TunnelError> {
        match self.rx.recv().await {
            Some((channel, peer)) => Ok(Accepted {
                conn: channel.into_stream(),
                peer,
            }),
            None => Err(TunnelError::Accept {
                endpoint: self.endpoint.clone(),
                message: "tunnel session closed".to_string(),
            }),
        }
    }
}

/// SSH client handler
struct ClientHandler {
    /// Hostname we dialed, for host key logging
    host: String,
    routes: Vec<Route>,
    route_rx: mpsc::UnboundedReceiver<Route>,
}

impl ClientHandler {
    fn find_route(&mut self, host: &str, port: u32) -> Option<&Route> {
        while let Ok(route) = self.route_rx.try_recv() {
            self.routes.push(route);
        }
        self.routes.retain(|r| !r.tx.is_closed());

        // A route still at zero is waiting for its assigned port and may
        // see a channel before the forward reply has been recorded
        let serves = |r: &&Route, want: u32| r.remote.host == host && r.bound_port() == want;
        self.routes
            .iter()
            .find(|r| serves(r, port))
            .or_else(|| self.routes.iter().find(|r| serves(r, 0)))
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    /// The broker's host key is not verified against any known-hosts store.
    /// It is logged so an operator can notice a change.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting broker host key without verification"
        );
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let peer = format!("{}:{}", originator_address, originator_port);

        let rejected = match self.find_route(connected_address, connected_port) {
            Some(route) => match route.tx.try_send((channel, peer)) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full((channel, _))) => {
                    tracing::warn!(
                        remote = %route.remote,
                        "Accept backlog full, refusing forwarded connection"
                    );
                    channel
                }
                Err(mpsc::error::TrySendError::Closed((channel, _))) => channel,
            },
            None => {
                tracing::warn!(
                    address = connected_address,
                    port = connected_port,
                    "Forwarded connection for unknown endpoint"
                );
                channel
            }
        };

        let _ = rejected.close().await;
        Ok(())
    }
}
