//! Broker transport dialing
//!
//! Produces the byte stream the SSH session runs over, either a plain TCP
//! connection or a WebSocket wrapped in [`WsByteStream`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use hp_core::{BrokerAddress, TunnelError};

use super::ws_stream::WsByteStream;

/// WebSocket as dialed by [`TransportDialer`]
pub type BrokerWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The closed set of transports a session can run over
#[derive(Debug)]
pub enum TransportStream {
    /// Direct TCP byte stream
    Tcp(TcpStream),
    /// Message-oriented WebSocket adapted to a byte stream
    WebSocket(Box<WsByteStream<BrokerWebSocket>>),
}

impl TransportStream {
    /// Short transport name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            TransportStream::Tcp(_) => "tcp",
            TransportStream::WebSocket(_) => "websocket",
        }
    }
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            TransportStream::WebSocket(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            TransportStream::WebSocket(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            TransportStream::WebSocket(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            TransportStream::WebSocket(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connected transport, ready for the SSH handshake
#[derive(Debug)]
pub struct DialedTransport {
    /// The byte stream
    pub stream: TransportStream,
    /// Hostname of the dial address, used for host identity handling
    pub host: String,
}

/// Dials the broker over the transport its address selects
#[derive(Debug, Clone)]
pub struct TransportDialer {
    address: BrokerAddress,
    connect_timeout: Duration,
    keepalive: Duration,
}

impl TransportDialer {
    /// Create a dialer for `address`
    pub fn new(address: BrokerAddress, connect_timeout: Duration, keepalive: Duration) -> Self {
        Self {
            address,
            connect_timeout,
            keepalive,
        }
    }

    /// The broker address this dialer targets
    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }

    /// Bound on each connection stage
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Dial the broker, bounded by the connect timeout and `cancel`
    pub async fn dial(&self, cancel: &CancellationToken) -> Result<DialedTransport, TunnelError> {
        let span = tracing::debug_span!("dial", address = %self.address);

        let attempt = async {
            match &self.address {
                BrokerAddress::Tcp { host, port } => {
                    let stream = self.dial_tcp(host, *port).await?;
                    Ok(DialedTransport {
                        stream: TransportStream::Tcp(stream),
                        host: host.clone(),
                    })
                }
                BrokerAddress::WebSocket(url) => self.dial_websocket(url).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TunnelError::Cancelled),
            result = tokio::time::timeout(self.connect_timeout, attempt.instrument(span)) => {
                result.map_err(|_| TunnelError::DialTimeout(self.address.to_string()))?
            }
        }
    }

    async fn dial_tcp(&self, host: &str, port: u16) -> Result<TcpStream, TunnelError> {
        let address = format!("{}:{}", host, port);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| TunnelError::Dial {
                address: address.clone(),
                source,
            })?;

        enable_keepalive(&stream, self.keepalive)
            .map_err(|source| TunnelError::Dial { address, source })?;

        tracing::debug!(peer = ?stream.peer_addr().ok(), "TCP connected");
        Ok(stream)
    }

    async fn dial_websocket(&self, url: &Url) -> Result<DialedTransport, TunnelError> {
        let host = url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let tcp = self.dial_tcp(&host, port).await?;

        let (socket, response) = tokio_tungstenite::client_async_tls(url.as_str(), tcp)
            .await
            .map_err(|e| TunnelError::WebSocket {
                address: url.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(status = %response.status(), "WebSocket upgraded");

        Ok(DialedTransport {
            stream: TransportStream::WebSocket(Box::new(WsByteStream::new(socket))),
            host,
        })
    }
}

/// Turn on periodic TCP keep-alive probing
fn enable_keepalive(stream: &TcpStream, interval: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(interval);
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let keepalive = keepalive.with_interval(interval);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
