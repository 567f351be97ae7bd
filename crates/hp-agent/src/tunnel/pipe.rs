//! Bidirectional relay between a tunneled connection and a local service

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{Instrument, Span};

use hp_core::traits::Accepted;
use hp_core::Forward;

/// Which way bytes were flowing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the first stream to the second
    AToB,
    /// From the second stream to the first
    BToA,
}

/// Outcome of one [`pipe`] call
#[derive(Debug, Default)]
pub struct PipeStats {
    /// Bytes copied from the first stream to the second
    pub a_to_b: u64,
    /// Bytes copied from the second stream to the first
    pub b_to_a: u64,
    /// First error seen by either direction
    pub error: Option<(Direction, io::Error)>,
}

/// Copy buffer per direction
const COPY_BUF_SIZE: usize = 16 * 1024;

/// Relay bytes both ways until either direction finishes.
///
/// Each direction copies until EOF or error and then shuts down its writer.
/// Whichever finishes first ends the relay: the other direction is aborted
/// and both streams are closed when their halves drop. Bytes already read by
/// the aborted direction may be lost.
pub async fn pipe<A, B>(a: A, b: B) -> PipeStats
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let a_to_b = Arc::new(AtomicU64::new(0));
    let b_to_a = Arc::new(AtomicU64::new(0));

    let mut copies = JoinSet::new();
    copies.spawn(copy_direction(Direction::AToB, a_read, b_write, Arc::clone(&a_to_b)));
    copies.spawn(copy_direction(Direction::BToA, b_read, a_write, Arc::clone(&b_to_a)));

    let first = copies.join_next().await;
    copies.shutdown().await;

    PipeStats {
        a_to_b: a_to_b.load(Ordering::Relaxed),
        b_to_a: b_to_a.load(Ordering::Relaxed),
        error: match first {
            Some(Ok((direction, Err(e)))) => Some((direction, e)),
            _ => None,
        },
    }
}

async fn copy_direction<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    copied: Arc<AtomicU64>,
) -> (Direction, io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let result = async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            writer.write_all(&buf[..n]).await?;
            writer.flush().await?;
            copied.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
    .await;

    let _ = writer.shutdown().await;
    (direction, result)
}

/// Relays one accepted remote connection to the forward's local endpoint
pub struct PipeWorker<C> {
    forward: Forward,
    accepted: Accepted<C>,
    span: Span,
}

impl<C> PipeWorker<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(forward: Forward, accepted: Accepted<C>, parent: &Span) -> Self {
        let span = tracing::info_span!(
            parent: parent,
            "pipe_worker",
            peer = %accepted.peer,
            local = %forward.local
        );
        Self {
            forward,
            accepted,
            span,
        }
    }

    /// Dial the local endpoint and relay until either side finishes.
    ///
    /// The local dial has no timeout of its own.
    pub async fn run(self) {
        let span = self.span.clone();
        async move {
            let Accepted { mut conn, .. } = self.accepted;

            let local = match TcpStream::connect(self.forward.local.to_string()).await {
                Ok(local) => local,
                Err(e) => {
                    tracing::warn!(error = %e, "Local service unreachable, dropping connection");
                    let _ = conn.shutdown().await;
                    return;
                }
            };

            let stats = pipe(conn, local).await;
            match stats.error {
                Some((direction, e)) => tracing::warn!(
                    remote_to_local = stats.a_to_b,
                    local_to_remote = stats.b_to_a,
                    ?direction,
                    error = %e,
                    "Relay ended with error"
                ),
                None => tracing::info!(
                    remote_to_local = stats.a_to_b,
                    local_to_remote = stats.b_to_a,
                    "Relay finished"
                ),
            }
        }
        .instrument(span)
        .await
    }
}
