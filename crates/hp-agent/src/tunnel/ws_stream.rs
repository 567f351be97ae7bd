//! Byte-stream view of a WebSocket
//!
//! SSH needs an ordered, boundary-free byte stream. A WebSocket delivers
//! whole messages, so reads are served from the unread remainder of the
//! current message before the next one is pulled, and every write becomes
//! exactly one binary message that is flushed before the write completes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures::{ready, Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Adapts a message-oriented WebSocket into `AsyncRead + AsyncWrite`
#[derive(Debug)]
pub struct WsByteStream<S> {
    inner: S,
    /// Unread remainder of the last binary message
    pending: Bytes,
    /// Peer sent a close message or the stream ended
    read_closed: bool,
    /// Our close message has been sent
    write_closed: bool,
    /// Length of a message handed to the sink but not yet flushed
    in_flight: Option<usize>,
}

impl<S> WsByteStream<S> {
    /// Wrap an established WebSocket
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
            read_closed: false,
            write_closed: false,
            in_flight: None,
        }
    }

    /// Number of buffered bytes not yet handed to a reader
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

fn ws_to_io(err: WsError) -> io::Error {
    match err {
        WsError::Io(e) => e,
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            io::Error::new(io::ErrorKind::NotConnected, err)
        }
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl<S> AsyncRead for WsByteStream<S>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.pending.has_remaining() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }

            if this.read_closed {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(Message::Binary(data))) => {
                    // Empty messages carry nothing and must not read as EOF
                    this.pending = Bytes::from(data);
                }
                Some(Ok(Message::Close(_))) | None => {
                    this.read_closed = true;
                }
                Some(Ok(Message::Text(_))) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unexpected text message on binary WebSocket stream",
                    )));
                }
                // Ping/pong are answered by the library
                Some(Ok(_)) => {}
                Some(Err(e)) => return Poll::Ready(Err(ws_to_io(e))),
            }
        }
    }
}

impl<S> AsyncWrite for WsByteStream<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "WebSocket already closed",
            )));
        }
        // A previous call queued this write and is waiting on the flush.
        // Callers retry a pending write with the same buffer.
        if let Some(n) = this.in_flight {
            let flushed = ready!(Pin::new(&mut this.inner).poll_flush(cx));
            this.in_flight = None;
            return Poll::Ready(flushed.map(|()| n).map_err(ws_to_io));
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(Pin::new(&mut this.inner).poll_ready(cx)).map_err(ws_to_io)?;
        Pin::new(&mut this.inner)
            .start_send(Message::Binary(buf.to_vec()))
            .map_err(ws_to_io)?;

        // The peer may be waiting on exactly these bytes, so nothing stays buffered
        this.in_flight = Some(buf.len());
        let flushed = ready!(Pin::new(&mut this.inner).poll_flush(cx));
        this.in_flight = None;
        Poll::Ready(flushed.map(|()| buf.len()).map_err(ws_to_io))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_flush(cx).map_err(ws_to_io)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Ok(()));
        }

        let result = ready!(Pin::new(&mut this.inner).poll_close(cx));
        this.write_closed = true;
        match result {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(ws_to_io(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (a, b) = tokio::io::duplex(1 << 20);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (client, server)
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[tokio::test]
    async fn test_round_trip_with_any_read_size() {
        let chunks = [pattern(1, 1), pattern(1000, 2), pattern(65536, 3)];
        let expected: Vec<u8> = chunks.concat();

        for read_size in [1usize, 7, 4096] {
            let (client, server) = socket_pair().await;
            let mut writer = WsByteStream::new(client);
            let mut reader = WsByteStream::new(server);

            let to_send = chunks.clone();
            let write_task = tokio::spawn(async move {
                for chunk in &to_send {
                    writer.write_all(chunk).await.unwrap();
                }
                writer.shutdown().await.unwrap();
            });

            let mut received = Vec::new();
            let mut buf = vec![0u8; read_size];
            loop {
                let n = reader.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                assert!(n <= read_size);
                received.extend_from_slice(&buf[..n]);
            }

            write_task.await.unwrap();
            assert_eq!(received.len(), expected.len(), "read size {}", read_size);
            assert_eq!(received, expected, "read size {}", read_size);
        }
    }

    #[tokio::test]
    async fn test_write_is_delivered_without_flush() {
        let (client, mut server) = socket_pair().await;
        let mut writer = WsByteStream::new(client);

        // SSH writes its banner this way and then waits for the peer's
        writer.write_all(b"SSH-2.0-holepunch\r\n").await.unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), server.next())
            .await
            .expect("write stayed buffered until flush")
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Binary(b"SSH-2.0-holepunch\r\n".to_vec()));
    }

    #[tokio::test]
    async fn test_split_halves_ping_pong() {
        let (client, server) = socket_pair().await;
        let (mut c_read, mut c_write) = tokio::io::split(WsByteStream::new(client));
        let (mut s_read, mut s_write) = tokio::io::split(WsByteStream::new(server));

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            for _ in 0..3 {
                s_read.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"ping");
                s_write.write_all(b"pong").await.unwrap();
            }
        });

        let mut buf = [0u8; 4];
        for _ in 0..3 {
            c_write.write_all(b"ping").await.unwrap();
            tokio::time::timeout(std::time::Duration::from_secs(2), c_read.read_exact(&mut buf))
                .await
                .expect("reply never arrived")
                .unwrap();
            assert_eq!(&buf, b"pong");
        }

        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_read_keeps_remainder() {
        let (client, mut server) = socket_pair().await;
        let mut reader = WsByteStream::new(client);

        server
            .send(Message::Binary(b"hello world".to_vec()))
            .await
            .unwrap();

        let mut head = [0u8; 5];
        reader.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"hello");
        assert_eq!(reader.buffered(), 6);

        let mut tail = [0u8; 6];
        reader.read_exact(&mut tail).await.unwrap();
        assert_eq!(&tail, b" world");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_each_write_is_one_message() {
        let (client, mut server) = socket_pair().await;
        let mut writer = WsByteStream::new(client);

        writer.write_all(b"abc").await.unwrap();
        writer.write_all(b"defg").await.unwrap();

        let first = server.next().await.unwrap().unwrap();
        let second = server.next().await.unwrap().unwrap();
        assert_eq!(first, Message::Binary(b"abc".to_vec()));
        assert_eq!(second, Message::Binary(b"defg".to_vec()));
    }

    #[tokio::test]
    async fn test_close_message_reads_as_eof() {
        let (client, mut server) = socket_pair().await;
        let mut reader = WsByteStream::new(client);

        server.send(Message::Binary(b"last".to_vec())).await.unwrap();
        server.close(None).await.unwrap();

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"last");
    }

    #[tokio::test]
    async fn test_empty_message_is_not_eof() {
        let (client, mut server) = socket_pair().await;
        let mut reader = WsByteStream::new(client);

        server.send(Message::Binary(Vec::new())).await.unwrap();
        server.send(Message::Binary(b"x".to_vec())).await.unwrap();

        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(&byte, b"x");
    }

    #[tokio::test]
    async fn test_text_message_is_an_error() {
        let (client, mut server) = socket_pair().await;
        let mut reader = WsByteStream::new(client);

        server.send(Message::Text("nope".to_string())).await.unwrap();

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_reset_without_close_is_a_read_error() {
        let (client, server) = socket_pair().await;
        let mut reader = WsByteStream::new(client);

        drop(server);

        let mut buf = [0u8; 16];
        assert!(reader.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (client, mut server) = socket_pair().await;
        let mut writer = WsByteStream::new(client);

        writer.shutdown().await.unwrap();
        writer.shutdown().await.unwrap();

        match server.next().await {
            Some(Ok(Message::Close(_))) => {}
            other => panic!("expected close message, got {:?}", other),
        }

        let err = writer.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
