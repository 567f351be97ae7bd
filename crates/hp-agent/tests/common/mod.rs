//! In-memory broker for exercising the supervisor without SSH

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use hp_agent::SupervisorState;
use hp_core::traits::{Accepted, Broker, RemoteListener, TunnelSession};
use hp_core::{Endpoint, Forward, TunnelError};

/// Everything the mock broker was asked to do
#[derive(Debug, Default)]
pub struct Journal {
    pub dials: usize,
    pub listens: Vec<Endpoint>,
    pub unlistens: Vec<Endpoint>,
    pub closes: usize,
    pub accepts: usize,
}

#[derive(Default)]
struct Inner {
    journal: Mutex<Journal>,
    fail_listen: Mutex<HashSet<Endpoint>>,
    failing_connects: AtomicUsize,
    /// Live listeners of the current session
    remotes: Mutex<HashMap<Endpoint, mpsc::Sender<DuplexStream>>>,
}

#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Inner>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.inner.journal.lock().unwrap()
    }

    /// Every listen request for `remote` will be refused
    pub fn fail_listen_on(&self, remote: &Endpoint) {
        self.inner.fail_listen.lock().unwrap().insert(remote.clone());
    }

    /// The next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Simulate a remote client connecting to `remote`
    pub async fn open_remote(&self, remote: &Endpoint) -> DuplexStream {
        let tx = self
            .inner
            .remotes
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .expect("no listener for endpoint");
        let (client, server) = tokio::io::duplex(64 * 1024);
        tx.send(server).await.unwrap();
        client
    }

    /// Simulate the broker connection dropping
    pub fn kill_session(&self) {
        self.inner.remotes.lock().unwrap().clear();
    }
}

#[async_trait]
impl Broker for MockBroker {
    type Session = MockSession;

    async fn connect(&self, cancel: &CancellationToken) -> Result<MockSession, TunnelError> {
        if cancel.is_cancelled() {
            return Err(TunnelError::Cancelled);
        }
        self.journal().dials += 1;

        let failing = &self.inner.failing_connects;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TunnelError::Handshake("mock connect failure".to_string()));
        }

        Ok(MockSession {
            inner: Arc::clone(&self.inner),
            closed: false,
        })
    }
}

pub struct MockSession {
    inner: Arc<Inner>,
    closed: bool,
}

#[async_trait]
impl TunnelSession for MockSession {
    type Listener = MockListener;

    async fn listen(&mut self, remote: &Endpoint) -> Result<MockListener, TunnelError> {
        self.inner.journal.lock().unwrap().listens.push(remote.clone());

        if self.inner.fail_listen.lock().unwrap().contains(remote) {
            return Err(TunnelError::Listen {
                endpoint: remote.clone(),
                message: "refused by mock".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(16);
        self.inner.remotes.lock().unwrap().insert(remote.clone(), tx);
        Ok(MockListener {
            endpoint: remote.clone(),
            rx,
            inner: Arc::clone(&self.inner),
        })
    }

    async fn unlisten(&mut self, remote: &Endpoint) -> Result<(), TunnelError> {
        self.inner.journal.lock().unwrap().unlistens.push(remote.clone());
        self.inner.remotes.lock().unwrap().remove(remote);
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.journal.lock().unwrap().closes += 1;
        self.inner.remotes.lock().unwrap().clear();
    }
}

pub struct MockListener {
    endpoint: Endpoint,
    rx: mpsc::Receiver<DuplexStream>,
    inner: Arc<Inner>,
}

#[async_trait]
impl RemoteListener for MockListener {
    type Conn = DuplexStream;

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn accept(&mut self) -> Result<Accepted<DuplexStream>, TunnelError> {
        match self.rx.recv().await {
            Some(conn) => {
                self.inner.journal.lock().unwrap().accepts += 1;
                Ok(Accepted {
                    conn,
                    peer: "198.51.100.1:40000".to_string(),
                })
            }
            None => Err(TunnelError::Accept {
                endpoint: self.endpoint.clone(),
                message: "mock session gone".to_string(),
            }),
        }
    }
}

pub fn forward(local_port: u16, remote_port: u16) -> Forward {
    Forward {
        local: Endpoint::new("127.0.0.1", local_port),
        remote: Endpoint::new("0.0.0.0", remote_port),
    }
}

/// Local TCP service that answers each read with `tag` followed by the bytes read
pub async fn tagged_echo_service(tag: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1024];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let mut reply = tag.as_bytes().to_vec();
                    reply.extend_from_slice(&buf[..n]);
                    if socket.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    port
}

/// Collect transitions until one matches `done`, including the match
pub async fn wait_for_state(
    rx: &mut broadcast::Receiver<SupervisorState>,
    done: impl Fn(&SupervisorState) -> bool,
) -> Vec<SupervisorState> {
    let mut seen = Vec::new();
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let state = rx.recv().await.unwrap();
            seen.push(state);
            if done(&state) {
                return;
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "state not reached, saw {:?}", seen);
    seen
}
