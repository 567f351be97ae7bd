//! Reconnect supervisor
//!
//! Owns the lifecycle of the tunnel: connect, open every forward, serve
//! until the first listener failure, back off, and try again. Runs until
//! cancelled or until the optional attempt limit is reached.

use std::fmt;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use hp_core::config::BackoffConfig;
use hp_core::traits::{Broker, TunnelSession};
use hp_core::{Forward, TunnelError};

use super::forwards::open_forwards;
use super::listener::ForwardListener;
use super::reconnect::ExponentialBackoff;

/// Transitions buffered for slow subscribers before they start lagging
const STATE_CHANNEL_CAPACITY: usize = 32;

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Serving,
    /// Waiting out the given delay before the next attempt
    BackingOff(Duration),
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Connecting => write!(f, "connecting"),
            SupervisorState::Serving => write!(f, "serving"),
            SupervisorState::BackingOff(delay) => write!(f, "backing off {:?}", delay),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Keeps every forward served across session failures
pub struct ReconnectSupervisor<B> {
    broker: B,
    forwards: Vec<Forward>,
    backoff: ExponentialBackoff,
    /// Failed cycles allowed before giving up; `None` retries forever
    max_attempts: Option<u32>,
    state: SupervisorState,
    transitions: broadcast::Sender<SupervisorState>,
    span: Span,
}

impl<B: Broker> ReconnectSupervisor<B> {
    pub fn new(broker: B, forwards: Vec<Forward>, backoff: &BackoffConfig, parent: &Span) -> Self {
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            broker,
            forwards,
            backoff: ExponentialBackoff::from_config(backoff),
            max_attempts: backoff.attempt_limit(),
            state: SupervisorState::Idle,
            transitions,
            span: tracing::info_span!(parent: parent, "supervisor"),
        }
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorState> {
        self.transitions.subscribe()
    }

    /// Current state
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run until cancelled or out of attempts.
    ///
    /// Returns `Ok` when stopped by `cancel` and the last error when the
    /// attempt limit is reached.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), TunnelError> {
        let span = self.span.clone();
        async move {
            let mut failures = 0u32;

            loop {
                self.transition(SupervisorState::Connecting);

                let error = match self.connect_and_serve(&cancel).await {
                    Ok(()) => {
                        self.transition(SupervisorState::Stopped);
                        return Ok(());
                    }
                    Err(e) => e,
                };

                if cancel.is_cancelled() {
                    tracing::debug!(error = %error, "Attempt ended by cancellation");
                    self.transition(SupervisorState::Stopped);
                    return Ok(());
                }

                failures = failures.saturating_add(1);
                tracing::warn!(error = %error, failures, "Tunnel attempt failed");

                if self.max_attempts.is_some_and(|limit| failures >= limit) {
                    tracing::error!(failures, "Giving up, attempt limit reached");
                    self.transition(SupervisorState::Stopped);
                    return Err(error);
                }

                let delay = self.backoff.next_delay();
                self.transition(SupervisorState::BackingOff(delay));
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(span)
        .await
    }

    /// One session lifetime.
    ///
    /// `Ok` only when cancelled while serving; every other exit is the error
    /// that ended the session.
    async fn connect_and_serve(&mut self, cancel: &CancellationToken) -> Result<(), TunnelError> {
        let session_span = tracing::info_span!("tunnel_session", attempt = self.backoff.attempt());

        let mut session = self
            .broker
            .connect(cancel)
            .instrument(session_span.clone())
            .await?;
        let listeners = open_forwards(&mut session, &self.forwards, &session_span).await?;

        let (failure_tx, mut failure_rx) = mpsc::channel(listeners.len().max(1));
        let mut tasks = JoinSet::new();
        for (forward, listener) in listeners {
            let listener = ForwardListener::new(forward, listener, failure_tx.clone(), &session_span);
            tasks.spawn(listener.run());
        }
        drop(failure_tx);

        self.transition(SupervisorState::Serving);

        // Each listener reports before exiting, so a closed channel only
        // means there were no listeners and we serve until cancelled
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            Some(failure) = failure_rx.recv() => Err(failure),
        };

        // Closing first unblocks any listener still waiting in accept
        session.close().await;
        tasks.shutdown().await;

        outcome
    }

    fn transition(&mut self, next: SupervisorState) {
        tracing::info!(from = %self.state, to = %next, "Supervisor state");
        self.state = next;
        // No subscribers is fine
        let _ = self.transitions.send(next);
    }
}
