//! Accept loop for one forward

use tokio::sync::mpsc;
use tracing::{Instrument, Span};

use hp_core::traits::RemoteListener;
use hp_core::{Forward, TunnelError};

use super::pipe::PipeWorker;

/// Accepts remote connections for one forward and hands each to a
/// [`PipeWorker`]
pub struct ForwardListener<L> {
    forward: Forward,
    listener: L,
    /// Shared with the supervisor; receives at most one report from us
    failures: mpsc::Sender<TunnelError>,
    span: Span,
}

impl<L: RemoteListener> ForwardListener<L> {
    pub fn new(
        forward: Forward,
        listener: L,
        failures: mpsc::Sender<TunnelError>,
        parent: &Span,
    ) -> Self {
        let span = tracing::info_span!(
            parent: parent,
            "forward_listener",
            remote = %forward.remote,
            local = %forward.local
        );
        Self {
            forward,
            listener,
            failures,
            span,
        }
    }

    /// Accept until the listener fails, then report the failure once
    pub async fn run(mut self) {
        let span = self.span.clone();
        async move {
            loop {
                match self.listener.accept().await {
                    Ok(accepted) => {
                        tracing::info!(peer = %accepted.peer, "Accepted remote connection");
                        let worker = PipeWorker::new(self.forward.clone(), accepted, &self.span);
                        tokio::spawn(worker.run());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Remote listener failed");
                        // Fails only once the supervisor has stopped listening
                        let _ = self.failures.try_send(e);
                        return;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
