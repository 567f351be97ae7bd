//! Opening the configured remote listeners on a fresh session

use tracing::Span;

use hp_core::traits::TunnelSession;
use hp_core::{Forward, TunnelError};

/// Open one remote listener per forward, in configuration order.
///
/// All or nothing: on the first failure every listener opened so far is
/// dropped and released on the broker, the session is closed and the error
/// is returned. On success the listeners come back in the same order as
/// `forwards`.
pub async fn open_forwards<S: TunnelSession>(
    session: &mut S,
    forwards: &[Forward],
    span: &Span,
) -> Result<Vec<(Forward, S::Listener)>, TunnelError> {
    let mut opened = Vec::with_capacity(forwards.len());

    for forward in forwards {
        match session.listen(&forward.remote).await {
            Ok(listener) => {
                tracing::info!(parent: span, forward = %forward, "Forward listening");
                opened.push((forward.clone(), listener));
            }
            Err(e) => {
                tracing::warn!(parent: span, forward = %forward, error = %e, "Forward failed to listen");
                release(session, opened, span).await;
                session.close().await;
                return Err(e);
            }
        }
    }

    Ok(opened)
}

async fn release<S: TunnelSession>(
    session: &mut S,
    opened: Vec<(Forward, S::Listener)>,
    span: &Span,
) {
    for (forward, listener) in opened {
        drop(listener);
        if let Err(e) = session.unlisten(&forward.remote).await {
            tracing::debug!(parent: span, forward = %forward, error = %e, "Unlisten failed");
        }
    }
}
