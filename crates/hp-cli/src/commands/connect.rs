//! Connect command implementation

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use hp_core::config;

/// Run the tunnel until a signal arrives or the supervisor gives up
pub async fn connect_command(config_path: &Path) -> Result<()> {
    let config = config::load_tunnel_config(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let span = tracing::info_span!("holepunch", broker = %config.ssh_server.address);
    tracing::info!(
        parent: &span,
        forwards = config.forwards.len(),
        "Starting tunnel"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    hp_agent::run_tunnel(&config, cancel, &span)
        .await
        .with_context(|| "Tunnel stopped")?;

    tracing::info!(parent: &span, "Tunnel shut down");
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        cancel.cancel();
    });
}
