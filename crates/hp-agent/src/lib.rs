//! hp-agent: holepunch tunnel agent
//!
//! Maintains an outbound SSH session to a broker and serves reverse port
//! forwards over it, reconnecting with backoff whenever the session fails.

pub mod keys;
pub mod tunnel;

pub use keys::{authorized_key_line, Credentials};
pub use tunnel::{ReconnectSupervisor, SshBroker, SupervisorState, TransportDialer};

use tokio_util::sync::CancellationToken;
use tracing::Span;

use hp_core::config::TunnelConfig;
use hp_core::{ConfigError, HpError};

/// Build a supervisor for `config` backed by the SSH broker.
///
/// Loads the private key, so key problems surface here rather than on the
/// first connect attempt.
pub fn supervisor_from_config(
    config: &TunnelConfig,
    parent: &Span,
) -> Result<ReconnectSupervisor<SshBroker>, ConfigError> {
    let address = config.broker_address()?;
    let credentials = Credentials::load(&config.ssh_server)?;
    let dialer = TransportDialer::new(
        address,
        config.ssh_server.connect_timeout,
        config.ssh_server.keepalive_interval,
    );

    Ok(ReconnectSupervisor::new(
        SshBroker::new(dialer, credentials),
        config.forwards.clone(),
        &config.backoff,
        parent,
    ))
}

/// Serve `config` until `cancel` fires or the attempt limit is reached
pub async fn run_tunnel(
    config: &TunnelConfig,
    cancel: CancellationToken,
    parent: &Span,
) -> Result<(), HpError> {
    let supervisor = supervisor_from_config(config, parent)?;
    supervisor.run(cancel).await?;
    Ok(())
}
