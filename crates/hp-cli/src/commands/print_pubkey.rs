//! Print-pubkey command implementation

use std::path::Path;

use anyhow::{Context, Result};

use hp_core::config::{self, TunnelConfig};

/// Print the configured key's public half in `authorized_keys` format
pub fn print_pubkey_command(config_path: &Path) -> Result<()> {
    let config: TunnelConfig = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let key = hp_agent::keys::load_key(&config.ssh_server.private_key_file_path)?;
    println!("{}", hp_agent::authorized_key_line(&key)?);

    Ok(())
}
