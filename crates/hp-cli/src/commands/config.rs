//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{format_config, print_info, print_warning};
use hp_core::config::{self, TunnelConfig};

/// Show the effective configuration
pub fn config_show(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        print_warning(&format!("No configuration file found at {:?}", config_path));
        print_info("Create one with an [ssh_server] table and at least one [[forwards]] entry");
        return Ok(());
    }

    let config: TunnelConfig = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    print_info(&format!("Configuration file: {:?}", config_path));
    println!();
    println!("{}", format_config(&config));

    if let Err(e) = config.validate() {
        print_warning(&format!("Configuration is not usable yet: {}", e));
    }

    Ok(())
}

/// Show the configuration file path
pub fn config_path(config_path: &Path) -> Result<()> {
    println!("{}", config_path.display());
    Ok(())
}
