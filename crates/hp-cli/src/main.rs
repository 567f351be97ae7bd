//! holepunch CLI
//!
//! Keeps reverse port forwards alive through a remote SSH broker:
//! - `connect` runs the tunnel until interrupted
//! - `print-pubkey` exports the key the broker must authorize
//! - `config` inspects the configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use holepunch::commands;
use holepunch::output::print_error;
use hp_core::config;

#[derive(Parser)]
#[command(name = "holepunch")]
#[command(author, version, about = "Persistent reverse SSH tunnels")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "HOLEPUNCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and serve the configured forwards
    Connect,

    /// Print the public key in authorized_keys format
    PrintPubkey,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for print-pubkey
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Connect => commands::connect_command(&config_path).await,
        Commands::PrintPubkey => commands::print_pubkey_command(&config_path),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&config_path),
            ConfigAction::Path => commands::config_path(&config_path),
        },
    }
}
