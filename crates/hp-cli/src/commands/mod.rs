//! CLI command implementations

mod config;
mod connect;
mod print_pubkey;

pub use config::{config_path, config_show};
pub use connect::connect_command;
pub use print_pubkey::print_pubkey_command;
