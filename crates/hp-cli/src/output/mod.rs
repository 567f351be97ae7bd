//! Output formatting utilities for the CLI
//!
//! Human-readable rendering of the tunnel configuration, plus colored
//! status messages.

use std::time::Duration;

use tabled::{settings::Style, Table, Tabled};

use hp_core::config::TunnelConfig;
use hp_core::Forward;

/// Format forwards as an ASCII table, in configuration order
pub fn format_forwards(forwards: &[Forward]) -> String {
    if forwards.is_empty() {
        return "No forwards configured".to_string();
    }

    #[derive(Tabled)]
    struct ForwardRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "REMOTE")]
        remote: String,
        #[tabled(rename = "LOCAL")]
        local: String,
    }

    let rows: Vec<ForwardRow> = forwards
        .iter()
        .enumerate()
        .map(|(i, f)| ForwardRow {
            index: i + 1,
            remote: f.remote.to_string(),
            local: f.local.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the effective configuration as a multi-line summary
pub fn format_config(config: &TunnelConfig) -> String {
    let server = &config.ssh_server;
    let backoff = &config.backoff;
    let mut output = String::new();

    output.push_str(&format!("Broker: {}\n", or_unset(&server.address)));
    output.push_str(&format!("User: {}\n", or_unset(&server.username)));
    output.push_str(&format!(
        "Private key: {}\n",
        server.private_key_file_path.display()
    ));
    output.push_str(&format!(
        "Connect timeout: {}\n",
        format_duration(server.connect_timeout)
    ));
    output.push_str(&format!(
        "Keep-alive: {}\n",
        format_duration(server.keepalive_interval)
    ));
    output.push_str(&format!(
        "Backoff: {} doubling to {}, {}\n",
        format_duration(backoff.initial),
        format_duration(backoff.max),
        match backoff.attempt_limit() {
            Some(n) => format!("giving up after {} attempts", n),
            None => "retrying forever".to_string(),
        }
    ));
    output.push('\n');
    output.push_str(&format_forwards(&config.forwards));

    output
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

/// Format duration in human-readable form
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis % 1000 != 0 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if millis < 60_000 {
        format!("{}s", duration.as_secs())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
///
/// Outputs to stderr with yellow coloring for cautionary feedback to the user.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
///
/// Outputs to stdout with cyan coloring for informational feedback to the user.
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
