//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the relay (`serve`, the default)
//! - Driving the pairing gate of a running relay (`pairing start`, `pairing stop`, `pairing status`)
//! - Listing known devices (`devices`)

mod devices;
mod pairing;

pub use devices::run_devices_command;
pub use pairing::{PairingCommand, run_pairing_command};

use clap::{Parser, Subcommand};

/// Default base URL of a locally running relay.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3001";

#[derive(Parser, Debug)]
#[command(name = "devrelay")]
#[command(about = "Device pairing and presence relay for networked sensor nodes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Base URL of the relay for client commands
    #[arg(long, global = true, env = "DEVRELAY_URL", default_value = DEFAULT_RELAY_URL)]
    pub url: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay (default if no subcommand given)
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Control pairing mode on a running relay
    #[command(subcommand)]
    Pairing(PairingCommand),

    /// List devices known to a running relay
    Devices {
        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Join a relay base URL and an API path.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Fail with the relay's `{error}` body, or the raw body if it has none.
pub(crate) async fn ensure_success(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    anyhow::bail!("Relay returned {}: {}", status, message)
}
