//! Pairing gate CLI commands.
//!
//! Arm, disarm and inspect the pairing gate of a running relay.

use clap::Subcommand;

use super::{endpoint, ensure_success};
use crate::pairing::PairingStatus;

#[derive(Subcommand, Debug, Clone)]
pub enum PairingCommand {
    /// Arm the gate: the next polling devices receive these credentials
    Start {
        /// Wi-Fi network name handed to devices
        #[arg(long)]
        ssid: String,

        /// Wi-Fi password handed to devices
        #[arg(long)]
        password: String,

        /// Broker address devices should connect to
        #[arg(long)]
        broker: String,

        /// Broker port
        #[arg(long, default_value = "1883")]
        port: u16,

        /// Fixed device label (derived from the MAC when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Disarm the gate
    Stop,

    /// Show whether the gate is armed and with what
    Status,
}

/// Run a pairing command against the relay at `base_url`.
pub async fn run_pairing_command(cmd: PairingCommand, base_url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    match cmd {
        PairingCommand::Start {
            ssid,
            password,
            broker,
            port,
            id,
        } => {
            let response = client
                .post(endpoint(base_url, "/api/pairing/start"))
                .json(&serde_json::json!({
                    "ssid": ssid,
                    "password": password,
                    "brokerIP": broker,
                    "port": port,
                    "id": id,
                }))
                .send()
                .await
                .map_err(|e| unreachable_relay(base_url, e))?;
            ensure_success(response).await?;
            println!("Pairing mode enabled (broker {}:{}).", broker, port);
        }
        PairingCommand::Stop => {
            let response = client
                .post(endpoint(base_url, "/api/pairing/stop"))
                .send()
                .await
                .map_err(|e| unreachable_relay(base_url, e))?;
            ensure_success(response).await?;
            println!("Pairing mode disabled.");
        }
        PairingCommand::Status => {
            let response = client
                .get(endpoint(base_url, "/api/pairing/status"))
                .send()
                .await
                .map_err(|e| unreachable_relay(base_url, e))?;
            let status: PairingStatus = ensure_success(response).await?.json().await?;
            print!("{}", format_status(&status));
        }
    }
    Ok(())
}

fn unreachable_relay(base_url: &str, e: reqwest::Error) -> anyhow::Error {
    anyhow::anyhow!("Failed to reach relay at {} (is it running?): {}", base_url, e)
}

fn format_status(status: &PairingStatus) -> String {
    match &status.config {
        Some(config) if status.active => format!(
            "Pairing: active\n  SSID:   {}\n  Broker: {}:{}\n  Label:  {}\n",
            config.ssid,
            config.broker,
            config.port,
            config.id.as_deref().unwrap_or("(derived from MAC)")
        ),
        _ => "Pairing: inactive\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::PairingBundle;

    #[test]
    fn test_format_inactive() {
        let status = PairingStatus {
            active: false,
            config: None,
        };
        assert_eq!(format_status(&status), "Pairing: inactive\n");
    }

    #[test]
    fn test_format_active_hides_password() {
        let status = PairingStatus {
            active: true,
            config: Some(PairingBundle {
                ssid: "HomeNet".to_string(),
                password: "hunter2".to_string(),
                broker: "192.168.1.10".to_string(),
                port: "1883".to_string(),
                id: None,
            }),
        };
        let text = format_status(&status);
        assert!(text.contains("HomeNet"));
        assert!(text.contains("192.168.1.10:1883"));
        assert!(text.contains("derived from MAC"));
        assert!(!text.contains("hunter2"));
    }
}
