//! Device listing CLI command.

use chrono::Utc;

use super::{endpoint, ensure_success};
use crate::registry::DeviceRecord;

/// Print the registry snapshot of the relay at `base_url`, sorted by MAC.
pub async fn run_devices_command(base_url: &str, json: bool) -> anyhow::Result<()> {
    let response = reqwest::Client::new()
        .get(endpoint(base_url, "/api/devices"))
        .send()
        .await
        .map_err(|e| {
            anyhow::anyhow!("Failed to reach relay at {} (is it running?): {}", base_url, e)
        })?;
    let mut devices: Vec<DeviceRecord> = ensure_success(response).await?.json().await?;
    devices.sort_by(|a, b| a.mac.cmp(&b.mac));

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print!("{}", format_table(&devices, Utc::now()));
    }
    Ok(())
}

fn format_table(devices: &[DeviceRecord], now: chrono::DateTime<Utc>) -> String {
    if devices.is_empty() {
        return "No devices known.\n".to_string();
    }

    let mut out = format!(
        "{:<19} {:<16} {:<16} {:<8} {}\n",
        "MAC", "ID", "IP", "STATUS", "LAST SEEN"
    );
    for device in devices {
        let ago = now.signed_duration_since(device.last_seen).num_seconds().max(0);
        out.push_str(&format!(
            "{:<19} {:<16} {:<16} {:<8} {}s ago\n",
            device.mac.as_str(),
            device.id,
            device.ip,
            device.status.as_str(),
            ago
        ));
    }
    out
}
