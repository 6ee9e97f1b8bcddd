//! Device identity and presence record types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of the label handed to devices paired without an explicit id.
const DEFAULT_LABEL_PREFIX: &str = "esp32_";

/// Hardware identifier of a device, normalized to lowercase.
///
/// MACs arrive from devices in whatever case their firmware prints, so two
/// spellings of the same address must land on one registry record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddress(String);

impl MacAddress {
    /// Normalize a MAC string. Returns `None` for an empty or blank value.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label for a device paired without an explicit id: `esp32_` followed
    /// by the last three octets in lowercase hex, separators stripped.
    pub fn default_label(&self) -> String {
        let hex: Vec<char> = self.0.chars().filter(|c| *c != ':' && *c != '-').collect();
        let tail: String = hex[hex.len().saturating_sub(6)..].iter().collect();
        format!("{}{}", DEFAULT_LABEL_PREFIX, tail)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Presence status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Pairing,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Pairing => "pairing",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current presence state of one device.
///
/// Serialized with the field names the dashboard expects: `lastSeen` is a
/// millisecond Unix timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Hardware identifier (registry key).
    pub mac: MacAddress,
    /// Human-assigned or derived device label.
    pub id: String,
    /// Most recently observed network address.
    pub ip: String,
    /// Last time the device was heard from.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    pub status: DeviceStatus,
}
