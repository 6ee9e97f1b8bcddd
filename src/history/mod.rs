//! Historical store for presence transitions.
//!
//! The relay mirrors every registry transition into a time-series store as
//! a tagged point. The store is a pure sink for the relay's own decisions:
//! nothing read back from it ever influences the registry. Writes are
//! fire-and-forget; a failing store is logged and otherwise ignored.
//!
//! ```text
//! DeviceRelay ──record(point)──► HistorySink ──► InfluxDB (batched writer)
//! GET /api/devices/history ──► latest_status()
//! ```

mod influx;

pub use influx::{InfluxConfig, InfluxHistory, parse_annotated_csv};

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PersistenceError;
use crate::registry::{DeviceRecord, DeviceStatus};

/// Measurement for presence status changes and heartbeats.
pub const HEARTBEAT_MEASUREMENT: &str = "device_heartbeat";

/// Measurement for issued pairing credentials.
pub const PAIRED_MEASUREMENT: &str = "device_paired";

/// One row of a history query, column name to value.
pub type HistoryRow = BTreeMap<String, String>;

/// A timestamped, tagged point describing one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPoint {
    pub measurement: &'static str,
    pub tags: Vec<(&'static str, String)>,
    /// String fields.
    pub fields: Vec<(&'static str, String)>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryPoint {
    /// Status point for a registry record (`online`, `offline` or `pairing`).
    pub fn status(record: &DeviceRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: HEARTBEAT_MEASUREMENT,
            tags: vec![
                ("mac", record.mac.to_string()),
                ("device_id", record.id.clone()),
            ],
            fields: vec![
                ("ip", record.ip.clone()),
                ("status", record.status.to_string()),
            ],
            timestamp,
        }
    }

    /// Credentials issued to a device.
    pub fn paired(
        record: &DeviceRecord,
        ssid: &str,
        broker: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: PAIRED_MEASUREMENT,
            tags: vec![
                ("mac", record.mac.to_string()),
                ("device_id", record.id.clone()),
            ],
            fields: vec![
                ("ssid", ssid.to_string()),
                ("broker", broker.to_string()),
                ("client_ip", record.ip.clone()),
            ],
            timestamp,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render as InfluxDB line protocol with millisecond precision.
    ///
    /// Tags with empty values are omitted, the protocol does not allow them.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_key(self.measurement);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", escape_key(key), escape_field(value)))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&self.timestamp.timestamp_millis().to_string());
        line
    }
}

/// Escape a measurement, tag key or tag value. Line breaks become spaces
/// since a point must stay on one line.
fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = if matches!(c, '\n' | '\r') { ' ' } else { c };
        if matches!(c, ',' | '=' | ' ' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a string field value. Line breaks become spaces.
fn escape_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' | '\r' => out.push(' '),
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Outbound interface to the historical store.
///
/// `record` is called synchronously from the relay after the registry lock
/// is released and must not block or fail.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Queue a point for persistence.
    fn record(&self, point: HistoryPoint);

    /// Latest `device_heartbeat` point per device over the last 24 hours.
    async fn latest_status(&self) -> Result<Vec<HistoryRow>, PersistenceError>;
}

/// Sink used when no store is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistory;

#[async_trait]
impl HistorySink for NullHistory {
    fn record(&self, point: HistoryPoint) {
        tracing::trace!(measurement = point.measurement, "No history store, dropping point");
    }

    async fn latest_status(&self) -> Result<Vec<HistoryRow>, PersistenceError> {
        Ok(Vec::new())
    }
}

/// Sink that keeps points in memory. Used in tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    points: Mutex<Vec<HistoryPoint>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded point, oldest first.
    pub fn points(&self) -> Vec<HistoryPoint> {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Recorded points of one measurement.
    pub fn points_for(&self, measurement: &str) -> Vec<HistoryPoint> {
        self.points()
            .into_iter()
            .filter(|p| p.measurement == measurement)
            .collect()
    }

    /// Status values recorded for one MAC, oldest first.
    pub fn statuses_for(&self, mac: &str) -> Vec<DeviceStatus> {
        self.points_for(HEARTBEAT_MEASUREMENT)
            .iter()
            .filter(|p| p.tag("mac") == Some(mac))
            .filter_map(|p| match p.field("status") {
                Some("online") => Some(DeviceStatus::Online),
                Some("offline") => Some(DeviceStatus::Offline),
                Some("pairing") => Some(DeviceStatus::Pairing),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    fn record(&self, point: HistoryPoint) {
        self.points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(point);
    }

    async fn latest_status(&self) -> Result<Vec<HistoryRow>, PersistenceError> {
        let mut latest: BTreeMap<String, HistoryPoint> = BTreeMap::new();
        for point in self.points_for(HEARTBEAT_MEASUREMENT) {
            let mac = point.tag("mac").unwrap_or_default().to_string();
            latest.insert(mac, point);
        }

        Ok(latest
            .into_values()
            .map(|point| {
                let mut row = HistoryRow::new();
                row.insert("_measurement".to_string(), point.measurement.to_string());
                row.insert("_time".to_string(), point.timestamp.to_rfc3339());
                for (k, v) in point.tags.iter().chain(point.fields.iter()) {
                    row.insert((*k).to_string(), v.clone());
                }
                row
            })
            .collect())
    }
}
