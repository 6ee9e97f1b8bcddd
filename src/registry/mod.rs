//! In-memory device registry.
//!
//! One record per hardware identifier, created on the first pairing poll or
//! the first heartbeat for that MAC and updated in place afterwards. Records
//! are never evicted; the table lives as long as the process.
//!
//! ```text
//! Pairing poll (armed) ──► upsert(mac, status = pairing)
//! Heartbeat            ──► upsert(mac, status = online)
//! Sweeper tick         ──► mark_stale_offline(now, threshold)
//! GET /api/devices     ──► get_all()
//! ```
//!
//! The registry itself is not synchronized. It is owned by
//! [`DeviceRelay`](crate::relay::DeviceRelay), which serializes every access
//! behind a single lock together with the pairing gate.

mod device;

pub use device::{DeviceRecord, DeviceStatus, MacAddress};

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{DateTime, Duration, Utc};

/// Hash-keyed table of device presence records.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<MacAddress, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `mac` and return the stored record.
    ///
    /// `last_seen` never moves backwards: an older `timestamp` than the one
    /// already stored keeps the stored value.
    pub fn upsert(
        &mut self,
        mac: &MacAddress,
        ip: impl Into<String>,
        label: impl Into<String>,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    ) -> &DeviceRecord {
        let record = DeviceRecord {
            mac: mac.clone(),
            id: label.into(),
            ip: ip.into(),
            last_seen: timestamp,
            status,
        };

        match self.devices.entry(mac.clone()) {
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                let last_seen = slot.last_seen.max(record.last_seen);
                *slot = DeviceRecord { last_seen, ..record };
                slot
            }
            Entry::Vacant(entry) => entry.insert(record),
        }
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&DeviceRecord> {
        self.devices.get(mac)
    }

    /// Snapshot of every record. Order is unspecified.
    pub fn get_all(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }

    /// Demote `online` records whose `last_seen` is more than `threshold`
    /// behind `now`. `pairing` and `offline` records are left alone.
    ///
    /// Returns the records that changed, already in their `offline` state.
    pub fn mark_stale_offline(
        &mut self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Vec<DeviceRecord> {
        let mut demoted = Vec::new();
        for record in self.devices.values_mut() {
            if record.status == DeviceStatus::Online
                && now.signed_duration_since(record.last_seen) > threshold
            {
                record.status = DeviceStatus::Offline;
                demoted.push(record.clone());
            }
        }
        demoted
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
