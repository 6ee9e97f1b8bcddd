//! The device relay: registry and pairing gate behind one lock.
//!
//! Three independent triggers mutate presence state: pairing polls (HTTP),
//! heartbeats (MQTT) and the liveness sweep (timer). All of them go through
//! [`DeviceRelay`], which holds the registry and the gate under a single
//! `RwLock`. The lock is held only for the in-memory update; history writes
//! and event broadcasts happen after it is released.
//!
//! ```text
//! GET /ping         ──► poll()          ──┐
//! device/+/heartbeat──► on_heartbeat()  ──┼──► RwLock<RelayState> ──► HistorySink
//! sweeper tick      ──► sweep()         ──┘                      └──► broadcast events
//! ```

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{RwLock, broadcast};

use crate::clock::{Clock, SystemClock};
use crate::error::PairingError;
use crate::history::{HistoryPoint, HistorySink};
use crate::ingest::Heartbeat;
use crate::pairing::{
    PairingBundle, PairingGate, PairingResponse, PairingStatus, PollOutcome, StartPairingRequest,
};
use crate::registry::{DeviceRecord, DeviceRegistry, DeviceStatus, MacAddress};

/// Default age after which an `online` device is considered gone.
pub const DEFAULT_OFFLINE_THRESHOLD_SECS: i64 = 70;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observable presence transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Credentials were handed to a polling device.
    PairingIssued {
        record: DeviceRecord,
        response: PairingResponse,
    },
    /// A heartbeat refreshed a device.
    Heartbeat {
        record: DeviceRecord,
        /// Set on the first heartbeat after a pairing handshake.
        first_after_pairing: bool,
    },
    /// The sweeper demoted a silent device.
    WentOffline { record: DeviceRecord },
}

/// What a heartbeat did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub record: DeviceRecord,
    pub first_after_pairing: bool,
}

#[derive(Debug, Default)]
struct RelayState {
    registry: DeviceRegistry,
    gate: PairingGate,
}

/// Owner of all presence and pairing state.
pub struct DeviceRelay {
    state: RwLock<RelayState>,
    history: Arc<dyn HistorySink>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<RelayEvent>,
    offline_threshold: Duration,
}

impl DeviceRelay {
    /// Create a relay with the system clock and the default 70 s threshold.
    pub fn new(history: Arc<dyn HistorySink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(RelayState::default()),
            history,
            clock: Arc::new(SystemClock),
            events,
            offline_threshold: Duration::seconds(DEFAULT_OFFLINE_THRESHOLD_SECS),
        }
    }

    /// Builder: replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builder: set the age after which `online` devices go `offline`.
    pub fn with_offline_threshold(mut self, threshold: Duration) -> Self {
        self.offline_threshold = threshold;
        self
    }

    pub fn offline_threshold(&self) -> Duration {
        self.offline_threshold
    }

    /// Subscribe to presence transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    // -- Pairing gate --

    /// Arm the gate with a validated bundle, replacing any previous one.
    pub async fn start_pairing(
        &self,
        request: StartPairingRequest,
    ) -> Result<PairingBundle, PairingError> {
        let bundle = request.into_bundle()?;
        let replaced = self.state.write().await.gate.start(bundle.clone());

        tracing::info!(
            ssid = %bundle.ssid,
            broker = %bundle.broker,
            port = %bundle.port,
            label = bundle.id.as_deref().unwrap_or("<derived>"),
            replaced = replaced.is_some(),
            "Pairing mode enabled"
        );
        Ok(bundle)
    }

    /// Disarm the gate. Calling it while disarmed is a no-op.
    pub async fn stop_pairing(&self) -> bool {
        let was_armed = self.state.write().await.gate.stop();
        if was_armed {
            tracing::info!("Pairing mode disabled");
        } else {
            tracing::debug!("Pairing mode already disabled");
        }
        was_armed
    }

    pub async fn pairing_status(&self) -> PairingStatus {
        self.state.read().await.gate.status()
    }

    /// Answer a device poll.
    ///
    /// Disarmed: plain acknowledgment whatever the device's state. Armed:
    /// credentials, and the device is recorded as `pairing` at `source_ip`.
    pub async fn poll(
        &self,
        raw_mac: Option<&str>,
        source_ip: &str,
    ) -> Result<PollOutcome, PairingError> {
        let now = self.clock.now();
        let (response, record) = {
            let mut state = self.state.write().await;
            let bundle = match state.gate.bundle() {
                Some(bundle) => bundle.clone(),
                None => {
                    tracing::debug!(mac = ?raw_mac, ip = %source_ip, "Ping while pairing disabled");
                    return Ok(PollOutcome::Acknowledge);
                }
            };

            let raw_mac = raw_mac.unwrap_or_default();
            let mac = MacAddress::parse(raw_mac).ok_or(PairingError::MissingMac)?;
            let response = PairingResponse::issue(&bundle, raw_mac, &mac);

            let record = state
                .registry
                .upsert(
                    &mac,
                    source_ip,
                    response.id.clone(),
                    DeviceStatus::Pairing,
                    now,
                )
                .clone();
            (response, record)
        };

        tracing::info!(
            mac = %record.mac,
            ip = %record.ip,
            device_id = %record.id,
            "Issued pairing credentials"
        );

        self.history.record(HistoryPoint::paired(
            &record,
            &response.ssid,
            &response.broker,
            now,
        ));
        self.history.record(HistoryPoint::status(&record, now));
        let _ = self.events.send(RelayEvent::PairingIssued {
            record,
            response: response.clone(),
        });

        Ok(PollOutcome::Credentials(response))
    }

    // -- Heartbeat ingest --

    /// Apply a heartbeat: the device becomes `online` with `last_seen = now`.
    ///
    /// The payload timestamp is informational and not used here. Empty `ip`
    /// or `id` keep the values already on record.
    pub async fn on_heartbeat(&self, heartbeat: Heartbeat) -> HeartbeatOutcome {
        let now = self.clock.now();
        let (record, first_after_pairing) = {
            let mut state = self.state.write().await;
            let previous = state.registry.get(&heartbeat.mac).cloned();
            let was_pairing = previous
                .as_ref()
                .is_some_and(|r| r.status == DeviceStatus::Pairing);

            let ip = pick(heartbeat.ip, previous.as_ref().map(|r| r.ip.as_str()));
            let id = pick(heartbeat.id, previous.as_ref().map(|r| r.id.as_str()));
            let record = state
                .registry
                .upsert(&heartbeat.mac, ip, id, DeviceStatus::Online, now)
                .clone();
            (record, was_pairing)
        };

        if first_after_pairing {
            tracing::info!(
                mac = %record.mac,
                ip = %record.ip,
                device_id = %record.id,
                "First heartbeat after pairing"
            );
        } else {
            tracing::debug!(
                mac = %record.mac,
                ip = %record.ip,
                device_id = %record.id,
                "Heartbeat"
            );
        }

        self.history.record(HistoryPoint::status(&record, now));
        let _ = self.events.send(RelayEvent::Heartbeat {
            record: record.clone(),
            first_after_pairing,
        });

        HeartbeatOutcome {
            record,
            first_after_pairing,
        }
    }

    // -- Liveness --

    /// Demote `online` devices silent for longer than the threshold.
    ///
    /// Returns the demoted records.
    pub async fn sweep(&self) -> Vec<DeviceRecord> {
        let now = self.clock.now();
        let demoted = self
            .state
            .write()
            .await
            .registry
            .mark_stale_offline(now, self.offline_threshold);

        for record in &demoted {
            tracing::info!(
                mac = %record.mac,
                device_id = %record.id,
                silent_secs = now.signed_duration_since(record.last_seen).num_seconds(),
                "Device went offline"
            );
            self.history.record(HistoryPoint::status(record, now));
            let _ = self.events.send(RelayEvent::WentOffline {
                record: record.clone(),
            });
        }
        demoted
    }

    // -- Queries --

    /// Snapshot of every device, sorted by MAC.
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices = self.state.read().await.registry.get_all();
        devices.sort_by(|a, b| a.mac.cmp(&b.mac));
        devices
    }

    /// Current record for one device.
    pub async fn device(&self, raw_mac: &str) -> Option<DeviceRecord> {
        let mac = MacAddress::parse(raw_mac)?;
        self.state.read().await.registry.get(&mac).cloned()
    }

    /// The attached history sink.
    pub fn history(&self) -> &Arc<dyn HistorySink> {
        &self.history
    }
}

fn pick(incoming: String, previous: Option<&str>) -> String {
    if incoming.is_empty() {
        previous.unwrap_or_default().to_string()
    } else {
        incoming
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::history::{MemoryHistory, PAIRED_MEASUREMENT};

    const MAC: &str = "24:6F:28:A1:B2:C3";

    fn setup() -> (DeviceRelay, Arc<ManualClock>, Arc<MemoryHistory>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let history = Arc::new(MemoryHistory::new());
        let relay = DeviceRelay::new(history.clone()).with_clock(clock.clone());
        (relay, clock, history)
    }

    fn start_request() -> StartPairingRequest {
        serde_json::from_value(json!({
            "ssid": "X", "password": "Y", "brokerIP": "10.0.0.5", "port": 1883
        }))
        .expect("request")
    }

    fn heartbeat(mac: &str, ip: &str, id: &str) -> Heartbeat {
        Heartbeat {
            mac: MacAddress::parse(mac).expect("valid"),
            ip: ip.to_string(),
            id: id.to_string(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_start_reflected_in_status() {
        let (relay, _, _) = setup();
        relay.start_pairing(start_request()).await.expect("start");

        let status = relay.pairing_status().await;
        assert!(status.active);
        let config = status.config.expect("bundle");
        assert_eq!(config.ssid, "X");
        assert_eq!(config.password, "Y");
        assert_eq!(config.broker, "10.0.0.5");
        assert_eq!(config.port, "1883");
    }

    #[tokio::test]
    async fn test_invalid_start_leaves_gate_disarmed() {
        let (relay, _, _) = setup();
        let err = relay
            .start_pairing(StartPairingRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::Validation(_)));
        assert!(!relay.pairing_status().await.active);
    }

    #[tokio::test]
    async fn test_poll_disarmed_acknowledges() {
        let (relay, _, history) = setup();
        relay.on_heartbeat(heartbeat(MAC, "10.0.0.8", "dev")).await;

        let outcome = relay.poll(Some(MAC), "10.0.0.8").await.expect("poll");
        assert_eq!(outcome, PollOutcome::Acknowledge);
        assert_eq!(
            relay.device(MAC).await.expect("record").status,
            DeviceStatus::Online
        );
        assert!(history.points_for(PAIRED_MEASUREMENT).is_empty());
    }

    #[tokio::test]
    async fn test_poll_disarmed_without_mac_acknowledges() {
        let (relay, _, _) = setup();
        assert_eq!(
            relay.poll(None, "10.0.0.8").await.expect("poll"),
            PollOutcome::Acknowledge
        );
    }

    #[tokio::test]
    async fn test_poll_armed_issues_credentials_and_records_pairing() {
        let (relay, clock, history) = setup();
        relay.start_pairing(start_request()).await.expect("start");

        let outcome = relay.poll(Some(MAC), "192.168.4.2").await.expect("poll");
        let PollOutcome::Credentials(response) = outcome else {
            panic!("expected credentials");
        };
        assert_eq!(
            response,
            PairingResponse {
                mac: MAC.to_string(),
                ssid: "X".to_string(),
                password: "Y".to_string(),
                broker: "10.0.0.5".to_string(),
                port: "1883".to_string(),
                id: "esp32_a1b2c3".to_string(),
            }
        );

        let devices = relay.devices().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].status, DeviceStatus::Pairing);
        assert_eq!(devices[0].ip, "192.168.4.2");
        assert_eq!(devices[0].id, "esp32_a1b2c3");
        assert_eq!(devices[0].last_seen, clock.now());

        assert_eq!(history.points_for(PAIRED_MEASUREMENT).len(), 1);
        assert_eq!(
            history.statuses_for("24:6f:28:a1:b2:c3"),
            vec![DeviceStatus::Pairing]
        );
    }

    #[tokio::test]
    async fn test_poll_armed_without_mac_is_rejected() {
        let (relay, _, _) = setup();
        relay.start_pairing(start_request()).await.expect("start");
        assert_eq!(
            relay.poll(Some(""), "10.0.0.1").await.unwrap_err(),
            PairingError::MissingMac
        );
        assert!(relay.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_then_poll_leaks_nothing() {
        let (relay, _, _) = setup();
        relay.start_pairing(start_request()).await.expect("start");
        assert!(relay.stop_pairing().await);
        assert!(!relay.stop_pairing().await);

        assert_eq!(
            relay.poll(Some(MAC), "10.0.0.1").await.expect("poll"),
            PollOutcome::Acknowledge
        );
        assert_eq!(
            relay.pairing_status().await,
            PairingStatus {
                active: false,
                config: None
            }
        );
    }

    #[tokio::test]
    async fn test_heartbeat_after_pairing_fires_once() {
        let (relay, clock, _) = setup();
        let mut events = relay.subscribe();
        relay.start_pairing(start_request()).await.expect("start");
        relay.poll(Some(MAC), "192.168.4.2").await.expect("poll");

        clock.advance(Duration::seconds(3));
        let first = relay
            .on_heartbeat(heartbeat(MAC, "192.168.1.50", "esp32_a1b2c3"))
            .await;
        assert!(first.first_after_pairing);
        assert_eq!(first.record.status, DeviceStatus::Online);
        assert_eq!(first.record.ip, "192.168.1.50");
        assert_eq!(first.record.last_seen, clock.now());

        clock.advance(Duration::seconds(10));
        let second = relay
            .on_heartbeat(heartbeat(MAC, "192.168.1.50", "esp32_a1b2c3"))
            .await;
        assert!(!second.first_after_pairing);

        let mut firsts = 0;
        while let Ok(event) = events.try_recv() {
            if let RelayEvent::Heartbeat {
                first_after_pairing: true,
                ..
            } = event
            {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_known_fields_when_missing() {
        let (relay, _, _) = setup();
        relay
            .on_heartbeat(heartbeat(MAC, "10.0.0.4", "kitchen"))
            .await;
        let outcome = relay.on_heartbeat(heartbeat(MAC, "", "")).await;
        assert_eq!(outcome.record.ip, "10.0.0.4");
        assert_eq!(outcome.record.id, "kitchen");
    }

    #[tokio::test]
    async fn test_heartbeat_creates_unknown_device() {
        let (relay, _, history) = setup();
        let outcome = relay
            .on_heartbeat(heartbeat("aa:aa:aa:aa:aa:aa", "10.0.0.4", "old-node"))
            .await;
        assert!(!outcome.first_after_pairing);
        assert_eq!(relay.devices().await.len(), 1);
        assert_eq!(
            history.statuses_for("aa:aa:aa:aa:aa:aa"),
            vec![DeviceStatus::Online]
        );
    }

    #[tokio::test]
    async fn test_sweep_threshold_boundaries() {
        let (relay, clock, history) = setup();
        relay.on_heartbeat(heartbeat(MAC, "10.0.0.4", "a")).await;

        clock.advance(Duration::seconds(69));
        assert!(relay.sweep().await.is_empty());
        assert_eq!(
            relay.device(MAC).await.expect("record").status,
            DeviceStatus::Online
        );

        clock.advance(Duration::seconds(2));
        let demoted = relay.sweep().await;
        assert_eq!(demoted.len(), 1);
        assert_eq!(
            relay.device(MAC).await.expect("record").status,
            DeviceStatus::Offline
        );
        assert_eq!(
            history.statuses_for("24:6f:28:a1:b2:c3"),
            vec![DeviceStatus::Online, DeviceStatus::Offline]
        );
    }

    #[tokio::test]
    async fn test_sweep_never_touches_pairing() {
        let (relay, clock, _) = setup();
        relay.start_pairing(start_request()).await.expect("start");
        relay.poll(Some(MAC), "10.0.0.4").await.expect("poll");

        clock.advance(Duration::days(30));
        assert!(relay.sweep().await.is_empty());
        assert_eq!(
            relay.device(MAC).await.expect("record").status,
            DeviceStatus::Pairing
        );
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let (relay, clock, _) = setup();
        let relay = relay.with_offline_threshold(Duration::seconds(5));
        relay.on_heartbeat(heartbeat(MAC, "10.0.0.4", "a")).await;
        clock.advance(Duration::seconds(6));
        assert_eq!(relay.sweep().await.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_device_comes_back_online() {
        let (relay, clock, _) = setup();
        relay.on_heartbeat(heartbeat(MAC, "10.0.0.4", "a")).await;
        clock.advance(Duration::seconds(120));
        relay.sweep().await;

        let outcome = relay.on_heartbeat(heartbeat(MAC, "10.0.0.4", "a")).await;
        assert_eq!(outcome.record.status, DeviceStatus::Online);
        assert!(!outcome.first_after_pairing);
    }

    #[tokio::test]
    async fn test_mac_case_maps_to_one_record() {
        let (relay, _, _) = setup();
        relay.start_pairing(start_request()).await.expect("start");
        relay.poll(Some(MAC), "10.0.0.4").await.expect("poll");
        let outcome = relay
            .on_heartbeat(heartbeat(&MAC.to_lowercase(), "10.0.0.4", "esp32_a1b2c3"))
            .await;

        assert!(outcome.first_after_pairing);
        assert_eq!(relay.devices().await.len(), 1);
    }
}
