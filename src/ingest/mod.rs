//! Heartbeat ingest from the pub/sub transport.
//!
//! Devices publish a JSON heartbeat on `device/<id>/heartbeat` once they are
//! provisioned. Each message refreshes the device's registry record. A
//! payload that cannot be decoded is logged and dropped; ingest never hands
//! an error back to the transport, so one bad message cannot take down the
//! subscription.

mod mqtt;

pub use mqtt::{MqttIngest, MqttSettings};

use serde::Deserialize;

use crate::error::IngestError;
use crate::registry::MacAddress;
use crate::relay::{DeviceRelay, HeartbeatOutcome};

/// Default subscription filter for heartbeat topics.
pub const DEFAULT_HEARTBEAT_TOPIC: &str = "device/+/heartbeat";

/// A decoded heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub mac: MacAddress,
    /// Address the device reports for itself. May be empty.
    pub ip: String,
    /// Device label. May be empty.
    pub id: String,
    /// Device-side timestamp, kept for logging only.
    pub timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatPayload {
    mac: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

impl Heartbeat {
    /// Decode a raw message payload.
    pub fn decode(payload: &[u8]) -> Result<Self, IngestError> {
        let text = std::str::from_utf8(payload)?;
        let raw: HeartbeatPayload = serde_json::from_str(text)?;
        let mac = raw
            .mac
            .as_deref()
            .and_then(MacAddress::parse)
            .ok_or(IngestError::MissingMac)?;

        Ok(Self {
            mac,
            ip: raw.ip.unwrap_or_default(),
            id: raw.id.unwrap_or_default(),
            timestamp: raw.timestamp,
        })
    }
}

/// Handle one inbound message. Returns `None` when it was ignored or dropped.
pub async fn handle_message(
    relay: &DeviceRelay,
    filter: &str,
    topic: &str,
    payload: &[u8],
) -> Option<HeartbeatOutcome> {
    if !topic_matches(filter, topic) {
        tracing::debug!(topic, "Ignoring message outside heartbeat topics");
        return None;
    }

    match Heartbeat::decode(payload) {
        Ok(heartbeat) => {
            tracing::trace!(topic, timestamp = ?heartbeat.timestamp, "Heartbeat received");
            Some(relay.on_heartbeat(heartbeat).await)
        }
        Err(e) => {
            tracing::warn!(
                topic,
                error = %e,
                bytes = payload.len(),
                "Dropping malformed heartbeat"
            );
            None
        }
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (rest) wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::history::MemoryHistory;
    use crate::registry::DeviceStatus;

    #[test]
    fn test_decode_full_payload() {
        let hb = Heartbeat::decode(
            br#"{"mac":"24:6F:28:A1:B2:C3","ip":"192.168.1.50","id":"esp32_a1b2c3","timestamp":123456}"#,
        )
        .expect("decode");
        assert_eq!(hb.mac.as_str(), "24:6f:28:a1:b2:c3");
        assert_eq!(hb.ip, "192.168.1.50");
        assert_eq!(hb.id, "esp32_a1b2c3");
        assert_eq!(hb.timestamp, Some(serde_json::json!(123456)));
    }

    #[test]
    fn test_decode_without_optional_fields() {
        let hb = Heartbeat::decode(br#"{"mac":"aa:bb:cc:dd:ee:ff"}"#).expect("decode");
        assert!(hb.ip.is_empty());
        assert!(hb.id.is_empty());
        assert!(hb.timestamp.is_none());
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            Heartbeat::decode(br#"{"ip":"10.0.0.1","id":"x"}"#),
            Err(IngestError::MissingMac)
        ));
        assert!(matches!(
            Heartbeat::decode(br#"{"mac":"  "}"#),
            Err(IngestError::MissingMac)
        ));
        assert!(matches!(
            Heartbeat::decode(b"not json"),
            Err(IngestError::Decode(_))
        ));
        assert!(matches!(
            Heartbeat::decode(&[0xff, 0xfe]),
            Err(IngestError::Utf8(_))
        ));
        assert!(matches!(
            Heartbeat::decode(br#"[1,2,3]"#),
            Err(IngestError::Decode(_))
        ));
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("device/+/heartbeat", "device/esp32_a1/heartbeat"));
        assert!(!topic_matches("device/+/heartbeat", "device/esp32_a1/status"));
        assert!(!topic_matches("device/+/heartbeat", "device/heartbeat"));
        assert!(!topic_matches("device/+/heartbeat", "device/a/b/heartbeat"));
        assert!(topic_matches("device/#", "device/a/b/heartbeat"));
        assert!(topic_matches("device/a/heartbeat", "device/a/heartbeat"));
    }

    #[tokio::test]
    async fn test_malformed_message_changes_nothing() {
        let history = Arc::new(MemoryHistory::new());
        let relay = DeviceRelay::new(history.clone());

        let outcome = handle_message(
            &relay,
            DEFAULT_HEARTBEAT_TOPIC,
            "device/x/heartbeat",
            br#"{"ip":"10.0.0.1","id":"x"}"#,
        )
        .await;

        assert!(outcome.is_none());
        assert!(relay.devices().await.is_empty());
        assert!(history.points().is_empty());
    }

    #[tokio::test]
    async fn test_valid_message_marks_online() {
        let relay = DeviceRelay::new(Arc::new(MemoryHistory::new()));
        let outcome = handle_message(
            &relay,
            DEFAULT_HEARTBEAT_TOPIC,
            "device/esp32_a1b2c3/heartbeat",
            br#"{"mac":"24:6f:28:a1:b2:c3","ip":"192.168.1.50","id":"esp32_a1b2c3"}"#,
        )
        .await
        .expect("applied");

        assert_eq!(outcome.record.status, DeviceStatus::Online);
        assert_eq!(relay.devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_topic_ignored() {
        let relay = DeviceRelay::new(Arc::new(MemoryHistory::new()));
        let outcome = handle_message(
            &relay,
            DEFAULT_HEARTBEAT_TOPIC,
            "esp32_a1/sensors/pin_34/data",
            br#"{"mac":"24:6f:28:a1:b2:c3"}"#,
        )
        .await;
        assert!(outcome.is_none());
        assert!(relay.devices().await.is_empty());
    }
}
