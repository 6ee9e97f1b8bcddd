//! Pairing gate state machine and its wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PairingError;
use crate::registry::MacAddress;

/// Body of `POST /api/pairing/start`.
///
/// Every field is optional at the serde level so that missing fields are
/// reported as one validation error listing all of them. Fields accept a
/// JSON string or number; numbers are stored in their decimal form.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StartPairingRequest {
    pub ssid: Option<Value>,
    pub password: Option<Value>,
    pub port: Option<Value>,
    /// Optional device label override.
    pub id: Option<Value>,
    #[serde(rename = "brokerIP")]
    pub broker_ip: Option<Value>,
}

impl StartPairingRequest {
    /// Validate and convert into a credential bundle.
    ///
    /// `ssid`, `password`, `port` and `brokerIP` must be present and
    /// non-empty; a number `0` counts as missing. Values are stored in
    /// string form.
    pub fn into_bundle(self) -> Result<PairingBundle, PairingError> {
        let ssid = text(self.ssid);
        let password = text(self.password);
        let port = text(self.port);
        let broker = text(self.broker_ip);

        let mut missing = Vec::new();
        if ssid.is_none() {
            missing.push("ssid");
        }
        if password.is_none() {
            missing.push("password");
        }
        if port.is_none() {
            missing.push("port");
        }
        if broker.is_none() {
            missing.push("brokerIP");
        }

        match (ssid, password, port, broker) {
            (Some(ssid), Some(password), Some(port), Some(broker)) => Ok(PairingBundle {
                ssid,
                password,
                broker,
                port,
                id: text(self.id),
            }),
            _ => Err(PairingError::Validation(missing.join(", "))),
        }
    }
}

/// Largest float that still converts to an integer exactly (2^53).
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

fn text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => None,
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT => {
                Some(format!("{}", f as i64))
            }
            _ => Some(n.to_string()),
        },
        _ => None,
    }
}

/// Credentials handed to a device during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingBundle {
    pub ssid: String,
    pub password: String,
    /// Broker address devices should connect to.
    pub broker: String,
    pub port: String,
    /// Label override; devices get a MAC-derived label when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The global pairing switch.
///
/// Armed always carries a bundle, so there is no "armed but unconfigured"
/// state to handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PairingGate {
    #[default]
    Disarmed,
    Armed(PairingBundle),
}

impl PairingGate {
    /// Arm the gate, replacing any bundle already set. Returns the replaced one.
    pub fn start(&mut self, bundle: PairingBundle) -> Option<PairingBundle> {
        match std::mem::replace(self, PairingGate::Armed(bundle)) {
            PairingGate::Armed(prev) => Some(prev),
            PairingGate::Disarmed => None,
        }
    }

    /// Disarm the gate. Idempotent; returns whether it was armed.
    pub fn stop(&mut self) -> bool {
        matches!(
            std::mem::replace(self, PairingGate::Disarmed),
            PairingGate::Armed(_)
        )
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, PairingGate::Armed(_))
    }

    pub fn bundle(&self) -> Option<&PairingBundle> {
        match self {
            PairingGate::Armed(bundle) => Some(bundle),
            PairingGate::Disarmed => None,
        }
    }

    pub fn status(&self) -> PairingStatus {
        PairingStatus {
            active: self.is_armed(),
            config: self.bundle().cloned(),
        }
    }
}

/// Body of `GET /api/pairing/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingStatus {
    pub active: bool,
    pub config: Option<PairingBundle>,
}

/// Credentials payload returned to a polling device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingResponse {
    /// The MAC exactly as the device sent it.
    pub mac: String,
    pub ssid: String,
    pub password: String,
    pub broker: String,
    pub port: String,
    /// Resolved device label.
    pub id: String,
}

impl PairingResponse {
    pub fn issue(bundle: &PairingBundle, raw_mac: &str, mac: &MacAddress) -> Self {
        Self {
            mac: raw_mac.to_string(),
            ssid: bundle.ssid.clone(),
            password: bundle.password.clone(),
            broker: bundle.broker.clone(),
            port: bundle.port.clone(),
            id: bundle.id.clone().unwrap_or_else(|| mac.default_label()),
        }
    }
}

/// Result of a device poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Gate disarmed: plain `OK`.
    Acknowledge,
    /// Gate armed: credentials for the device.
    Credentials(PairingResponse),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn request(body: serde_json::Value) -> StartPairingRequest {
        serde_json::from_value(body).expect("request should deserialize")
    }

    fn bundle() -> PairingBundle {
        PairingBundle {
            ssid: "X".to_string(),
            password: "Y".to_string(),
            broker: "10.0.0.5".to_string(),
            port: "1883".to_string(),
            id: None,
        }
    }

    #[test]
    fn test_into_bundle_coerces_numeric_port() {
        let bundle = request(json!({
            "ssid": "X", "password": "Y", "port": 1883, "brokerIP": "10.0.0.5"
        }))
        .into_bundle()
        .expect("valid request");

        assert_eq!(bundle.port, "1883");
        assert_eq!(bundle.broker, "10.0.0.5");
        assert_eq!(bundle.id, None);
    }

    #[test]
    fn test_into_bundle_drops_fraction_of_integral_float_port() {
        let bundle = request(json!({
            "ssid": "X", "password": "Y", "port": 1883.0, "brokerIP": "10.0.0.5"
        }))
        .into_bundle()
        .expect("valid request");
        assert_eq!(bundle.port, "1883");

        let bundle = request(json!({
            "ssid": "X", "password": "Y", "port": 1883.5, "brokerIP": "10.0.0.5"
        }))
        .into_bundle()
        .expect("valid request");
        assert_eq!(bundle.port, "1883.5");
    }

    #[test]
    fn test_into_bundle_coerces_numeric_credentials() {
        let bundle = request(json!({
            "ssid": 12345, "password": 87654321, "port": 1883, "brokerIP": "10.0.0.5", "id": 7
        }))
        .into_bundle()
        .expect("valid request");

        assert_eq!(bundle.ssid, "12345");
        assert_eq!(bundle.password, "87654321");
        assert_eq!(bundle.id.as_deref(), Some("7"));
    }

    #[test]
    fn test_into_bundle_treats_other_json_types_as_missing() {
        let err = request(json!({
            "ssid": true, "password": ["Y"], "port": null, "brokerIP": { "ip": "10.0.0.5" }
        }))
        .into_bundle()
        .unwrap_err();

        assert_eq!(
            err,
            PairingError::Validation("ssid, password, port, brokerIP".to_string())
        );
    }

    #[test]
    fn test_into_bundle_keeps_string_port_and_label() {
        let bundle = request(json!({
            "ssid": "X", "password": "Y", "port": "8883", "brokerIP": "broker.lan", "id": "garage"
        }))
        .into_bundle()
        .expect("valid request");

        assert_eq!(bundle.port, "8883");
        assert_eq!(bundle.id.as_deref(), Some("garage"));
    }

    #[test]
    fn test_into_bundle_lists_missing_fields() {
        let err = request(json!({ "ssid": "X", "port": 0 }))
            .into_bundle()
            .unwrap_err();

        assert_eq!(
            err,
            PairingError::Validation("password, port, brokerIP".to_string())
        );
    }

    #[test]
    fn test_into_bundle_rejects_empty_strings() {
        let err = request(json!({
            "ssid": "", "password": "Y", "port": "", "brokerIP": "10.0.0.5"
        }))
        .into_bundle()
        .unwrap_err();

        assert_eq!(err, PairingError::Validation("ssid, port".to_string()));
    }

    #[test]
    fn test_empty_label_is_treated_as_absent() {
        let bundle = request(json!({
            "ssid": "X", "password": "Y", "port": 1883, "brokerIP": "10.0.0.5", "id": ""
        }))
        .into_bundle()
        .expect("valid request");
        assert_eq!(bundle.id, None);
    }

    #[test]
    fn test_gate_start_replaces_bundle() {
        let mut gate = PairingGate::default();
        assert!(gate.start(bundle()).is_none());

        let second = PairingBundle {
            ssid: "Other".to_string(),
            ..bundle()
        };
        let replaced = gate.start(second.clone()).expect("previous bundle");

        assert_eq!(replaced, bundle());
        assert_eq!(gate.bundle(), Some(&second));
    }

    #[test]
    fn test_gate_stop_is_idempotent() {
        let mut gate = PairingGate::default();
        assert!(!gate.stop());

        gate.start(bundle());
        assert!(gate.stop());
        assert!(!gate.stop());
        assert_eq!(gate, PairingGate::Disarmed);
    }

    #[test]
    fn test_status_json() {
        let mut gate = PairingGate::default();
        assert_eq!(
            serde_json::to_value(gate.status()).expect("serialize"),
            json!({ "active": false, "config": null })
        );

        gate.start(bundle());
        assert_eq!(
            serde_json::to_value(gate.status()).expect("serialize"),
            json!({
                "active": true,
                "config": {
                    "ssid": "X", "password": "Y", "broker": "10.0.0.5", "port": "1883"
                }
            })
        );
    }

    #[test]
    fn test_issue_defaults_label_from_mac() {
        let raw = "24:6F:28:A1:B2:C3";
        let mac = MacAddress::parse(raw).expect("valid");
        let response = PairingResponse::issue(&bundle(), raw, &mac);

        assert_eq!(response.mac, raw);
        assert_eq!(response.id, "esp32_a1b2c3");
        assert_eq!(response.port, "1883");
    }

    #[test]
    fn test_issue_prefers_bundle_label() {
        let mac = MacAddress::parse("24:6f:28:a1:b2:c3").expect("valid");
        let labelled = PairingBundle {
            id: Some("porch".to_string()),
            ..bundle()
        };
        assert_eq!(
            PairingResponse::issue(&labelled, mac.as_str(), &mac).id,
            "porch"
        );
    }
}
