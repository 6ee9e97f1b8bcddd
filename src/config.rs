//! Runtime configuration loaded from the environment.
//!
//! A `.env` file in the working directory is honored but optional.

use std::net::IpAddr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::history::InfluxConfig;
use crate::ingest::DEFAULT_HEARTBEAT_TOPIC;
use crate::relay::DEFAULT_OFFLINE_THRESHOLD_SECS;
use crate::sweeper::DEFAULT_SWEEP_INTERVAL;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_MQTT_BROKER: &str = "mqtt://localhost:1883";
pub const DEFAULT_MQTT_CLIENT_ID: &str = "esp32-manager";
pub const DEFAULT_INFLUX_ORG: &str = "esp32-org";
pub const DEFAULT_INFLUX_BUCKET: &str = "esp32-devices";
/// Upper bound for interval and threshold settings (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: String,
    pub heartbeat_topic: String,
}

/// Full relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_host: IpAddr,
    pub port: u16,
    pub mqtt: MqttConfig,
    /// `None` when no historical store is configured.
    pub influx: Option<InfluxConfig>,
    /// Address advertised by the interface listing, overriding discovery.
    pub host_ip: Option<String>,
    pub sweep_interval: Duration,
    pub offline_threshold: Duration,
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load from process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_host = match get("BIND_HOST") {
            Some(raw) => parse_value("BIND_HOST", &raw)?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = match get("PORT") {
            Some(raw) => parse_value("PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let mqtt = MqttConfig {
            broker: get("MQTT_BROKER").unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
            client_id: get("MQTT_CLIENT_ID").unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            heartbeat_topic: get("MQTT_HEARTBEAT_TOPIC")
                .unwrap_or_else(|| DEFAULT_HEARTBEAT_TOPIC.to_string()),
        };

        let influx = match get("INFLUX_URL") {
            Some(url) => {
                url::Url::parse(&url).map_err(|e| ConfigError::InvalidValue {
                    key: "INFLUX_URL".to_string(),
                    message: e.to_string(),
                })?;
                Some(InfluxConfig {
                    url,
                    token: get("INFLUX_TOKEN").unwrap_or_default(),
                    org: get("INFLUX_ORG").unwrap_or_else(|| DEFAULT_INFLUX_ORG.to_string()),
                    bucket: get("INFLUX_BUCKET")
                        .unwrap_or_else(|| DEFAULT_INFLUX_BUCKET.to_string()),
                })
            }
            None => None,
        };

        let sweep_interval = seconds(&get, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL)?;
        let offline_threshold = seconds(
            &get,
            "OFFLINE_THRESHOLD_SECS",
            Duration::from_secs(DEFAULT_OFFLINE_THRESHOLD_SECS as u64),
        )?;

        let format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") | Some("pretty") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LOG_FORMAT".to_string(),
                    message: format!("expected 'text' or 'json', got '{other}'"),
                });
            }
        };

        Ok(Self {
            bind_host,
            port,
            mqtt,
            influx,
            host_ip: get("HOST_IP"),
            sweep_interval,
            offline_threshold,
            logging: LoggingConfig {
                level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                format,
            },
        })
    }

    /// Offline threshold as a chrono duration for the relay.
    pub fn offline_threshold_chrono(&self) -> chrono::Duration {
        i64::try_from(self.offline_threshold.as_secs())
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            mqtt: MqttConfig {
                broker: DEFAULT_MQTT_BROKER.to_string(),
                client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                heartbeat_topic: DEFAULT_HEARTBEAT_TOPIC.to_string(),
            },
            influx: None,
            host_ip: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            offline_threshold: Duration::from_secs(DEFAULT_OFFLINE_THRESHOLD_SECS as u64),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Text,
            },
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn seconds<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let secs: u64 = parse_value(key, &raw)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    if secs > MAX_INTERVAL_SECS {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': must be at most {MAX_INTERVAL_SECS} seconds"),
        });
    }
    Ok(Duration::from_secs(secs))
}
