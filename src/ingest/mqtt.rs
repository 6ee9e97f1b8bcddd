//! MQTT subscription feeding heartbeats into the relay.
//!
//! Reconnects are left to the rumqttc event loop; every `ConnAck`
//! re-subscribes to the heartbeat filter since sessions are not persisted
//! on the broker.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handle_message;
use crate::error::TransportError;
use crate::relay::DeviceRelay;

/// Pause between reconnect attempts after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Keep-alive interval sent to the broker.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// How long shutdown waits for DISCONNECT to reach the broker.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default broker port when the URL carries none.
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Heartbeat topic filter.
    pub topic: String,
}

impl MqttSettings {
    /// Build settings from a broker URL such as `mqtt://localhost:1883`.
    pub fn from_url(
        broker_url: &str,
        client_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let parsed = url::Url::parse(broker_url).map_err(|e| TransportError::InvalidBroker {
            url: broker_url.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(parsed.scheme(), "mqtt" | "tcp") {
            return Err(TransportError::InvalidBroker {
                url: broker_url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidBroker {
                url: broker_url.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_string();

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_MQTT_PORT),
            client_id: client_id.into(),
            topic: topic.into(),
        })
    }
}

/// Background MQTT subscriber.
pub struct MqttIngest {
    settings: MqttSettings,
    relay: Arc<DeviceRelay>,
}

impl MqttIngest {
    pub fn new(settings: MqttSettings, relay: Arc<DeviceRelay>) -> Self {
        Self { settings, relay }
    }

    /// Spawn the subscription loop. It exits after `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, 64);
        tokio::spawn(self.run(client, eventloop, cancel))
    }

    async fn run(self, client: AsyncClient, mut eventloop: EventLoop, cancel: CancellationToken) {
        tracing::info!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            "Connecting to MQTT broker"
        );

        let mut connected = false;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    connected = true;
                    if let Err(e) = self.subscribe(&client) {
                        tracing::error!(error = %e, "Heartbeat subscription failed");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    tracing::info!(topic = %self.settings.topic, "Subscribed to heartbeats");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_message(
                        &self.relay,
                        &self.settings.topic,
                        &publish.topic,
                        &publish.payload,
                    )
                    .await;
                }
                Ok(_) => {}
                Err(e) => {
                    connected = false;
                    tracing::warn!(error = %e, "MQTT connection error, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        if connected {
            disconnect(&client, &mut eventloop).await;
        }
        tracing::info!("MQTT ingest stopped");
    }

    fn subscribe(&self, client: &AsyncClient) -> Result<(), TransportError> {
        client
            .try_subscribe(self.settings.topic.clone(), QoS::AtMostOnce)
            .map_err(|e| TransportError::SubscribeFailed {
                topic: self.settings.topic.clone(),
                reason: e.to_string(),
            })
    }
}

/// Queue DISCONNECT and drive the event loop until it has been written.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        tracing::debug!(error = %e, "MQTT disconnect request not queued");
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    if flushed {
        tracing::debug!("Disconnected from MQTT broker");
    } else {
        tracing::debug!("MQTT disconnect not confirmed before shutdown");
    }
}
