//! devrelay: device provisioning and presence relay.
//!
//! Unconfigured sensor nodes poll `GET /ping` and, while an operator has
//! pairing mode armed, receive Wi-Fi and broker credentials. Provisioned
//! nodes publish heartbeats over MQTT; a periodic sweep marks silent nodes
//! offline. Transitions are mirrored into an optional InfluxDB store.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod pairing;
pub mod registry;
pub mod relay;
pub mod server;
pub mod sweeper;
pub mod tasks;

pub use error::{Error, Result};
pub use relay::{DeviceRelay, RelayEvent};
