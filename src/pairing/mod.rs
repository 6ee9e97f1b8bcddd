//! Pairing gate for unprovisioned devices.
//!
//! A single global switch. While armed, any device polling `/ping` receives
//! the credential bundle (network + broker) and is recorded as `pairing`.
//! While disarmed, polls get a plain acknowledgment.
//!
//! The handshake is unauthenticated. Embedded clients hold no prior
//! credentials; the operator arms the gate right before powering on a new
//! device.

mod gate;

pub use gate::{
    PairingBundle, PairingGate, PairingResponse, PairingStatus, PollOutcome,
    StartPairingRequest,
};
