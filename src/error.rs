//! Error types for devrelay.

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by the pairing gate.
///
/// Both variants are the caller's fault and map to a 400 on the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingError {
    #[error("Missing required fields ({0})")]
    Validation(String),

    #[error("Missing device MAC address")]
    MissingMac,
}

/// Errors decoding an inbound heartbeat. Never surfaced to the transport.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Heartbeat payload is not UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Heartbeat payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Heartbeat payload has no mac")]
    MissingMac,
}

/// Historical store errors. Logged, never propagated into registry updates.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("History store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("History query failed: {0}")]
    Query(String),
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },
}

/// Pub/sub transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid broker address {url}: {reason}")]
    InvalidBroker { url: String, reason: String },

    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
