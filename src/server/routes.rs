//! HTTP routes: the device pairing handshake and the operator API.
//!
//! ```text
//! GET  /                        banner
//! GET  /ping?mac=..             device poll
//! GET  /api/devices             registry snapshot
//! GET  /api/devices/history     last status per device from the store
//! GET  /api/network/interfaces  broker address candidates
//! POST /api/pairing/start       arm the gate
//! POST /api/pairing/stop        disarm the gate
//! GET  /api/pairing/status      gate state
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::network;
use crate::error::PairingError;
use crate::pairing::{PollOutcome, StartPairingRequest};
use crate::relay::DeviceRelay;

/// Banner served at `/`.
pub const BANNER: &str = "ESP32 Manager - Backend Running";

/// Shared state for all handlers.
pub struct AppState {
    pub relay: Arc<DeviceRelay>,
    /// Advertised host address, overriding interface discovery.
    pub host_ip: Option<String>,
}

/// Error body for every non-2xx JSON response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartPairingResponse {
    pub success: bool,
    pub message: String,
    pub broker: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopPairingResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PingQuery {
    pub mac: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for PairingError {
    fn into_response(self) -> Response {
        error_response(StatusCode::BAD_REQUEST, self.to_string())
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/history", get(device_history))
        .route("/api/network/interfaces", get(network_interfaces))
        .route("/api/pairing/start", post(start_pairing))
        .route("/api/pairing/stop", post(stop_pairing))
        .route("/api/pairing/status", get(pairing_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn index() -> &'static str {
    BANNER
}

/// Device poll. Disarmed: `OK`. Armed: the credential bundle as JSON.
async fn ping(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<PingQuery>,
) -> Response {
    let client_ip = client_ip(peer);
    match state.relay.poll(query.mac.as_deref(), &client_ip).await {
        Ok(PollOutcome::Acknowledge) => "OK".into_response(),
        Ok(PollOutcome::Credentials(response)) => Json(response).into_response(),
        Err(e) => {
            tracing::warn!(ip = %client_ip, error = %e, "Rejected pairing poll");
            e.into_response()
        }
    }
}

/// Peer address as text, with IPv4-mapped IPv6 addresses unmapped.
fn client_ip(peer: SocketAddr) -> String {
    match peer.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.relay.devices().await)
}

async fn device_history(State(state): State<Arc<AppState>>) -> Response {
    match state.relay.history().latest_status().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "History query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn network_interfaces(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(network::discover(state.host_ip.as_deref()))
}

async fn start_pairing(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartPairingRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.relay.start_pairing(request).await {
        Ok(bundle) => (
            StatusCode::OK,
            Json(StartPairingResponse {
                success: true,
                message: "Pairing mode enabled".to_string(),
                broker: bundle.broker,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn stop_pairing(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.relay.stop_pairing().await;
    Json(StopPairingResponse {
        success: true,
        message: "Pairing mode disabled".to_string(),
    })
}

async fn pairing_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.relay.pairing_status().await)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    #[test]
    fn test_client_ip_unmaps_ipv4() {
        let mapped = SocketAddr::new(
            IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc0a8, 0x0402)),
            5000,
        );
        assert_eq!(client_ip(mapped), "192.168.4.2");

        let plain: SocketAddr = "10.0.0.7:1234".parse().expect("addr");
        assert_eq!(client_ip(plain), "10.0.0.7");

        let v6: SocketAddr = "[fe80::1]:1234".parse().expect("addr");
        assert_eq!(client_ip(v6), "fe80::1");
    }

    #[test]
    fn test_pairing_error_maps_to_bad_request() {
        let response = PairingError::MissingMac.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
