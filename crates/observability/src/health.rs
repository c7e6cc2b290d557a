//! Health-Check-Endpunkt fuer Groupcall
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Gateway-Status

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub media_gateway_connected: bool,
    pub rooms: usize,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Wird vom Server-Sampler aktualisiert.
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    gateway_verbunden: Arc<AtomicBool>,
    raeume: Arc<AtomicUsize>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            gateway_verbunden: Arc::new(AtomicBool::new(true)),
            raeume: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn gateway_verbunden(&self) -> bool {
        self.gateway_verbunden.load(Ordering::Relaxed)
    }

    pub fn gateway_status_setzen(&self, verbunden: bool) {
        self.gateway_verbunden.store(verbunden, Ordering::Relaxed);
    }

    pub fn raeume_setzen(&self, anzahl: usize) {
        self.raeume.store(anzahl, Ordering::Relaxed);
    }

    /// Baut die Antwort aus dem aktuellen Stand
    pub fn antwort(&self) -> HealthResponse {
        let gateway = self.gateway_verbunden();
        HealthResponse {
            // Ohne Gateway nimmt der Server weiter Verbindungen an, kann aber
            // keine Raeume erstellen
            status: if gateway {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            media_gateway_connected: gateway,
            rooms: self.raeume.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_ist_healthy() {
        let state = HealthState::neu();
        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Healthy);
        assert!(antwort.uptime_seconds < 5);
    }

    #[test]
    fn ohne_gateway_degraded() {
        let state = HealthState::neu();
        state.gateway_status_setzen(false);
        state.raeume_setzen(3);

        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Degraded);
        assert!(!antwort.media_gateway_connected);
        assert_eq!(antwort.rooms, 3);
    }

    #[test]
    fn clone_teilt_zustand() {
        let state = HealthState::neu();
        let kopie = state.clone();
        kopie.gateway_status_setzen(false);
        assert!(!state.gateway_verbunden());
    }

    #[test]
    fn health_response_serialisierung() {
        let json = serde_json::to_string(&HealthState::neu().antwort()).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"media_gateway_connected\":true"));
        assert!(json.contains("\"rooms\":0"));
    }
}
