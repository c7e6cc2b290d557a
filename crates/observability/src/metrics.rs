//! Prometheus-kompatible Metriken fuer Groupcall
//!
//! Registrierte Metriken:
//! - `groupcall_connections_active` – Gauge: Offene WebSocket-Verbindungen
//! - `groupcall_identities_bound` – Gauge: Gebundene Identitaeten
//! - `groupcall_bindings_active` – Gauge: Bindungen (Identitaet x Verbindung)
//! - `groupcall_rooms_active` – Gauge: Aktive Raeume
//! - `groupcall_participants_active` – Gauge: Teilnehmer ueber alle Raeume
//! - `groupcall_media_gateway_up` – Gauge: 1 wenn das Media-Gateway erreichbar ist
//! - `groupcall_messages_total` – Counter: Verarbeitete Nachrichten (kind)
//! - `groupcall_rejections_total` – Counter: Gesendete Ablehnungen (kind)
//!
//! Die Werte werden periodisch aus einer Zustands-Momentaufnahme
//! uebernommen; die Counter werden dabei auf den Gesamtstand nachgezogen.

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Groupcall-Prometheus-Metriken
#[derive(Clone)]
pub struct GroupcallMetrics {
    pub registry: Arc<Registry>,

    // Zustand
    pub connections_active: IntGauge,
    pub identities_bound: IntGauge,
    pub bindings_active: IntGauge,
    pub rooms_active: IntGauge,
    pub participants_active: IntGauge,
    pub media_gateway_up: IntGauge,

    // Nachrichten
    pub messages_total: IntCounterVec,
    pub rejections_total: IntCounterVec,
}

impl GroupcallMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let gauge = |name: &str, hilfe: &str| -> Result<IntGauge> {
            let g = IntGauge::with_opts(Opts::new(name, hilfe))?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let connections_active = gauge(
            "groupcall_connections_active",
            "Anzahl offener WebSocket-Verbindungen",
        )?;
        let identities_bound = gauge(
            "groupcall_identities_bound",
            "Anzahl gebundener Identitaeten",
        )?;
        let bindings_active = gauge(
            "groupcall_bindings_active",
            "Anzahl Bindungen von Identitaeten an Verbindungen",
        )?;
        let rooms_active = gauge("groupcall_rooms_active", "Anzahl aktiver Raeume")?;
        let participants_active = gauge(
            "groupcall_participants_active",
            "Anzahl Teilnehmer ueber alle Raeume",
        )?;
        let media_gateway_up = gauge(
            "groupcall_media_gateway_up",
            "1 wenn das Media-Gateway erreichbar ist",
        )?;

        let messages_total = IntCounterVec::new(
            Opts::new(
                "groupcall_messages_total",
                "Gesamtanzahl verarbeiteter Signaling-Nachrichten",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new(
                "groupcall_rejections_total",
                "Gesamtanzahl gesendeter Ablehnungen",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections_active,
            identities_bound,
            bindings_active,
            rooms_active,
            participants_active,
            media_gateway_up,
            messages_total,
            rejections_total,
        })
    }

    /// Zieht einen Counter auf den Gesamtstand `gesamt` nach
    ///
    /// Counter sind monoton; ein kleinerer Stand wird ignoriert.
    pub fn zaehler_nachziehen(zaehler: &IntCounterVec, kind: &str, gesamt: u64) {
        let counter = zaehler.with_label_values(&[kind]);
        let bisher = counter.get();
        if gesamt > bisher {
            counter.inc_by(gesamt - bisher);
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: GroupcallMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<GroupcallMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = GroupcallMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn zaehler_nachziehen_ist_monoton() {
        let metriken = GroupcallMetrics::neu().unwrap();
        GroupcallMetrics::zaehler_nachziehen(&metriken.messages_total, "ping", 3);
        GroupcallMetrics::zaehler_nachziehen(&metriken.messages_total, "ping", 5);
        GroupcallMetrics::zaehler_nachziehen(&metriken.messages_total, "ping", 4);

        let wert = metriken.messages_total.with_label_values(&["ping"]).get();
        assert_eq!(wert, 5);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = GroupcallMetrics::neu().unwrap();
        metriken.rooms_active.set(2);
        GroupcallMetrics::zaehler_nachziehen(&metriken.rejections_total, "leaveRoomResponse", 1);

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("groupcall_rooms_active 2"));
        assert!(output.contains("groupcall_rejections_total{kind=\"leaveRoomResponse\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
