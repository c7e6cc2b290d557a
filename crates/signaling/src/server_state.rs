//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt Presence-Verzeichnis, Raum- und Session-Registry sowie einfache
//! Zaehler. Eine Instanz pro Prozess, als `Arc` an Dispatcher und
//! Verbindungs-Tasks verteilt.

use dashmap::DashMap;
use groupcall_core::media::MediaGateway;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::presence::PresenceDirectory;
use crate::registry::{RoomRegistry, SessionRegistry};

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Akzeptierte WebSocket-Pfade
    pub pfade: Vec<String>,
    /// Maximale Groesse eines Text-Frames in Bytes
    pub max_nachrichten_groesse: usize,
    /// Idle-Timeout einer Verbindung in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Kapazitaet der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_verbindungen: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            pfade: vec!["/webSocketServer".to_string(), "/".to_string()],
            max_nachrichten_groesse: 32 * 1024,
            verbindungs_timeout_sek: 60,
            send_queue_groesse: 256,
            max_verbindungen: 10_000,
        }
    }
}

/// Momentaufnahme des Signaling-Zustands (fuer Metriken und `/health`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalingStatistik {
    pub verbindungen: usize,
    pub identitaeten: usize,
    pub bindungen: usize,
    pub raeume: usize,
    pub teilnehmer: usize,
    pub sitzungen: usize,
    /// Verarbeitete Nachrichten je `kind`
    pub nachrichten: BTreeMap<String, u64>,
    /// Gesendete Ablehnungen je `kind`
    pub ablehnungen: BTreeMap<String, u64>,
    pub uptime_sek: u64,
    pub gateway_verfuegbar: bool,
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    /// Identitaet -> Verbindungen
    pub presence: PresenceDirectory,
    /// Raum-ID -> Raum
    pub raeume: RoomRegistry,
    /// Verbindung -> aktuelle Session
    pub sitzungen: SessionRegistry,
    verbindungen: AtomicUsize,
    nachrichten: DashMap<String, u64>,
    ablehnungen: DashMap<String, u64>,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, gateway: Arc<dyn MediaGateway>) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            presence: PresenceDirectory::neu(),
            raeume: RoomRegistry::neu(gateway),
            sitzungen: SessionRegistry::neu(),
            verbindungen: AtomicUsize::new(0),
            nachrichten: DashMap::new(),
            ablehnungen: DashMap::new(),
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn verbindung_geoeffnet(&self) {
        self.verbindungen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verbindung_geschlossen(&self) {
        let _ = self
            .verbindungen
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn verbindungen_anzahl(&self) -> usize {
        self.verbindungen.load(Ordering::Relaxed)
    }

    /// Zaehlt eine verarbeitete Nachricht
    pub fn nachricht_zaehlen(&self, kind: &str) {
        *self.nachrichten.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Zaehlt eine gesendete Ablehnung
    pub fn ablehnung_zaehlen(&self, kind: &str) {
        *self.ablehnungen.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Erstellt eine Momentaufnahme aller Zaehler
    pub fn statistik(&self) -> SignalingStatistik {
        SignalingStatistik {
            verbindungen: self.verbindungen_anzahl(),
            identitaeten: self.presence.identitaeten_anzahl(),
            bindungen: self.presence.bindungen_anzahl(),
            raeume: self.raeume.anzahl(),
            teilnehmer: self.raeume.teilnehmer_anzahl(),
            sitzungen: self.sitzungen.anzahl(),
            nachrichten: self
                .nachrichten
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            ablehnungen: self
                .ablehnungen
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            uptime_sek: self.uptime_sek(),
            gateway_verfuegbar: self.raeume.gateway_verfuegbar(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupcall_media::InMemoryGateway;

    #[test]
    fn statistik_zaehlt() {
        let state = SignalingState::neu(
            SignalingConfig::default(),
            Arc::new(InMemoryGateway::neu()),
        );
        state.verbindung_geoeffnet();
        state.verbindung_geoeffnet();
        state.verbindung_geschlossen();
        state.nachricht_zaehlen("ping");
        state.nachricht_zaehlen("ping");
        state.ablehnung_zaehlen("leaveRoomResponse");

        let s = state.statistik();
        assert_eq!(s.verbindungen, 1);
        assert_eq!(s.nachrichten.get("ping"), Some(&2));
        assert_eq!(s.ablehnungen.get("leaveRoomResponse"), Some(&1));
        assert!(s.gateway_verfuegbar);
    }

    #[test]
    fn verbindungszaehler_wird_nicht_negativ() {
        let state = SignalingState::neu(
            SignalingConfig::default(),
            Arc::new(InMemoryGateway::neu()),
        );
        state.verbindung_geschlossen();
        assert_eq!(state.verbindungen_anzahl(), 0);
    }

    #[test]
    fn standard_konfiguration() {
        let config = SignalingConfig::default();
        assert_eq!(config.max_nachrichten_groesse, 32768);
        assert_eq!(config.verbindungs_timeout_sek, 60);
        assert!(config.pfade.contains(&"/webSocketServer".to_string()));
    }
}
