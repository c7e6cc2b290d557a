//! Media-Gateway Trait-Definitionen
//!
//! Definiert die Schnittstelle zum externen Media-Gateway (SDP-Verarbeitung,
//! ICE, Medien-Weiterleitung). Der Signaling-Kern ruft nur diese Traits auf;
//! die konkreten Implementierungen (Kurento, In-Memory) liegen im
//! `groupcall-media`-Crate.
//!
//! ## Ereignisse
//! Jeder Endpoint liefert seine asynchronen Ereignisse ueber genau einen
//! Broadcast-Kanal (`ereignisse_abonnieren`). Der Konsument matcht auf
//! `EndpointEvent`; nur `IceKandidatGefunden` hat eine beobachtbare Wirkung.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{IceCandidate, MediaKind};
use crate::Result;

/// Asynchrone Ereignisse eines Media-Endpoints
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// Ein lokaler ICE-Kandidat wurde gefunden und muss an den Client
    IceKandidatGefunden(IceCandidate),
    /// Kandidatensammlung abgeschlossen
    IceSammlungAbgeschlossen,
    /// Sonstige Zustandsaenderung (Medienfluss, Verbindung, ICE-Komponente ...)
    ZustandGeaendert { ereignis: String, zustand: String },
    /// Fehler im Gateway-Element
    Fehler { code: i64, beschreibung: String },
}

/// Einstiegspunkt zum Media-Gateway
#[async_trait]
pub trait MediaGateway: Send + Sync + 'static {
    /// Erstellt eine neue Pipeline (ein Ressourcen-Container pro Raum)
    async fn pipeline_erstellen(&self) -> Result<Arc<dyn MediaPipeline>>;

    /// Gibt an ob das Gateway aktuell erreichbar ist (fuer `/health`)
    fn ist_verfuegbar(&self) -> bool {
        true
    }
}

/// Gateway-seitige Pipeline; gehoert exklusiv einem Raum
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Gateway-ID der Pipeline
    fn id(&self) -> &str;

    /// Erstellt einen WebRTC-Endpoint innerhalb dieser Pipeline
    async fn endpoint_erstellen(&self) -> Result<Arc<dyn MediaEndpoint>>;

    /// Gibt die Pipeline samt aller Endpoints frei
    async fn freigeben(&self) -> Result<()>;
}

/// Gateway-seitiger Medien-Transceiver
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Gateway-ID des Endpoints
    fn id(&self) -> &str;

    /// Verarbeitet ein SDP-Offer und liefert die SDP-Answer
    async fn angebot_verarbeiten(&self, sdp_offer: &str) -> Result<String>;

    /// Startet die ICE-Kandidatensammlung
    async fn kandidaten_sammeln(&self) -> Result<()>;

    /// Verbindet diesen Endpoint (Quelle) mit `senke`, optional auf eine Medienart beschraenkt
    async fn verbinden(&self, senke: &dyn MediaEndpoint, art: MediaKind) -> Result<()>;

    /// Fuegt einen entfernten ICE-Kandidaten hinzu
    async fn ice_kandidat_hinzufuegen(&self, kandidat: IceCandidate) -> Result<()>;

    /// Gibt den Endpoint frei
    async fn freigeben(&self) -> Result<()>;

    /// Abonniert die Ereignisse dieses Endpoints
    fn ereignisse_abonnieren(&self) -> broadcast::Receiver<EndpointEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ereignisse_vergleichbar() {
        let a = EndpointEvent::ZustandGeaendert {
            ereignis: "MediaFlowInStateChange".into(),
            zustand: "FLOWING".into(),
        };
        assert_eq!(a.clone(), a);
        assert_ne!(a, EndpointEvent::IceSammlungAbgeschlossen);
    }
}
