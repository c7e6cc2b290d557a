//! UserSession – Medienbeziehungen eines Teilnehmers in einem Raum
//!
//! Jede Session besitzt genau einen ausgehenden Endpoint (beim Erstellen
//! angelegt) und lazily erzeugte eingehende Endpoints, einen pro Gegenueber.
//! `endpoint_fuer` ist der einzige Weg auf dem eingehende Endpoints entstehen.
//!
//! Gateway-Ereignisse jedes Endpoints werden von genau einem Task gelesen;
//! nur gefundene ICE-Kandidaten erzeugen eine Nachricht an den Client.

use groupcall_core::media::{EndpointEvent, MediaEndpoint, MediaPipeline};
use groupcall_core::types::{IceCandidate, MediaKind, RoomId};
use groupcall_protocol::SignalMessage;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::connection::ConnectionHandle;
use crate::error::SignalingResult;

/// Ein Teilnehmer in genau einem Raum
pub struct UserSession {
    name: String,
    raum_id: RoomId,
    verbindung: ConnectionHandle,
    pipeline: Arc<dyn MediaPipeline>,
    ausgehend: Arc<dyn MediaEndpoint>,
    /// Name des Gegenuebers -> eingehender Endpoint
    eingehend: Mutex<HashMap<String, Arc<dyn MediaEndpoint>>>,
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("name", &self.name)
            .field("raum_id", &self.raum_id)
            .field("verbindung", &self.verbindung.id())
            .field("ausgehend", &self.ausgehend.id())
            .finish()
    }
}

impl UserSession {
    /// Erstellt die Session samt ausgehendem Endpoint
    pub async fn neu(
        name: impl Into<String>,
        raum_id: RoomId,
        verbindung: ConnectionHandle,
        pipeline: Arc<dyn MediaPipeline>,
    ) -> SignalingResult<Self> {
        let name = name.into();
        let ausgehend = pipeline.endpoint_erstellen().await?;
        ereignisse_weiterleiten(&ausgehend, name.clone(), verbindung.clone());

        tracing::debug!(
            teilnehmer = %name,
            raum = %raum_id,
            endpoint = ausgehend.id(),
            "Session erstellt"
        );

        Ok(Self {
            name,
            raum_id,
            verbindung,
            pipeline,
            ausgehend,
            eingehend: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raum_id(&self) -> &RoomId {
        &self.raum_id
    }

    pub fn verbindung(&self) -> &ConnectionHandle {
        &self.verbindung
    }

    /// Der ausgehende Endpoint dieses Teilnehmers
    pub fn ausgehend(&self) -> &Arc<dyn MediaEndpoint> {
        &self.ausgehend
    }

    /// Sendet eine Nachricht an den Client dieser Session
    pub fn senden(&self, nachricht: SignalMessage) -> SignalingResult<()> {
        self.verbindung.senden(nachricht)
    }

    /// Liefert den Endpoint ueber den dieser Teilnehmer Medien von `gegenueber` empfaengt
    ///
    /// Fuer sich selbst ist das der ausgehende Endpoint (Loopback). Sonst
    /// wird der eingehende Endpoint bei Bedarf erstellt und der ausgehende
    /// Endpoint des Gegenuebers hineinverbunden.
    pub async fn endpoint_fuer(
        &self,
        gegenueber: &UserSession,
    ) -> SignalingResult<Arc<dyn MediaEndpoint>> {
        if gegenueber.name == self.name {
            tracing::debug!(teilnehmer = %self.name, "Loopback konfiguriert");
            return Ok(Arc::clone(&self.ausgehend));
        }

        let mut eingehend = self.eingehend.lock().await;
        if let Some(endpoint) = eingehend.get(&gegenueber.name) {
            return Ok(Arc::clone(endpoint));
        }

        let endpoint = self.pipeline.endpoint_erstellen().await?;
        ereignisse_weiterleiten(&endpoint, gegenueber.name.clone(), self.verbindung.clone());
        gegenueber
            .ausgehend
            .verbinden(endpoint.as_ref(), MediaKind::Beide)
            .await?;
        eingehend.insert(gegenueber.name.clone(), Arc::clone(&endpoint));

        tracing::debug!(
            teilnehmer = %self.name,
            von = %gegenueber.name,
            endpoint = endpoint.id(),
            "Eingehender Endpoint erstellt"
        );
        Ok(endpoint)
    }

    /// Verarbeitet ein SDP-Offer fuer den Empfang von `sender`
    ///
    /// Die Answer geht als `receiveVideoAnswer` an den eigenen Client,
    /// danach startet die Kandidatensammlung.
    pub async fn video_empfangen_von(
        &self,
        sender: &UserSession,
        sdp_offer: &str,
    ) -> SignalingResult<()> {
        tracing::info!(teilnehmer = %self.name, von = %sender.name, raum = %self.raum_id, "Verbinde Videostrom");

        let endpoint = self.endpoint_fuer(sender).await?;
        let sdp_answer = endpoint.angebot_verarbeiten(sdp_offer).await?;

        if let Err(e) = self.senden(SignalMessage::ReceiveVideoAnswer {
            name: sender.name.clone(),
            sdp_answer,
        }) {
            tracing::warn!(teilnehmer = %self.name, fehler = %e, "receiveVideoAnswer nicht zugestellt");
        }

        endpoint.kandidaten_sammeln().await?;
        Ok(())
    }

    /// Entfernt und gibt den eingehenden Endpoint von `name` frei
    ///
    /// Ohne vorhandenen Endpoint passiert nichts.
    pub async fn video_abbrechen_von(&self, name: &str) {
        let endpoint = self.eingehend.lock().await.remove(name);
        match endpoint {
            Some(endpoint) => {
                tracing::debug!(teilnehmer = %self.name, von = %name, "Videoempfang beendet");
                freigabe_starten(endpoint, format!("{} <- {}", self.name, name));
            }
            None => {
                tracing::trace!(teilnehmer = %self.name, von = %name, "Kein eingehender Endpoint");
            }
        }
    }

    /// Leitet einen entfernten ICE-Kandidaten an den passenden Endpoint
    ///
    /// Eigener Name: ausgehender Endpoint. Sonst der eingehende Endpoint des
    /// Gegenuebers, falls vorhanden; ansonsten wird der Kandidat verworfen.
    pub async fn ice_kandidat_hinzufuegen(
        &self,
        kandidat: IceCandidate,
        name: &str,
    ) -> SignalingResult<()> {
        if name == self.name {
            self.ausgehend.ice_kandidat_hinzufuegen(kandidat).await?;
            return Ok(());
        }

        let endpoint = self.eingehend.lock().await.get(name).cloned();
        match endpoint {
            Some(endpoint) => endpoint.ice_kandidat_hinzufuegen(kandidat).await?,
            None => {
                tracing::trace!(teilnehmer = %self.name, von = %name, "ICE-Kandidat ohne Endpoint verworfen");
            }
        }
        Ok(())
    }

    /// Verbindet den eigenen ausgehenden Endpoint neu, beschraenkt auf `art`
    ///
    /// Durchlaeuft `teilnehmer` in Reihenfolge und stoppt direkt nach dem
    /// Teilnehmer `name`; davor liegende Teilnehmer werden ebenfalls
    /// umkonfiguriert.
    pub async fn medientyp_aendern(
        &self,
        teilnehmer: &[Arc<UserSession>],
        name: &str,
        art: MediaKind,
    ) -> SignalingResult<()> {
        for anderer in teilnehmer {
            if anderer.name == self.name {
                continue;
            }

            let senke = anderer.endpoint_fuer(self).await?;
            self.ausgehend.verbinden(senke.as_ref(), art).await?;
            tracing::debug!(teilnehmer = %self.name, zu = %anderer.name, art = ?art, "Medienart geaendert");

            if name != self.name && anderer.name == name {
                break;
            }
        }
        Ok(())
    }

    /// Gibt alle Endpoints frei, ohne auf den Abschluss zu warten
    pub async fn schliessen(&self) {
        tracing::info!(teilnehmer = %self.name, raum = %self.raum_id, "Session wird geschlossen");

        let eingehend: Vec<_> = self.eingehend.lock().await.drain().collect();
        for (von, endpoint) in eingehend {
            freigabe_starten(endpoint, format!("{} <- {}", self.name, von));
        }
        freigabe_starten(Arc::clone(&self.ausgehend), format!("{} ->", self.name));
    }

    /// Namen der Gegenueber mit eingehendem Endpoint
    pub async fn eingehende_namen(&self) -> Vec<String> {
        let mut namen: Vec<String> = self.eingehend.lock().await.keys().cloned().collect();
        namen.sort();
        namen
    }

    /// Eingehender Endpoint fuer `name`, falls vorhanden
    pub async fn eingehender_endpoint(&self, name: &str) -> Option<Arc<dyn MediaEndpoint>> {
        self.eingehend.lock().await.get(name).cloned()
    }
}

impl PartialEq for UserSession {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.raum_id == other.raum_id
    }
}

impl Eq for UserSession {}

impl Hash for UserSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.raum_id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

/// Startet die Freigabe eines Endpoints im Hintergrund
fn freigabe_starten(endpoint: Arc<dyn MediaEndpoint>, bezeichnung: String) {
    tokio::spawn(async move {
        match endpoint.freigeben().await {
            Ok(()) => tracing::debug!(endpoint = %bezeichnung, "Endpoint freigegeben"),
            Err(e) => tracing::error!(endpoint = %bezeichnung, fehler = %e, "Endpoint-Freigabe fehlgeschlagen"),
        }
    });
}

/// Liest die Ereignisse eines Endpoints und leitet ICE-Kandidaten an den Client
///
/// `name` ist der Teilnehmer dessen Medien ueber diesen Endpoint laufen.
/// Der Task endet wenn der Ereignis-Kanal oder die Verbindung schliesst.
fn ereignisse_weiterleiten(
    endpoint: &Arc<dyn MediaEndpoint>,
    name: String,
    verbindung: ConnectionHandle,
) {
    let mut rx = endpoint.ereignisse_abonnieren();
    let endpoint_id = endpoint.id().to_string();

    tokio::spawn(async move {
        loop {
            let ereignis = tokio::select! {
                ereignis = rx.recv() => ereignis,
                _ = verbindung.geschlossen() => break,
            };

            match ereignis {
                Ok(EndpointEvent::IceKandidatGefunden(candidate)) => {
                    tracing::trace!(endpoint = %endpoint_id, name = %name, "ICE-Kandidat gefunden");
                    let _ = verbindung.senden(SignalMessage::IceCandidate {
                        name: name.clone(),
                        candidate,
                    });
                }
                Ok(EndpointEvent::Fehler { code, beschreibung }) => {
                    tracing::error!(endpoint = %endpoint_id, code, beschreibung = %beschreibung, "Endpoint-Fehler");
                }
                Ok(EndpointEvent::IceSammlungAbgeschlossen) => {
                    tracing::debug!(endpoint = %endpoint_id, "ICE-Sammlung abgeschlossen");
                }
                Ok(EndpointEvent::ZustandGeaendert { ereignis, zustand }) => {
                    tracing::debug!(endpoint = %endpoint_id, ereignis = %ereignis, zustand = %zustand, "Endpoint-Zustand");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(endpoint = %endpoint_id, verpasst = n, "Endpoint-Ereignisse verpasst");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
