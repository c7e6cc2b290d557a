//! Message-Dispatcher – Routet eingehende Frames an die richtigen Handler
//!
//! Der Dispatcher dekodiert einen Text-Frame, bestimmt anhand von `kind`
//! den Handler und meldet Fehler als Ablehnung an die anfragende
//! Verbindung zurueck. Nachrichten ohne `kind` werden still verworfen,
//! unbekannte `kind`-Werte nur protokolliert.
//!
//! ## Fehlerumschlag
//! ```text
//! { "kind": "<kind>Response", "response": "rejected", "message": "..." }
//! { "kind": "Error",          "response": "rejected", "message": "..." }  // kind unbekannt
//! ```

use groupcall_protocol::signaling::IdentifyRequest;
use groupcall_protocol::{InboundMessage, RejectionResponse};
use std::fmt::Display;
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::SignalingResult;
use crate::handlers::{call_handler, media_handler, presence_handler, room_handler};
use crate::server_state::SignalingState;

/// Metrik-Label fuer nicht unterstuetzte `kind`-Werte
const KIND_UNBEKANNT: &str = "unbekannt";

/// Zentraler Message-Dispatcher
///
/// Haelt keinen Verbindungszustand; eine Instanz pro Verbindungs-Task.
pub struct SignalingDispatcher {
    state: Arc<SignalingState>,
}

impl SignalingDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<SignalingState> {
        &self.state
    }

    /// Verarbeitet einen eingehenden Text-Frame
    ///
    /// Fehler werden nie an den Aufrufer weitergereicht: sie enden als
    /// Ablehnung auf der Verbindung, die Verbindung bleibt offen.
    pub async fn verarbeiten(&self, verbindung: &ConnectionHandle, rohdaten: &str) {
        let nachricht = match InboundMessage::dekodieren(rohdaten) {
            Ok(Some(n)) => n,
            Ok(None) => {
                tracing::trace!(verbindung = %verbindung.id(), "Frame ohne kind verworfen");
                return;
            }
            Err(e) => {
                let kind = e.kind().map(str::to_string);
                self.ablehnen(verbindung, kind.as_deref(), &e);
                return;
            }
        };

        let kind = nachricht.kind().to_string();
        let metrik_kind = match &nachricht {
            InboundMessage::Unbekannt(_) => KIND_UNBEKANNT,
            _ => kind.as_str(),
        };
        self.state.nachricht_zaehlen(metrik_kind);

        tracing::debug!(verbindung = %verbindung.id(), kind = %kind, "Nachricht empfangen");

        if let Err(e) = self.dispatch(verbindung, nachricht).await {
            self.ablehnen(verbindung, Some(&kind), &e);
        }
    }

    async fn dispatch(
        &self,
        verbindung: &ConnectionHandle,
        nachricht: InboundMessage,
    ) -> SignalingResult<()> {
        match nachricht {
            // -------------------------------------------------------------------
            // Presence
            // -------------------------------------------------------------------
            InboundMessage::Ping(felder) => {
                presence_handler::handle_ping(felder, verbindung);
                Ok(())
            }
            InboundMessage::Identify(req) => {
                presence_handler::handle_identify(req, verbindung, &self.state)
            }

            // -------------------------------------------------------------------
            // Raeume
            // -------------------------------------------------------------------
            InboundMessage::JoinRoom(req) => {
                room_handler::handle_join_room(req, verbindung, &self.state).await
            }
            InboundMessage::LeaveRoom => {
                room_handler::handle_leave_room(verbindung, &self.state).await
            }

            // -------------------------------------------------------------------
            // Anrufe
            // -------------------------------------------------------------------
            InboundMessage::Call(req) => {
                call_handler::handle_call(req, verbindung, &self.state).await
            }
            InboundMessage::IncomingCallResponse(req) => {
                call_handler::handle_incoming_call_response(req, verbindung, &self.state).await
            }

            // -------------------------------------------------------------------
            // Medien
            // -------------------------------------------------------------------
            InboundMessage::ReceiveVideoFrom(req) => {
                media_handler::handle_receive_video_from(req, verbindung, &self.state).await
            }
            InboundMessage::OnIceCandidate(req) => {
                media_handler::handle_ice_candidate(req, verbindung, &self.state).await
            }
            InboundMessage::ChangeMediaType(req) => {
                media_handler::handle_change_media_type(req, verbindung, &self.state).await
            }

            InboundMessage::Unbekannt(kind) => {
                tracing::debug!(verbindung = %verbindung.id(), kind = %kind, "Unbekannter kind ignoriert");
                Ok(())
            }
        }
    }

    /// Bindet eine Identitaet aus den Handshake-Headern
    ///
    /// Entspricht einem `identify` direkt nach dem Verbindungsaufbau.
    pub fn handshake_binden(&self, verbindung: &ConnectionHandle, identitaet: IdentifyRequest) {
        if let Err(e) = presence_handler::handle_identify(identitaet, verbindung, &self.state) {
            tracing::warn!(verbindung = %verbindung.id(), fehler = %e, "Handshake-Identitaet abgelehnt");
        }
    }

    /// Raeumt nach dem Schliessen einer Verbindung auf
    ///
    /// Verlaesst den Raum der aktuellen Session (leere Raeume werden
    /// entfernt) und loescht alle Presence-Bindungen der Verbindung.
    pub async fn verbindung_getrennt(&self, verbindung: &ConnectionHandle) {
        let conn_id = verbindung.id();

        if let Some(session) = self.state.sitzungen.entfernen(&conn_id) {
            room_handler::sitzung_beenden(&session, verbindung, &self.state).await;
        }

        let entfernt = self.state.presence.verbindung_entfernen(&conn_id);
        tracing::debug!(
            verbindung = %conn_id,
            bindungen = entfernt,
            "Verbindung aufgeraeumt"
        );
    }

    fn ablehnen(&self, verbindung: &ConnectionHandle, kind: Option<&str>, fehler: &dyn Display) {
        let antwort = RejectionResponse::fuer(kind, fehler.to_string());
        tracing::warn!(
            verbindung = %verbindung.id(),
            kind = %antwort.kind,
            fehler = %fehler,
            "Anfrage abgelehnt"
        );
        self.state.ablehnung_zaehlen(&antwort.kind);
        if verbindung.senden(antwort).is_err() {
            tracing::debug!(verbindung = %verbindung.id(), "Ablehnung konnte nicht zugestellt werden");
        }
    }
}
