//! Anruf-Handler – Call und IncomingCallResponse
//!
//! Ablauf eines Ad-hoc-Anrufs:
//! ```text
//! Anrufer --call-->  frischer Raum, Anrufer tritt bei, Raum-Hinweise setzen
//!                    -> incomingCall an alle Bindungen jedes Empfaengers
//! Empfaenger --incomingCallResponse(accept)-->
//!                    -> Anrufer bekommt Teilnehmerliste (falls noch allein)
//!                    -> Empfaenger tritt bei, bekommt Teilnehmerliste
//!                    -> uebrige Teilnehmer bekommen newParticipantArrived
//! ```

use groupcall_core::types::RoomId;
use groupcall_protocol::signaling::{CallRequest, IncomingCallResponse};
use groupcall_protocol::{RejectionResponse, SignalMessage};
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::{SignalingError, SignalingResult};
use crate::handlers::room_handler::raum_beitreten;
use crate::room::Room;
use crate::server_state::SignalingState;

/// Verarbeitet `call`
///
/// Ein im Request mitgeschickter Raum wird ignoriert; jeder Anruf bekommt
/// eine frische Raum-ID.
pub async fn handle_call(
    request: CallRequest,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    if request.from.is_empty() {
        return Err(SignalingError::protokoll("Anrufer fehlt"));
    }
    if let Some(vorgegeben) = &request.room {
        tracing::debug!(raum = %vorgegeben, "Vorgegebener Raum ignoriert");
    }

    let raum_id = RoomId::generieren();
    let domain = request.domain.to_lowercase();

    raum_beitreten(state, &raum_id, &request.from, verbindung, Some(&request.from)).await?;
    state
        .presence
        .raum_hinweis_setzen(&domain, &request.from, Some(raum_id.clone()));

    tracing::info!(
        anrufer = %request.from,
        raum = %raum_id,
        an = %request.to,
        "Anruf gestartet"
    );

    for empfaenger in request.empfaenger() {
        let bindungen = state.presence.bindungen_fuer(&domain, empfaenger);
        if bindungen.is_empty() {
            tracing::info!(empfaenger = %empfaenger, "Empfaenger nicht erreichbar");
            continue;
        }

        state
            .presence
            .raum_hinweis_setzen(&domain, empfaenger, Some(raum_id.clone()));

        for bindung in bindungen.iter().filter(|b| b.verbindung.ist_offen()) {
            let anruf = SignalMessage::IncomingCall {
                from: request.from.clone(),
            };
            if let Err(e) = bindung.verbindung.senden(anruf) {
                tracing::warn!(
                    empfaenger = %empfaenger,
                    verbindung = %bindung.verbindung.id(),
                    fehler = %e,
                    "incomingCall nicht zugestellt"
                );
                let ablehnung = RejectionResponse::fuer(Some("call"), e.to_string());
                state.ablehnung_zaehlen(&ablehnung.kind);
                if bindung.verbindung.senden(ablehnung).is_err() {
                    tracing::debug!(
                        verbindung = %bindung.verbindung.id(),
                        "callResponse konnte nicht zugestellt werden"
                    );
                }
            }
        }
    }

    Ok(())
}

/// Verarbeitet `incomingCallResponse`
///
/// Nur `accept` fuehrt zum Beitritt; jede andere Antwort wird protokolliert.
/// Der Angerufene tritt unter dem Benutzernamen seiner Bindung bei.
pub async fn handle_incoming_call_response(
    request: IncomingCallResponse,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    if !request.ist_angenommen() {
        tracing::info!(
            anrufer = %request.from,
            antwort = %request.call_response,
            "Anruf nicht angenommen"
        );
        return Ok(());
    }

    let angerufener = state
        .presence
        .bindung_fuer_verbindung(&verbindung.id())
        .ok_or_else(|| SignalingError::nicht_gefunden("Verbindung ohne Identitaet"))?;

    let raum_id = state
        .presence
        .raum_hinweis(&angerufener.domain, &request.from)
        .or_else(|| angerufener.raum_hinweis.clone())
        .ok_or_else(|| {
            SignalingError::nicht_gefunden(format!("Kein Anruf von '{}'", request.from))
        })?;

    let raum = state
        .raeume
        .holen(&raum_id)
        .ok_or_else(|| SignalingError::nicht_gefunden(format!("Raum '{raum_id}'")))?;

    anrufer_informieren(&raum);

    let (raum, session) =
        raum_beitreten(state, &raum_id, &angerufener.username, verbindung, None).await?;

    // Ohne Anrufer hat der Raum beim Beitritt bereits selbst gemeldet
    if raum.anrufer().is_some() {
        raum.teilnehmer_namen_senden(&session);
        raum.neuen_teilnehmer_melden(&session);
    }

    tracing::info!(
        anrufer = %request.from,
        angerufener = %session.name(),
        raum = %raum_id,
        "Anruf angenommen"
    );
    Ok(())
}

/// Schickt dem noch allein wartenden Anrufer die Teilnehmerliste
fn anrufer_informieren(raum: &Room) {
    let Some(anrufer) = raum.anrufer() else {
        tracing::error!(raum = %raum.id(), "Anrufraum ohne Anrufer");
        return;
    };
    if raum.anzahl() != 1 {
        return;
    }

    let Some(session) = raum.teilnehmer_nach_name(&anrufer) else {
        return;
    };
    let liste = SignalMessage::ExistingParticipants {
        data: raum.teilnehmer_namen(),
    };
    if let Err(e) = session.senden(liste) {
        tracing::warn!(anrufer = %anrufer, fehler = %e, "Teilnehmerliste nicht zugestellt");
    }
}
