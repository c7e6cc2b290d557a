//! Raum-Handler – JoinRoom, LeaveRoom und gemeinsamer Beitrittspfad
//!
//! Eine Verbindung hat hoechstens eine aktive Session. Tritt sie einem
//! weiteren Raum bei, wird die vorherige Session zuerst beendet.

use groupcall_core::types::RoomId;
use groupcall_protocol::signaling::JoinRoomRequest;
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::{SignalingError, SignalingResult};
use crate::room::Room;
use crate::server_state::SignalingState;
use crate::session::UserSession;

/// Verarbeitet `joinRoom`
///
/// Leerer Name oder leerer Raum: keine Session, keine Ablehnung.
pub async fn handle_join_room(
    request: JoinRoomRequest,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    let raum_id = RoomId::from(request.room);
    match raum_beitreten(state, &raum_id, &request.name, verbindung, None).await {
        Ok(_) => Ok(()),
        Err(SignalingError::Protokoll(grund)) => {
            tracing::warn!(
                verbindung = %verbindung.id(),
                raum = %raum_id,
                grund = %grund,
                "Beitritt ohne Session verworfen"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Verarbeitet `leaveRoom`
pub async fn handle_leave_room(
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    let session = state
        .sitzungen
        .entfernen(&verbindung.id())
        .ok_or_else(|| SignalingError::nicht_gefunden("Keine aktive Session"))?;

    sitzung_beenden(&session, verbindung, state).await;
    Ok(())
}

/// Tritt einem Raum bei und registriert die Session fuer die Verbindung
///
/// Mit `anrufer` wird der Raum vor dem Beitritt als Anrufraum markiert,
/// sodass keine automatischen Teilnehmer-Meldungen entstehen. Wurde der
/// Raum zwischen Nachschlagen und Beitritt geschlossen, wird einmal mit
/// einem neuen Raum wiederholt.
pub(crate) async fn raum_beitreten(
    state: &Arc<SignalingState>,
    raum_id: &RoomId,
    name: &str,
    verbindung: &ConnectionHandle,
    anrufer: Option<&str>,
) -> SignalingResult<(Arc<Room>, Arc<UserSession>)> {
    if name.is_empty() || raum_id.ist_leer() {
        return Err(SignalingError::protokoll("Name oder Raum ist leer"));
    }

    if let Some(vorherige) = state.sitzungen.entfernen(&verbindung.id()) {
        tracing::debug!(
            verbindung = %verbindung.id(),
            raum = %vorherige.raum_id(),
            "Vorherige Session wird beendet"
        );
        sitzung_beenden(&vorherige, verbindung, state).await;
    }

    for versuch in 0..2 {
        let raum = state.raeume.holen_oder_erstellen(raum_id).await?;
        if let Some(anrufer) = anrufer {
            raum.anrufer_setzen(anrufer);
        }

        match raum.beitreten(name, verbindung.clone()).await {
            Ok(session) => {
                state.sitzungen.registrieren(Arc::clone(&session));
                let ausgetragen = state.sitzungen.ersetzte_entfernen(&session);
                if ausgetragen > 0 {
                    tracing::debug!(
                        raum = %raum_id,
                        teilnehmer = %name,
                        ausgetragen,
                        "Session anderer Verbindung unter gleichem Namen ausgetragen"
                    );
                }
                return Ok((raum, session));
            }
            Err(SignalingError::RaumGeschlossen(_)) if versuch == 0 => {
                tracing::debug!(raum = %raum_id, "Raum waehrend Beitritt geschlossen, neuer Versuch");
            }
            Err(e) => {
                state.raeume.entfernen(&raum).await;
                return Err(e);
            }
        }
    }

    Err(SignalingError::RaumGeschlossen(raum_id.to_string()))
}

/// Beendet eine Session: Raum verlassen, leeren Raum entfernen, Hinweis loeschen
///
/// Die Session muss bereits aus der Session-Registry entfernt sein.
pub(crate) async fn sitzung_beenden(
    session: &Arc<UserSession>,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) {
    match state.raeume.holen(session.raum_id()) {
        Some(raum) => {
            let entfernt = raum.verlassen(session).await;
            state.raeume.entfernen(&raum).await;
            if !entfernt {
                // Name ist unter einer anderen Verbindung weiter im Raum
                return;
            }
        }
        None => session.schliessen().await,
    }

    if let Some(bindung) = state.presence.bindung_fuer_verbindung(&verbindung.id()) {
        state
            .presence
            .raum_hinweis_setzen(&bindung.domain, session.name(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use groupcall_media::InMemoryGateway;

    fn state() -> (Arc<SignalingState>, InMemoryGateway) {
        let gateway = InMemoryGateway::neu();
        (
            SignalingState::neu(SignalingConfig::default(), Arc::new(gateway.clone())),
            gateway,
        )
    }

    fn join(raum: &str, name: &str) -> JoinRoomRequest {
        JoinRoomRequest {
            room: raum.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn leerer_name_erzeugt_keine_session() {
        let (state, gateway) = state();
        let (h, mut rx) = ConnectionHandle::neu(8);

        handle_join_room(join("lobby", ""), &h, &state).await.unwrap();
        handle_join_room(join("", "alice"), &h, &state).await.unwrap();

        assert!(state.sitzungen.holen(&h.id()).is_none());
        assert_eq!(state.raeume.anzahl(), 0);
        assert_eq!(gateway.pipeline_anzahl(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn zweiter_beitritt_verlaesst_vorherigen_raum() {
        let (state, _gateway) = state();
        let (h, _rx) = ConnectionHandle::neu(8);

        handle_join_room(join("eins", "alice"), &h, &state).await.unwrap();
        handle_join_room(join("zwei", "alice"), &h, &state).await.unwrap();

        assert!(state.raeume.holen(&RoomId::from("eins")).is_none());
        let session = state.sitzungen.holen(&h.id()).unwrap();
        assert_eq!(session.raum_id().as_str(), "zwei");
        assert_eq!(state.raeume.anzahl(), 1);
    }

    #[tokio::test]
    async fn leave_ohne_session_ist_fehler() {
        let (state, _gateway) = state();
        let (h, _rx) = ConnectionHandle::neu(8);
        assert!(matches!(
            handle_leave_room(&h, &state).await,
            Err(SignalingError::NichtGefunden(_))
        ));
    }

    #[tokio::test]
    async fn gateway_fehler_hinterlaesst_keinen_raum() {
        let (state, gateway) = state();
        gateway.pipeline_fehler_setzen(true);
        let (h, _rx) = ConnectionHandle::neu(8);

        assert!(matches!(
            handle_join_room(join("lobby", "alice"), &h, &state).await,
            Err(SignalingError::Gateway(_))
        ));
        assert_eq!(state.raeume.anzahl(), 0);
        assert!(state.sitzungen.holen(&h.id()).is_none());
    }

    #[tokio::test]
    async fn anrufer_raum_sendet_keine_meldungen() {
        let (state, _gateway) = state();
        let (h, mut rx) = ConnectionHandle::neu(8);
        let id = RoomId::generieren();

        let (raum, _session) = raum_beitreten(&state, &id, "alice", &h, Some("alice"))
            .await
            .unwrap();

        assert_eq!(raum.anrufer().as_deref(), Some("alice"));
        assert!(rx.try_recv().is_err());
    }
}
