//! Media-Handler – ReceiveVideoFrom, OnIceCandidate, ChangeMediaType
//!
//! Alle drei wirken auf die aktuelle Session der Verbindung.

use groupcall_core::types::MediaKind;
use groupcall_protocol::signaling::{
    ChangeMediaTypeRequest, IceCandidateRequest, ReceiveVideoRequest,
};
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::{SignalingError, SignalingResult};
use crate::room::Room;
use crate::server_state::SignalingState;
use crate::session::UserSession;

/// Verarbeitet `receiveVideoFrom`
///
/// Der Sender wird im Raum des Anfragenden gesucht.
pub async fn handle_receive_video_from(
    request: ReceiveVideoRequest,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    let (session, raum) = session_und_raum(verbindung, state)?;
    let sender = raum.teilnehmer_nach_name(&request.sender).ok_or_else(|| {
        SignalingError::nicht_gefunden(format!("Teilnehmer '{}'", request.sender))
    })?;

    session
        .video_empfangen_von(&sender, &request.sdp_offer)
        .await
}

/// Verarbeitet `onIceCandidate`
///
/// Ohne aktive Session wird der Kandidat verworfen.
pub async fn handle_ice_candidate(
    request: IceCandidateRequest,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    let Some(session) = state.sitzungen.holen(&verbindung.id()) else {
        tracing::trace!(verbindung = %verbindung.id(), "ICE-Kandidat ohne Session verworfen");
        return Ok(());
    };

    session
        .ice_kandidat_hinzufuegen(request.candidate, &request.name)
        .await
}

/// Verarbeitet `changeMediaType`
pub async fn handle_change_media_type(
    request: ChangeMediaTypeRequest,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    let (session, raum) = session_und_raum(verbindung, state)?;
    let art = MediaKind::aus_typ(&request.typ);

    tracing::debug!(
        teilnehmer = %session.name(),
        ziel = %request.name,
        art = ?art,
        "Medienart wird umgeschaltet"
    );
    session
        .medientyp_aendern(&raum.teilnehmer(), &request.name, art)
        .await
}

fn session_und_raum(
    verbindung: &ConnectionHandle,
    state: &SignalingState,
) -> SignalingResult<(Arc<UserSession>, Arc<Room>)> {
    let session = state
        .sitzungen
        .holen(&verbindung.id())
        .ok_or_else(|| SignalingError::nicht_gefunden("Keine aktive Session"))?;
    let raum = state
        .raeume
        .holen(session.raum_id())
        .ok_or_else(|| SignalingError::nicht_gefunden(format!("Raum '{}'", session.raum_id())))?;
    Ok((session, raum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::room_handler;
    use crate::server_state::SignalingConfig;
    use groupcall_core::types::IceCandidate;
    use groupcall_media::{GatewayAufruf, InMemoryGateway};
    use groupcall_protocol::signaling::JoinRoomRequest;
    use groupcall_protocol::OutboundMessage;
    use tokio::sync::mpsc;

    fn state() -> (Arc<SignalingState>, InMemoryGateway) {
        let gateway = InMemoryGateway::neu();
        (
            SignalingState::neu(SignalingConfig::default(), Arc::new(gateway.clone())),
            gateway,
        )
    }

    async fn beitreten(
        state: &Arc<SignalingState>,
        name: &str,
    ) -> (ConnectionHandle, mpsc::Receiver<OutboundMessage>) {
        let (h, rx) = ConnectionHandle::neu(32);
        room_handler::handle_join_room(
            JoinRoomRequest {
                room: "lobby".into(),
                name: name.into(),
            },
            &h,
            state,
        )
        .await
        .unwrap();
        (h, rx)
    }

    fn kandidat() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 UDP 2122252543 10.0.0.1 5000 typ host".into(),
            sdp_mid: "0".into(),
            sdp_m_line_index: 0,
        }
    }

    #[tokio::test]
    async fn unbekannter_sender_ist_fehler() {
        let (state, _gateway) = state();
        let (alice, _alice_rx) = beitreten(&state, "alice").await;
        let request = ReceiveVideoRequest {
            sender: "niemand".into(),
            sdp_offer: "v=0".into(),
        };
        assert!(matches!(
            handle_receive_video_from(request, &alice, &state).await,
            Err(SignalingError::NichtGefunden(_))
        ));
    }

    #[tokio::test]
    async fn receive_video_ohne_session_ist_fehler() {
        let (state, _gateway) = state();
        let (h, _rx) = ConnectionHandle::neu(4);
        let request = ReceiveVideoRequest {
            sender: "alice".into(),
            sdp_offer: "v=0".into(),
        };
        assert!(handle_receive_video_from(request, &h, &state).await.is_err());
    }

    #[tokio::test]
    async fn ice_ohne_session_wird_ignoriert() {
        let (state, gateway) = state();
        let (h, _rx) = ConnectionHandle::neu(4);
        let request = IceCandidateRequest {
            candidate: kandidat(),
            name: "alice".into(),
        };
        handle_ice_candidate(request, &h, &state).await.unwrap();
        assert!(gateway.aufrufe().is_empty());
    }

    #[tokio::test]
    async fn ice_fuer_eigenen_namen_geht_an_ausgehenden_endpoint() {
        let (state, gateway) = state();
        let (alice, _alice_rx) = beitreten(&state, "alice").await;
        let session = state.sitzungen.holen(&alice.id()).unwrap();
        let request = IceCandidateRequest {
            candidate: kandidat(),
            name: "alice".into(),
        };

        handle_ice_candidate(request, &alice, &state).await.unwrap();
        assert_eq!(gateway.kandidaten_fuer(session.ausgehend().id()).len(), 1);
    }

    #[tokio::test]
    async fn medienart_verbindet_mit_art() {
        let (state, gateway) = state();
        let (alice, _alice_rx) = beitreten(&state, "alice").await;
        let (_bob, _bob_rx) = beitreten(&state, "bob").await;

        let request = ChangeMediaTypeRequest {
            typ: "AUDIO".into(),
            name: "alice".into(),
        };
        handle_change_media_type(request, &alice, &state).await.unwrap();

        assert!(gateway.aufrufe().iter().any(|a| matches!(
            a,
            GatewayAufruf::Verbunden { art: MediaKind::Audio, .. }
        )));
    }
}
