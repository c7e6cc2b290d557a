//! Presence-Handler – Ping und Identify

use groupcall_protocol::signaling::IdentifyRequest;
use groupcall_protocol::SignalMessage;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::{SignalingError, SignalingResult};
use crate::presence::IdentityMetadata;
use crate::server_state::SignalingState;

/// Beantwortet `ping` mit `pong` und spiegelt alle uebrigen Felder
pub fn handle_ping(felder: Map<String, Value>, verbindung: &ConnectionHandle) {
    if verbindung.senden(SignalMessage::Pong(felder)).is_err() {
        tracing::debug!(verbindung = %verbindung.id(), "Pong nicht zugestellt");
    }
}

/// Bindet die Identitaet `(domain, userId)` an die Verbindung
///
/// Ein erneutes `identify` auf derselben Verbindung aktualisiert nur die
/// Metadaten.
pub fn handle_identify(
    request: IdentifyRequest,
    verbindung: &ConnectionHandle,
    state: &Arc<SignalingState>,
) -> SignalingResult<()> {
    if request.user_id.is_empty() {
        return Err(SignalingError::protokoll("userId fehlt"));
    }

    state.presence.binden(
        &request.domain,
        &request.user_id,
        IdentityMetadata {
            auth_token: request.auth_token,
            display_name: request.display_name,
        },
        verbindung.clone(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use groupcall_media::InMemoryGateway;

    fn state() -> Arc<SignalingState> {
        SignalingState::neu(SignalingConfig::default(), Arc::new(InMemoryGateway::neu()))
    }

    fn identify(user_id: &str, domain: &str, anzeige: &str) -> IdentifyRequest {
        IdentifyRequest {
            user_id: user_id.into(),
            domain: domain.into(),
            auth_token: "t".into(),
            display_name: anzeige.into(),
        }
    }

    #[test]
    fn identify_bindet_und_aktualisiert() {
        let state = state();
        let (h, _rx) = ConnectionHandle::neu(4);

        handle_identify(identify("alice", "Acme", "Alice"), &h, &state).unwrap();
        handle_identify(identify("alice", "acme", "Alice B."), &h, &state).unwrap();

        let bindungen = state.presence.bindungen_fuer("acme", "alice");
        assert_eq!(bindungen.len(), 1);
        assert_eq!(bindungen[0].display_name, "Alice B.");
    }

    #[test]
    fn identify_ohne_user_id_wird_abgelehnt() {
        let state = state();
        let (h, _rx) = ConnectionHandle::neu(4);
        assert!(matches!(
            handle_identify(identify("", "acme", ""), &h, &state),
            Err(SignalingError::Protokoll(_))
        ));
        assert_eq!(state.presence.bindungen_anzahl(), 0);
    }

    #[tokio::test]
    async fn pong_spiegelt_felder() {
        let (h, mut rx) = ConnectionHandle::neu(4);
        let mut felder = Map::new();
        felder.insert("seq".into(), Value::from(7));
        handle_ping(felder, &h);

        let text = rx.recv().await.unwrap().to_json().unwrap();
        assert_eq!(text, r#"{"kind":"pong","seq":7}"#);
    }
}
