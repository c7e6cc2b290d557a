//! WebSocket-Listener – Bindet Socket, fuehrt Handshake durch
//!
//! Der `SignalingServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task. Der Task fuehrt den
//! WebSocket-Handshake durch und uebergibt dann an eine `ClientConnection`.
//!
//! ## Handshake
//! - Nur konfigurierte Pfade werden akzeptiert, sonst HTTP 404.
//! - Ist `X-User-Id` gesetzt, wird die Identitaet sofort gebunden
//!   (Domain aus `schemaName`, dazu `X-Auth-Token` und `X-Display-Name`).

use groupcall_protocol::signaling::IdentifyRequest;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::connection::ClientConnection;
use crate::dispatcher::SignalingDispatcher;
use crate::server_state::SignalingState;

const HEADER_USER_ID: &str = "x-user-id";
const HEADER_DOMAIN: &str = "schemaname";
const HEADER_AUTH_TOKEN: &str = "x-auth-token";
const HEADER_DISPLAY_NAME: &str = "x-display-name";

/// WebSocket-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
    listener: TcpListener,
}

impl SignalingServer {
    /// Bindet den Socket
    pub async fn binden(state: Arc<SignalingState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse (relevant bei Port 0)
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(self, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        tracing::info!(
            adresse = %self.listener.local_addr()?,
            pfade = ?self.state.config.pfade,
            "WebSocket Signaling-Server gestartet"
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let aktiv = self.state.verbindungen_anzahl();
                            if aktiv >= self.state.config.max_verbindungen {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.state.config.max_verbindungen,
                                    "Server voll – Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }

                            tracing::debug!(peer = %peer_addr, "TCP-Verbindung akzeptiert");
                            let state = Arc::clone(&self.state);
                            let shutdown_rx = shutdown_rx.clone();
                            tokio::spawn(verbindung_annehmen(state, stream, peer_addr, shutdown_rx));
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("WebSocket Signaling-Server gestoppt");
        Ok(())
    }
}

/// Handshake und Verbindungsschleife einer einzelnen Verbindung
async fn verbindung_annehmen(
    state: Arc<SignalingState>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(state.config.max_nachrichten_groesse);
    ws_config.max_frame_size = Some(state.config.max_nachrichten_groesse);

    let pfade = state.config.pfade.clone();
    let mut identitaet = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let pfad = req.uri().path();
        if !pfade.iter().any(|p| p == pfad) {
            tracing::debug!(peer = %peer_addr, pfad = %pfad, "Unbekannter Pfad");
            let mut fehler = ErrorResponse::new(Some(format!("Unbekannter Pfad: {pfad}")));
            *fehler.status_mut() = StatusCode::NOT_FOUND;
            return Err(fehler);
        }
        identitaet = identitaet_aus_headern(req.headers());
        Ok(resp)
    };

    let handshake_timeout = Duration::from_secs(state.config.verbindungs_timeout_sek);
    let handshake = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config));
    let ws = match tokio::time::timeout(handshake_timeout, handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer_addr, fehler = %e, "WebSocket-Handshake fehlgeschlagen");
            return;
        }
        Err(_) => {
            tracing::warn!(peer = %peer_addr, "WebSocket-Handshake Timeout");
            return;
        }
    };

    let verbindung = ClientConnection::neu(Arc::clone(&state), peer_addr);
    if let Some(identitaet) = identitaet {
        SignalingDispatcher::neu(state).handshake_binden(verbindung.handle(), identitaet);
    }
    verbindung.verarbeiten(ws, shutdown_rx).await;
}

/// Liest die Identitaet aus den Handshake-Headern (nur mit `X-User-Id`)
fn identitaet_aus_headern(headers: &HeaderMap) -> Option<IdentifyRequest> {
    let wert = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    let user_id = wert(HEADER_USER_ID);
    if user_id.is_empty() {
        return None;
    }
    Some(IdentifyRequest {
        user_id,
        domain: wert(HEADER_DOMAIN),
        auth_token: wert(HEADER_AUTH_TOKEN),
        display_name: wert(HEADER_DISPLAY_NAME),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http::HeaderValue;

    #[test]
    fn identitaet_nur_mit_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert("schemaName", HeaderValue::from_static("Acme"));
        assert!(identitaet_aus_headern(&headers).is_none());

        headers.insert("X-User-Id", HeaderValue::from_static(" alice "));
        headers.insert("X-Display-Name", HeaderValue::from_static("Alice"));
        let identitaet = identitaet_aus_headern(&headers).unwrap();
        assert_eq!(identitaet.user_id, "alice");
        assert_eq!(identitaet.domain, "Acme");
        assert_eq!(identitaet.display_name, "Alice");
        assert_eq!(identitaet.auth_token, "");
    }
}
