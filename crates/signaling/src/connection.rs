//! Client-Connection – Send-Queue und Verarbeitungsschleife einer Verbindung
//!
//! Jede WebSocket-Verbindung bekommt einen eigenen tokio-Task. Alle
//! ausgehenden Frames (Dispatcher-Antworten, Broadcasts anderer Verbindungen,
//! ICE-Kandidaten aus Gateway-Ereignissen) laufen ueber die mpsc-Queue des
//! `ConnectionHandle` und werden ausschliesslich von diesem Task geschrieben.
//! Damit sind Sends pro Verbindung serialisiert.
//!
//! ## Lebenszyklus
//! ```text
//! Handshake (ws.rs) -> optional Identitaet aus Headern binden
//!     -> Schleife: Frame lesen | Queue leeren | Idle-Timeout
//!     -> Cleanup: Raum verlassen, Presence-Bindungen entfernen
//! ```

use futures_util::{SinkExt, StreamExt};
use groupcall_core::types::ConnectionId;
use groupcall_protocol::OutboundMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::dispatcher::SignalingDispatcher;
use crate::error::{SignalingError, SignalingResult};
use crate::server_state::SignalingState;

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer verbundenen Client-Verbindung
///
/// Clone teilt die Queue. Gleichheit ueber die `ConnectionId`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundMessage>,
}

impl ConnectionHandle {
    /// Erstellt ein neues Handle samt Empfangsseite der Queue
    pub fn neu(queue_groesse: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(queue_groesse.max(1));
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Stellt eine Nachricht nicht-blockierend in die Send-Queue
    pub fn senden(&self, nachricht: impl Into<OutboundMessage>) -> SignalingResult<()> {
        let nachricht = nachricht.into();
        match self.tx.try_send(nachricht) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(verbindung = %self.id, kind = n.kind(), "Send-Queue voll – Nachricht verworfen");
                Err(SignalingError::SendFehler)
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                tracing::debug!(verbindung = %self.id, kind = n.kind(), "Send-Queue geschlossen (Client getrennt)");
                Err(SignalingError::SendFehler)
            }
        }
    }

    /// Gibt zurueck ob die Verbindung noch Nachrichten annimmt
    pub fn ist_offen(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Wartet bis die Empfangsseite der Queue geschlossen wurde
    pub async fn geschlossen(&self) {
        self.tx.closed().await
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne WebSocket-Verbindung nach dem Handshake
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    handle: ConnectionHandle,
    sende_rx: mpsc::Receiver<OutboundMessage>,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection mit frischer Send-Queue
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        let (handle, sende_rx) = ConnectionHandle::neu(state.config.send_queue_groesse);
        Self {
            state,
            peer_addr,
            handle,
            sende_rx,
        }
    }

    /// Handle dieser Verbindung (fuer die Identitaetsbindung aus dem Handshake)
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Startet die Verarbeitungsschleife
    ///
    /// Laeuft bis der Client trennt, der Idle-Timeout greift oder ein
    /// Shutdown-Signal eingeht.
    pub async fn verarbeiten<S>(
        mut self,
        ws: WebSocketStream<S>,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_addr = self.peer_addr;
        let verbindung = self.handle.id();
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);
        let dispatcher = SignalingDispatcher::neu(Arc::clone(&self.state));
        let (mut schreiber, mut leser) = ws.split();

        self.state.verbindung_geoeffnet();
        tracing::info!(peer = %peer_addr, verbindung = %verbindung, "Neue Verbindung");

        // Nur empfangene Frames zaehlen als Aktivitaet, ausgehende nicht
        let mut letzter_empfang = Instant::now();

        loop {
            tokio::select! {
                frame = leser.next() => {
                    if matches!(frame, Some(Ok(_))) {
                        letzter_empfang = Instant::now();
                    }
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            dispatcher.verarbeiten(&self.handle, &text).await;
                        }
                        Some(Ok(Message::Ping(daten))) => {
                            if schreiber.send(Message::Pong(daten)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!(verbindung = %verbindung, "Verbindung vom Client getrennt");
                            break;
                        }
                        Some(Ok(_)) => {
                            tracing::trace!(verbindung = %verbindung, "Nicht-Text-Frame ignoriert");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(verbindung = %verbindung, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep_until(letzter_empfang + timeout_dauer) => {
                    tracing::info!(verbindung = %verbindung, "Idle-Timeout – Verbindung wird getrennt");
                    break;
                }

                Some(ausgehend) = self.sende_rx.recv() => {
                    let text = match ausgehend.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(verbindung = %verbindung, fehler = %e, "Serialisierung fehlgeschlagen");
                            continue;
                        }
                    };
                    if let Err(e) = schreiber.send(Message::Text(text)).await {
                        tracing::warn!(verbindung = %verbindung, fehler = %e, "Senden fehlgeschlagen");
                        break;
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(verbindung = %verbindung, "Shutdown-Signal – Verbindung wird getrennt");
                        let _ = schreiber.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }

        self.sende_rx.close();
        dispatcher.verbindung_getrennt(&self.handle).await;
        self.state.verbindung_geschlossen();

        tracing::info!(peer = %peer_addr, verbindung = %verbindung, "Verbindungs-Task beendet");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupcall_protocol::SignalMessage;

    #[tokio::test]
    async fn senden_landet_in_queue() {
        let (handle, mut rx) = ConnectionHandle::neu(4);
        handle
            .senden(SignalMessage::IncomingCall { from: "alice".into() })
            .unwrap();
        let nachricht = rx.recv().await.unwrap();
        assert_eq!(nachricht.kind(), "incomingCall");
    }

    #[test]
    fn volle_queue_meldet_fehler() {
        let (handle, _rx) = ConnectionHandle::neu(1);
        handle
            .senden(SignalMessage::ParticipantLeft { name: "a".into() })
            .unwrap();
        assert!(matches!(
            handle.senden(SignalMessage::ParticipantLeft { name: "b".into() }),
            Err(SignalingError::SendFehler)
        ));
    }

    #[test]
    fn geschlossene_queue() {
        let (handle, rx) = ConnectionHandle::neu(4);
        assert!(handle.ist_offen());
        drop(rx);
        assert!(!handle.ist_offen());
        assert!(handle
            .senden(SignalMessage::ParticipantLeft { name: "a".into() })
            .is_err());
    }

    #[test]
    fn gleichheit_ueber_id() {
        let (a, _ra) = ConnectionHandle::neu(1);
        let (b, _rb) = ConnectionHandle::neu(1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
