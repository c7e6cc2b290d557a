//! JSON-RPC 2.0 Client fuer den Kurento Media Server
//!
//! Eine WebSocket-Verbindung pro Prozess. Ein Sende-Task schreibt Frames aus
//! einer Queue, ein Empfangs-Task ordnet Antworten ueber die Request-ID den
//! wartenden Aufrufern zu und leitet `onEvent`-Notifications an den
//! Ereignis-Kanal des Objekts weiter, von dem sie stammen.

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use groupcall_core::media::EndpointEvent;
use groupcall_core::types::IceCandidate;
use groupcall_core::{GroupcallError, Result};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Kapazitaet des Ereignis-Kanals pro Media-Objekt
const EREIGNIS_KANAL_GROESSE: usize = 64;

type Ausstehend = oneshot::Sender<Result<Value>>;

/// Handle auf die JSON-RPC-Verbindung zum Media-Server
///
/// Clone teilt die Verbindung.
#[derive(Clone)]
pub struct KurentoClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    url: String,
    tx: mpsc::UnboundedSender<Message>,
    naechste_id: AtomicU64,
    ausstehend: DashMap<u64, Ausstehend>,
    session_id: RwLock<Option<String>>,
    /// Objekt-ID -> Ereignis-Kanal
    abonnenten: DashMap<String, broadcast::Sender<EndpointEvent>>,
    anfrage_timeout: Duration,
    verbunden: AtomicBool,
}

impl KurentoClient {
    /// Baut die WebSocket-Verbindung auf und startet Sende- und Empfangs-Task
    pub async fn verbinden(url: &str, anfrage_timeout: Duration) -> Result<Self> {
        tracing::info!(url = %url, "Verbinde zum Media-Server");

        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| GroupcallError::Verbindung(format!("{url}: {e}")))?;
        let (mut schreiber, mut leser) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let inner = Arc::new(ClientInner {
            url: url.to_string(),
            tx,
            naechste_id: AtomicU64::new(1),
            ausstehend: DashMap::new(),
            session_id: RwLock::new(None),
            abonnenten: DashMap::new(),
            anfrage_timeout,
            verbunden: AtomicBool::new(true),
        });

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = schreiber.send(frame).await {
                    tracing::error!(fehler = %e, "Senden an Media-Server fehlgeschlagen");
                    break;
                }
            }
            tracing::debug!("Media-Server Sende-Task beendet");
        });

        let empfang = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(frame) = leser.next().await {
                match frame {
                    Ok(Message::Text(text)) => empfang.frame_verarbeiten(&text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(fehler = %e, "Media-Server Verbindungsfehler");
                        break;
                    }
                }
            }
            empfang.getrennt();
        });

        tracing::info!(url = %url, "Mit Media-Server verbunden");
        Ok(Self { inner })
    }

    /// Sendet eine Anfrage und wartet auf das Ergebnis (`result`)
    pub async fn anfrage(&self, methode: &str, params: Value) -> Result<Value> {
        if !self.ist_verbunden() {
            return Err(GroupcallError::Getrennt(self.inner.url.clone()));
        }

        let id = self.inner.naechste_id.fetch_add(1, Ordering::Relaxed);
        let session_id = self.inner.session_id.read().clone();
        let frame = anfrage_rahmen(id, methode, params, session_id.as_deref());

        let (tx, rx) = oneshot::channel();
        self.inner.ausstehend.insert(id, tx);

        tracing::trace!(id, methode, "JSON-RPC Anfrage");
        if self.inner.tx.send(Message::Text(frame.to_string())).is_err() {
            self.inner.ausstehend.remove(&id);
            return Err(GroupcallError::Getrennt(self.inner.url.clone()));
        }

        match tokio::time::timeout(self.inner.anfrage_timeout, rx).await {
            Ok(Ok(ergebnis)) => ergebnis,
            Ok(Err(_)) => Err(GroupcallError::Getrennt(self.inner.url.clone())),
            Err(_) => {
                self.inner.ausstehend.remove(&id);
                Err(GroupcallError::Zeitlimit(format!(
                    "{methode} nach {:?}",
                    self.inner.anfrage_timeout
                )))
            }
        }
    }

    /// Registriert den Ereignis-Kanal fuer ein Media-Objekt
    pub fn ereignisse_registrieren(&self, objekt: &str) -> broadcast::Sender<EndpointEvent> {
        self.inner
            .abonnenten
            .entry(objekt.to_string())
            .or_insert_with(|| broadcast::channel(EREIGNIS_KANAL_GROESSE).0)
            .clone()
    }

    /// Entfernt den Ereignis-Kanal eines freigegebenen Objekts
    pub fn ereignisse_entfernen(&self, objekt: &str) {
        self.inner.abonnenten.remove(objekt);
    }

    pub fn ist_verbunden(&self) -> bool {
        self.inner.verbunden.load(Ordering::Acquire)
    }
}

impl ClientInner {
    fn frame_verarbeiten(&self, text: &str) {
        let wert: Value = match serde_json::from_str(text) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(fehler = %e, "Ungueltiger Frame vom Media-Server");
                return;
            }
        };

        if let Some(id) = wert.get("id").and_then(Value::as_u64) {
            if wert.get("result").is_some() || wert.get("error").is_some() {
                self.antwort_zustellen(id, &wert);
                return;
            }
        }

        if wert.get("method").and_then(Value::as_str) == Some("onEvent") {
            self.ereignis_zustellen(&wert["params"]["value"]);
        }
    }

    fn antwort_zustellen(&self, id: u64, wert: &Value) {
        let Some((_, tx)) = self.ausstehend.remove(&id) else {
            tracing::debug!(id, "Antwort ohne wartende Anfrage");
            return;
        };

        let ergebnis = match wert.get("error") {
            Some(fehler) => Err(GroupcallError::gateway(format!(
                "{} (code {})",
                fehler["message"].as_str().unwrap_or("unbekannter Fehler"),
                fehler["code"].as_i64().unwrap_or_default()
            ))),
            None => {
                let ergebnis = wert.get("result").cloned().unwrap_or(Value::Null);
                if let Some(sid) = ergebnis.get("sessionId").and_then(Value::as_str) {
                    *self.session_id.write() = Some(sid.to_string());
                }
                Ok(ergebnis)
            }
        };
        let _ = tx.send(ergebnis);
    }

    fn ereignis_zustellen(&self, wert: &Value) {
        let objekt = wert["object"].as_str().unwrap_or_default();
        let typ = wert["type"].as_str().unwrap_or_default();

        let Some(ereignis) = ereignis_aus_kurento(typ, &wert["data"]) else {
            tracing::debug!(objekt, typ, "Unbekanntes Media-Server-Ereignis");
            return;
        };

        match self.abonnenten.get(objekt) {
            Some(tx) => {
                let _ = tx.send(ereignis);
            }
            None => tracing::trace!(objekt, typ, "Ereignis fuer unbekanntes Objekt"),
        }
    }

    fn getrennt(&self) {
        self.verbunden.store(false, Ordering::Release);
        let ids: Vec<u64> = self.ausstehend.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.ausstehend.remove(&id) {
                let _ = tx.send(Err(GroupcallError::Getrennt(self.url.clone())));
            }
        }
        tracing::warn!(url = %self.url, "Verbindung zum Media-Server getrennt");
    }
}

/// Baut einen JSON-RPC-Anfrage-Frame
pub(crate) fn anfrage_rahmen(
    id: u64,
    methode: &str,
    mut params: Value,
    session_id: Option<&str>,
) -> Value {
    if let (Some(sid), Value::Object(map)) = (session_id, &mut params) {
        map.insert("sessionId".into(), Value::String(sid.to_string()));
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": methode,
        "params": params,
    })
}

/// Uebersetzt ein Kurento-Ereignis in ein `EndpointEvent`
pub(crate) fn ereignis_aus_kurento(typ: &str, daten: &Value) -> Option<EndpointEvent> {
    match typ {
        "IceCandidateFound" => serde_json::from_value::<IceCandidate>(daten["candidate"].clone())
            .ok()
            .map(EndpointEvent::IceKandidatGefunden),
        "IceGatheringDone" => Some(EndpointEvent::IceSammlungAbgeschlossen),
        "Error" => Some(EndpointEvent::Fehler {
            code: daten["errorCode"].as_i64().unwrap_or_default(),
            beschreibung: daten["description"].as_str().unwrap_or_default().to_string(),
        }),
        "" => None,
        _ => {
            let zustand = daten
                .get("newState")
                .or_else(|| daten.get("state"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(EndpointEvent::ZustandGeaendert {
                ereignis: typ.to_string(),
                zustand: zustand.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rahmen_traegt_session_id() {
        let rahmen = anfrage_rahmen(7, "release", json!({"object": "p1"}), Some("s-1"));
        assert_eq!(
            rahmen,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "release",
                "params": {"object": "p1", "sessionId": "s-1"}
            })
        );

        let ohne = anfrage_rahmen(8, "ping", json!({}), None);
        assert!(ohne["params"].get("sessionId").is_none());
    }

    #[test]
    fn ice_kandidat_ereignis() {
        let daten = json!({
            "source": "p1/e1",
            "type": "IceCandidateFound",
            "candidate": {
                "__module__": "kurento",
                "__type__": "IceCandidate",
                "candidate": "candidate:1 1 UDP 2122 10.0.0.1 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        });
        let Some(EndpointEvent::IceKandidatGefunden(kandidat)) =
            ereignis_aus_kurento("IceCandidateFound", &daten)
        else {
            panic!("Erwartet IceKandidatGefunden");
        };
        assert_eq!(kandidat.sdp_mid, "0");
    }

    #[test]
    fn zustands_ereignisse() {
        assert_eq!(
            ereignis_aus_kurento("MediaFlowInStateChange", &json!({"state": "FLOWING"})),
            Some(EndpointEvent::ZustandGeaendert {
                ereignis: "MediaFlowInStateChange".into(),
                zustand: "FLOWING".into(),
            })
        );
        assert_eq!(
            ereignis_aus_kurento("ConnectionStateChanged", &json!({"newState": "CONNECTED"})),
            Some(EndpointEvent::ZustandGeaendert {
                ereignis: "ConnectionStateChanged".into(),
                zustand: "CONNECTED".into(),
            })
        );
        assert_eq!(
            ereignis_aus_kurento("IceGatheringDone", &json!({})),
            Some(EndpointEvent::IceSammlungAbgeschlossen)
        );
        assert_eq!(
            ereignis_aus_kurento("Error", &json!({"errorCode": 40001, "description": "x"})),
            Some(EndpointEvent::Fehler {
                code: 40001,
                beschreibung: "x".into()
            })
        );
        assert!(ereignis_aus_kurento("", &json!({})).is_none());
    }

    #[test]
    fn ice_kandidat_ohne_daten_wird_verworfen() {
        assert!(ereignis_aus_kurento("IceCandidateFound", &json!({})).is_none());
    }
}
