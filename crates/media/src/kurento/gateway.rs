//! Media-Gateway-Traits ueber den Kurento JSON-RPC Client

use async_trait::async_trait;
use groupcall_core::media::{EndpointEvent, MediaEndpoint, MediaGateway, MediaPipeline};
use groupcall_core::types::{IceCandidate, MediaKind};
use groupcall_core::{GroupcallError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::client::KurentoClient;

/// Ereignistypen die fuer jeden WebRTC-Endpoint abonniert werden
const ENDPOINT_EREIGNISSE: &[&str] = &[
    "IceCandidateFound",
    "IceGatheringDone",
    "IceComponentStateChange",
    "MediaFlowInStateChange",
    "MediaFlowOutStateChange",
    "ConnectionStateChanged",
    "MediaStateChanged",
    "Error",
];

/// Media-Gateway auf Basis eines Kurento-kompatiblen Media-Servers
pub struct KurentoGateway {
    client: KurentoClient,
}

impl KurentoGateway {
    /// Verbindet zum Media-Server unter `url`
    pub async fn verbinden(url: &str, anfrage_timeout: Duration) -> Result<Self> {
        let client = KurentoClient::verbinden(url, anfrage_timeout).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaGateway for KurentoGateway {
    async fn pipeline_erstellen(&self) -> Result<Arc<dyn MediaPipeline>> {
        let ergebnis = self
            .client
            .anfrage(
                "create",
                json!({"type": "MediaPipeline", "constructorParams": {}, "properties": {}}),
            )
            .await?;
        let id = objekt_id(&ergebnis)?;
        tracing::debug!(pipeline = %id, "Pipeline erstellt");

        Ok(Arc::new(KurentoPipeline {
            id,
            client: self.client.clone(),
        }))
    }

    fn ist_verfuegbar(&self) -> bool {
        self.client.ist_verbunden()
    }
}

/// Liest die Objekt-ID (`result.value`) aus einer `create`-Antwort
fn objekt_id(ergebnis: &Value) -> Result<String> {
    ergebnis["value"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GroupcallError::gateway(format!("Antwort ohne Objekt-ID: {ergebnis}")))
}

async fn freigeben(client: &KurentoClient, objekt: &str) -> Result<()> {
    client.anfrage("release", json!({"object": objekt})).await?;
    client.ereignisse_entfernen(objekt);
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct KurentoPipeline {
    id: String,
    client: KurentoClient,
}

#[async_trait]
impl MediaPipeline for KurentoPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    async fn endpoint_erstellen(&self) -> Result<Arc<dyn MediaEndpoint>> {
        let ergebnis = self
            .client
            .anfrage(
                "create",
                json!({
                    "type": "WebRtcEndpoint",
                    "constructorParams": {"mediaPipeline": self.id},
                    "properties": {}
                }),
            )
            .await?;
        let id = objekt_id(&ergebnis)?;

        // Kanal vor dem Abonnieren registrieren, sonst gehen fruehe Ereignisse verloren
        let ereignis_tx = self.client.ereignisse_registrieren(&id);
        for typ in ENDPOINT_EREIGNISSE {
            self.client
                .anfrage("subscribe", json!({"type": typ, "object": id}))
                .await?;
        }

        tracing::debug!(pipeline = %self.id, endpoint = %id, "WebRtcEndpoint erstellt");
        Ok(Arc::new(KurentoEndpoint {
            id,
            client: self.client.clone(),
            ereignis_tx,
        }))
    }

    async fn freigeben(&self) -> Result<()> {
        freigeben(&self.client, &self.id).await
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

struct KurentoEndpoint {
    id: String,
    client: KurentoClient,
    ereignis_tx: broadcast::Sender<EndpointEvent>,
}

impl KurentoEndpoint {
    async fn aufrufen(&self, operation: &str, operation_params: Value) -> Result<Value> {
        self.client
            .anfrage(
                "invoke",
                json!({
                    "object": self.id,
                    "operation": operation,
                    "operationParams": operation_params
                }),
            )
            .await
    }
}

/// Baut die `operationParams` fuer `connect`
fn verbinden_params(senke: &str, art: MediaKind) -> Value {
    match art {
        MediaKind::Audio => json!({"sink": senke, "mediaType": "AUDIO"}),
        MediaKind::Video => json!({"sink": senke, "mediaType": "VIDEO"}),
        MediaKind::Beide => json!({"sink": senke}),
    }
}

/// Baut die `operationParams` fuer `addIceCandidate`
fn kandidat_params(kandidat: &IceCandidate) -> Value {
    json!({
        "candidate": {
            "__module__": "kurento",
            "__type__": "IceCandidate",
            "candidate": kandidat.candidate,
            "sdpMid": kandidat.sdp_mid,
            "sdpMLineIndex": kandidat.sdp_m_line_index
        }
    })
}

#[async_trait]
impl MediaEndpoint for KurentoEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn angebot_verarbeiten(&self, sdp_offer: &str) -> Result<String> {
        let ergebnis = self
            .aufrufen("processOffer", json!({"offer": sdp_offer}))
            .await?;
        ergebnis["value"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GroupcallError::gateway("processOffer ohne SDP-Answer"))
    }

    async fn kandidaten_sammeln(&self) -> Result<()> {
        self.aufrufen("gatherCandidates", json!({})).await?;
        Ok(())
    }

    async fn verbinden(&self, senke: &dyn MediaEndpoint, art: MediaKind) -> Result<()> {
        self.aufrufen("connect", verbinden_params(senke.id(), art))
            .await?;
        Ok(())
    }

    async fn ice_kandidat_hinzufuegen(&self, kandidat: IceCandidate) -> Result<()> {
        self.aufrufen("addIceCandidate", kandidat_params(&kandidat))
            .await?;
        Ok(())
    }

    async fn freigeben(&self) -> Result<()> {
        freigeben(&self.client, &self.id).await
    }

    fn ereignisse_abonnieren(&self) -> broadcast::Receiver<EndpointEvent> {
        self.ereignis_tx.subscribe()
    }
}
