//! Signaling-Protokoll (WebSocket-Text-Frames)
//!
//! Jeder Frame ist genau ein JSON-Objekt mit dem Diskriminator `kind`.
//!
//! ## Design
//! - Eingehende Frames werden einmal an der Grenze in den geschlossenen
//!   Summentyp `InboundMessage` dekodiert; danach wird nur noch gematcht.
//! - Fehlendes `kind` oder leerer Frame: kein Fehler, keine Antwort (`Ok(None)`).
//! - Unbekanntes `kind`: `InboundMessage::Unbekannt`, wird vom Dispatcher
//!   still ignoriert.
//! - Ausgehende Nachrichten sind `SignalMessage` (getaggt ueber `kind`) oder
//!   eine `RejectionResponse` mit dynamischem `kind` (`<kind>Response`).

use groupcall_core::types::{IceCandidate, RoomId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

// ---------------------------------------------------------------------------
// Eingehende Nutzdaten
// ---------------------------------------------------------------------------

/// Bindet Identitaets-Metadaten an die Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    pub user_id: String,
    pub domain: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub display_name: String,
}

/// Beitritt zu einem benannten Raum
///
/// Fehlende Felder werden als leer behandelt; ein leerer Name oder Raum
/// fuehrt dazu, dass keine Session entsteht.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub name: String,
}

/// Ad-hoc-Anruf an eine kommaseparierte Empfaengerliste
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub domain: String,
    pub from: String,
    pub to: String,
    /// Wird serverseitig immer durch eine frische ID ersetzt
    #[serde(default)]
    pub room: Option<RoomId>,
}

impl CallRequest {
    /// Liefert die Empfaengernamen aus `to` (getrimmt, leere Eintraege verworfen)
    pub fn empfaenger(&self) -> impl Iterator<Item = &str> {
        self.to.split(',').map(str::trim).filter(|n| !n.is_empty())
    }
}

/// Antwort des Angerufenen auf `incomingCall`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallResponse {
    pub call_response: String,
    /// Benutzername des Anrufers
    pub from: String,
}

impl IncomingCallResponse {
    pub fn ist_angenommen(&self) -> bool {
        self.call_response == "accept"
    }
}

/// Anforderung des Medienstroms eines anderen Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveVideoRequest {
    pub sender: String,
    pub sdp_offer: String,
}

/// Entfernter ICE-Kandidat fuer den Endpoint von `name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateRequest {
    pub candidate: IceCandidate,
    pub name: String,
}

/// Umschalten der gesendeten Medienart (`VIDEO`, `AUDIO`, sonst beide)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMediaTypeRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Eingehende Nachricht
// ---------------------------------------------------------------------------

/// Alle Nachrichten die ein Client senden kann
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Restliche Felder des Umschlags (ohne `kind`), werden als `pong` gespiegelt
    Ping(Map<String, Value>),
    Identify(IdentifyRequest),
    JoinRoom(JoinRoomRequest),
    Call(CallRequest),
    IncomingCallResponse(IncomingCallResponse),
    ReceiveVideoFrom(ReceiveVideoRequest),
    LeaveRoom,
    OnIceCandidate(IceCandidateRequest),
    ChangeMediaType(ChangeMediaTypeRequest),
    /// Nicht unterstuetzter `kind` – wird ignoriert
    Unbekannt(String),
}

impl InboundMessage {
    /// Dekodiert einen Text-Frame
    ///
    /// Gibt `Ok(None)` zurueck wenn der Frame leer ist oder kein `kind` traegt.
    pub fn dekodieren(rohdaten: &str) -> Result<Option<Self>, DecodeError> {
        if rohdaten.trim().is_empty() {
            return Ok(None);
        }

        let mut objekt: Map<String, Value> =
            serde_json::from_str(rohdaten).map_err(DecodeError::UngueltigesJson)?;

        let kind = match objekt.get("kind") {
            Some(Value::String(k)) => k.clone(),
            _ => return Ok(None),
        };

        let nachricht = match kind.as_str() {
            "ping" => {
                objekt.remove("kind");
                Self::Ping(objekt)
            }
            "identify" => Self::Identify(nutzdaten(&kind, objekt)?),
            "joinRoom" => Self::JoinRoom(nutzdaten(&kind, objekt)?),
            "call" => Self::Call(nutzdaten(&kind, objekt)?),
            "incomingCallResponse" => Self::IncomingCallResponse(nutzdaten(&kind, objekt)?),
            "receiveVideoFrom" => Self::ReceiveVideoFrom(nutzdaten(&kind, objekt)?),
            "leaveRoom" => Self::LeaveRoom,
            "onIceCandidate" => Self::OnIceCandidate(nutzdaten(&kind, objekt)?),
            "changeMediaType" => Self::ChangeMediaType(nutzdaten(&kind, objekt)?),
            _ => Self::Unbekannt(kind),
        };

        Ok(Some(nachricht))
    }

    /// Gibt den `kind`-Wert der Nachricht zurueck
    pub fn kind(&self) -> &str {
        match self {
            Self::Ping(_) => "ping",
            Self::Identify(_) => "identify",
            Self::JoinRoom(_) => "joinRoom",
            Self::Call(_) => "call",
            Self::IncomingCallResponse(_) => "incomingCallResponse",
            Self::ReceiveVideoFrom(_) => "receiveVideoFrom",
            Self::LeaveRoom => "leaveRoom",
            Self::OnIceCandidate(_) => "onIceCandidate",
            Self::ChangeMediaType(_) => "changeMediaType",
            Self::Unbekannt(kind) => kind,
        }
    }
}

fn nutzdaten<T: DeserializeOwned>(kind: &str, objekt: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(objekt)).map_err(|quelle| {
        DecodeError::UngueltigeNutzdaten {
            kind: kind.to_string(),
            quelle,
        }
    })
}

// ---------------------------------------------------------------------------
// Ausgehende Nachrichten
// ---------------------------------------------------------------------------

/// Nachrichten die der Server an Clients sendet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignalMessage {
    /// Gespiegelter Ping-Umschlag
    Pong(Map<String, Value>),
    IncomingCall {
        from: String,
    },
    NewParticipantArrived {
        name: String,
    },
    ExistingParticipants {
        data: Vec<String>,
    },
    ParticipantLeft {
        name: String,
    },
    ReceiveVideoAnswer {
        name: String,
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },
    IceCandidate {
        name: String,
        candidate: IceCandidate,
    },
}

/// Ablehnungs-Umschlag: `<kind>Response` bzw. `Error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionResponse {
    pub kind: String,
    pub response: String,
    pub message: String,
}

impl RejectionResponse {
    /// Erstellt die Ablehnung fuer eine Nachricht vom Typ `kind`
    ///
    /// Ohne bestimmbaren `kind` lautet der Umschlag `Error`.
    pub fn fuer(kind: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind: match kind {
                Some(k) => format!("{k}Response"),
                None => "Error".to_string(),
            },
            response: "rejected".to_string(),
            message: message.into(),
        }
    }
}

/// Alles was auf einer Verbindung gesendet werden kann
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Signal(SignalMessage),
    Ablehnung(RejectionResponse),
}

impl OutboundMessage {
    /// Serialisiert die Nachricht als JSON-Text-Frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Gibt den `kind`-Wert der Nachricht zurueck (fuer Logging und Metriken)
    pub fn kind(&self) -> &str {
        match self {
            Self::Signal(signal) => match signal {
                SignalMessage::Pong(_) => "pong",
                SignalMessage::IncomingCall { .. } => "incomingCall",
                SignalMessage::NewParticipantArrived { .. } => "newParticipantArrived",
                SignalMessage::ExistingParticipants { .. } => "existingParticipants",
                SignalMessage::ParticipantLeft { .. } => "participantLeft",
                SignalMessage::ReceiveVideoAnswer { .. } => "receiveVideoAnswer",
                SignalMessage::IceCandidate { .. } => "iceCandidate",
            },
            Self::Ablehnung(ablehnung) => &ablehnung.kind,
        }
    }
}

impl From<SignalMessage> for OutboundMessage {
    fn from(signal: SignalMessage) -> Self {
        Self::Signal(signal)
    }
}

impl From<RejectionResponse> for OutboundMessage {
    fn from(ablehnung: RejectionResponse) -> Self {
        Self::Ablehnung(ablehnung)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
