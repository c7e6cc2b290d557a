//! Gemeinsame Identifikations- und Wertetypen fuer Groupcall
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige ID einer Client-Verbindung
///
/// Eine Verbindung traegt keine eigene Identitaet; erst ein `identify`
/// (oder die Handshake-Header) bindet sie an einen Benutzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// ID eines Raums
///
/// Fuer Ad-hoc-Anrufe vom Server generiert (UUID v4), fuer persistente
/// Raeume vom Client vorgegeben.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Erzeugt eine frische Raum-ID fuer einen Ad-hoc-Anruf
    pub fn generieren() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn ist_leer(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// ICE-Kandidat wie er zwischen Client und Media-Gateway ausgetauscht wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
}

/// Medienart fuer Endpoint-Verbindungen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
    /// Keine Einschraenkung (Audio und Video)
    Beide,
}

impl MediaKind {
    /// Interpretiert den `type`-Wert einer `changeMediaType`-Nachricht
    ///
    /// Nur `VIDEO` und `AUDIO` (exakt) schraenken ein, alles andere
    /// bedeutet beide Medienarten.
    pub fn aus_typ(typ: &str) -> Self {
        match typ {
            "VIDEO" => Self::Video,
            "AUDIO" => Self::Audio,
            _ => Self::Beide,
        }
    }
}
