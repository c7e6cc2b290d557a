//! Fehlertypen beim Dekodieren eingehender Frames

use thiserror::Error;

/// Fehler beim Dekodieren eines Signaling-Frames
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame ist kein gueltiges JSON-Objekt
    #[error("Ungueltiges JSON: {0}")]
    UngueltigesJson(#[source] serde_json::Error),

    /// `kind` bekannt, aber die Nutzdaten passen nicht
    #[error("Ungueltige Nutzdaten fuer '{kind}': {quelle}")]
    UngueltigeNutzdaten {
        kind: String,
        #[source]
        quelle: serde_json::Error,
    },
}

impl DecodeError {
    /// Gibt den `kind` der Nachricht zurueck, falls er bestimmt werden konnte
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::UngueltigesJson(_) => None,
            Self::UngueltigeNutzdaten { kind, .. } => Some(kind),
        }
    }
}
