//! Fehlertypen fuer den Signaling-Service

use groupcall_core::GroupcallError;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
///
/// Jeder Fehler der bis an die Spitze der Nachrichtenverarbeitung gelangt,
/// wird als Ablehnung (`<kind>Response` bzw. `Error`) an die anfragende
/// Verbindung gemeldet; die Verbindung bleibt bestehen.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Protokollfehler (Pflichtfeld leer, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Referenzierter Teilnehmer, Raum oder Session existiert nicht
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Aufruf am Media-Gateway fehlgeschlagen
    #[error(transparent)]
    Gateway(#[from] GroupcallError),

    /// Raum wurde waehrend des Beitritts geschlossen
    #[error("Raum geschlossen: {0}")]
    RaumGeschlossen(String),

    /// Senden an Client fehlgeschlagen (Queue voll oder geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,
}

impl SignalingError {
    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Erstellt einen Fehler fuer eine fehlende Ressource
    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_fehler_behaelt_text() {
        let e = SignalingError::from(GroupcallError::gateway("processOffer abgelehnt"));
        assert_eq!(e.to_string(), "Media-Gateway-Fehler: processOffer abgelehnt");
    }

    #[test]
    fn nicht_gefunden_anzeige() {
        let e = SignalingError::nicht_gefunden("Teilnehmer 'carol'");
        assert_eq!(e.to_string(), "Nicht gefunden: Teilnehmer 'carol'");
    }
}
