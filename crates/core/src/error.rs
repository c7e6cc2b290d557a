//! Fehlertypen fuer Groupcall
//!
//! Zentraler Fehler-Enum fuer alles, was ueber Crate-Grenzen hinweg
//! transportiert wird (insbesondere Fehler des Media-Gateways).
//! Untermodule koennen eigene Fehler definieren und via `#[from]` konvertieren.

use thiserror::Error;

/// Globaler Result-Alias fuer Groupcall
pub type Result<T> = std::result::Result<T, GroupcallError>;

/// Alle moeglichen Fehler im Groupcall-System
#[derive(Debug, Error)]
pub enum GroupcallError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Media-Gateway ---
    #[error("Media-Gateway-Fehler: {0}")]
    Gateway(String),
}

impl GroupcallError {
    /// Erstellt einen Gateway-Fehler
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = GroupcallError::gateway("processOffer abgelehnt");
        assert_eq!(e.to_string(), "Media-Gateway-Fehler: processOffer abgelehnt");
    }
}
