//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Config-Datei):
//! - `GC_LOG_LEVEL`: Filter-Direktive, z.B. `info` oder
//!   `groupcall_signaling=debug,info`
//! - `GC_LOG_FORMAT`: `text` oder `json`
//!
//! Verbindungs-, Raum- und Teilnehmer-IDs laufen als strukturierte Felder
//! der Events mit (`verbindung`, `raum`, `teilnehmer`).

use anyhow::anyhow;
use tracing_subscriber::{fmt, EnvFilter};

const ENV_LEVEL: &str = "GC_LOG_LEVEL";
const ENV_FORMAT: &str = "GC_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parsen(wert: &str) -> Option<Self> {
        match wert {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Initialisiert das Logging-System
///
/// `level` und `format` stammen aus der Konfiguration und werden von
/// `GC_LOG_LEVEL` bzw. `GC_LOG_FORMAT` ueberschrieben. Ein unbekanntes
/// Format faellt auf `text` zurueck.
pub fn logging_initialisieren(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(ENV_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format_wert = std::env::var(ENV_FORMAT).unwrap_or_else(|_| format.to_string());
    let log_format = LogFormat::parsen(&format_wert);

    let ergebnis = match log_format.unwrap_or(LogFormat::Text) {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    ergebnis.map_err(|e| anyhow!("Logging bereits initialisiert: {e}"))?;

    if log_format.is_none() {
        tracing::warn!(format = %format_wert, "Unbekanntes Log-Format, verwende text");
    }
    Ok(())
}

/// Prueft ob `level` eine gueltige Filter-Direktive ist
pub fn log_level_gueltig(level: &str) -> bool {
    !level.trim().is_empty() && EnvFilter::try_new(level).is_ok()
}
