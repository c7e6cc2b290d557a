//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use groupcall_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket-Signaling
    pub signaling: SignalingEinstellungen,
    /// Media-Gateway
    pub gateway: GatewayEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// WebSocket-Signaling-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    pub bind_adresse: String,
    pub port: u16,
    /// Akzeptierte WebSocket-Pfade
    pub pfade: Vec<String>,
    /// Maximale Text-Frame-Groesse in Bytes
    pub max_nachrichten_groesse: usize,
    /// Idle-Timeout in Sekunden
    pub verbindungs_timeout_sek: u64,
    pub send_queue_groesse: usize,
    pub max_verbindungen: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        let standard = SignalingConfig::default();
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8443,
            pfade: standard.pfade,
            max_nachrichten_groesse: standard.max_nachrichten_groesse,
            verbindungs_timeout_sek: standard.verbindungs_timeout_sek,
            send_queue_groesse: standard.send_queue_groesse,
            max_verbindungen: standard.max_verbindungen,
        }
    }
}

/// Art des Media-Gateways
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayTyp {
    /// Kurento-kompatibler Media-Server (JSON-RPC ueber WebSocket)
    Kurento,
    /// Prozesslokales Gateway ohne echten Medienfluss (Entwicklung)
    Memory,
}

/// Media-Gateway-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayEinstellungen {
    pub typ: GatewayTyp,
    /// WebSocket-URL des Media-Servers
    pub url: String,
    /// Timeout pro JSON-RPC-Anfrage in Sekunden
    pub anfrage_timeout_sek: u64,
}

impl Default for GatewayEinstellungen {
    fn default() -> Self {
        Self {
            typ: GatewayTyp::Kurento,
            url: "ws://127.0.0.1:8888/kurento".into(),
            anfrage_timeout_sek: 10,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Direktive
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
    /// Intervall des Metrik-Samplers in Sekunden
    pub abtast_intervall_sek: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
            abtast_intervall_sek: 15,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die Bind-Adresse fuer den WebSocket-Server zurueck
    pub fn signaling_bind_adresse(&self) -> String {
        format!("{}:{}", self.signaling.bind_adresse, self.signaling.port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.signaling.bind_adresse, self.observability.port)
    }

    /// Laufzeit-Konfiguration fuer den Signaling-Crate
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            pfade: self.signaling.pfade.clone(),
            max_nachrichten_groesse: self.signaling.max_nachrichten_groesse,
            verbindungs_timeout_sek: self.signaling.verbindungs_timeout_sek,
            send_queue_groesse: self.signaling.send_queue_groesse,
            max_verbindungen: self.signaling.max_verbindungen,
        }
    }

    pub fn anfrage_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.anfrage_timeout_sek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.signaling.port, 8443);
        assert_eq!(cfg.signaling.max_nachrichten_groesse, 32768);
        assert_eq!(cfg.gateway.typ, GatewayTyp::Kurento);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.observability.abtast_intervall_sek, 15);
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.signaling_bind_adresse(), "0.0.0.0:8443");
        assert_eq!(cfg.observability_bind_adresse(), "0.0.0.0:9300");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [signaling]
            port = 9000
            pfade = ["/ws"]

            [gateway]
            typ = "memory"
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.signaling.port, 9000);
        assert_eq!(cfg.signaling.pfade, vec!["/ws".to_string()]);
        assert_eq!(cfg.gateway.typ, GatewayTyp::Memory);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.signaling.verbindungs_timeout_sek, 60);
        assert_eq!(cfg.gateway.anfrage_timeout_sek, 10);
    }

    #[test]
    fn signaling_config_uebernimmt_werte() {
        let mut cfg = ServerConfig::default();
        cfg.signaling.send_queue_groesse = 8;
        let sc = cfg.signaling_config();
        assert_eq!(sc.send_queue_groesse, 8);
        assert_eq!(sc.pfade, cfg.signaling.pfade);
    }

    #[test]
    fn fehlende_datei_liefert_standard() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/groupcall.toml").unwrap();
        assert_eq!(cfg.signaling.port, 8443);
    }
}
