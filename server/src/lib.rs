//! groupcall-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use config::{GatewayTyp, ServerConfig};
use groupcall_core::media::MediaGateway;
use groupcall_media::{InMemoryGateway, KurentoGateway};
use groupcall_observability::{observability_server_starten, GroupcallMetrics, HealthState};
use groupcall_signaling::{SignalingServer, SignalingState, SignalingStatistik};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Media-Gateway verbinden
    /// 2. WebSocket-Listener starten (Signaling)
    /// 3. Observability-Server und Metrik-Sampler starten
    /// 4. Auf Ctrl-C warten, dann alle Tasks per Shutdown-Signal beenden
    pub async fn starten(self) -> Result<()> {
        let gateway = gateway_erstellen(&self.config).await?;
        let state = SignalingState::neu(self.config.signaling_config(), gateway);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let signaling_addr: SocketAddr = self
            .config
            .signaling_bind_adresse()
            .parse()
            .context("Ungueltige Signaling-Bind-Adresse")?;
        let server = SignalingServer::binden(Arc::clone(&state), signaling_addr).await?;
        let signaling_task = tokio::spawn(server.starten(shutdown_rx.clone()));

        if self.config.observability.aktiviert {
            let metriken = GroupcallMetrics::neu()?;
            let health = HealthState::neu();
            let obs_addr: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Ungueltige Observability-Bind-Adresse")?;

            let intervall = Duration::from_secs(self.config.observability.abtast_intervall_sek.max(1));
            tokio::spawn(sampler_starten(
                Arc::clone(&state),
                metriken.clone(),
                health.clone(),
                intervall,
                shutdown_rx.clone(),
            ));

            let obs_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(obs_addr, metriken, health, obs_shutdown).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(Duration::from_secs(5), signaling_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(fehler = %e, "Signaling-Server mit Fehler beendet"),
            Ok(Err(e)) => tracing::error!(fehler = %e, "Signaling-Task abgebrochen"),
            Err(_) => tracing::warn!("Signaling-Server hat nicht rechtzeitig beendet"),
        }

        // Verbindungs-Tasks raeumen nach dem Close-Frame noch auf
        tokio::time::sleep(Duration::from_millis(200)).await;
        tracing::info!(raeume = state.raeume.anzahl(), "Server beendet");
        Ok(())
    }
}

/// Erstellt das konfigurierte Media-Gateway
async fn gateway_erstellen(config: &ServerConfig) -> Result<Arc<dyn MediaGateway>> {
    match config.gateway.typ {
        GatewayTyp::Kurento => {
            tracing::info!(url = %config.gateway.url, "Verbinde mit Media-Server");
            let gateway = KurentoGateway::verbinden(&config.gateway.url, config.anfrage_timeout())
                .await
                .with_context(|| format!("Media-Server unter '{}' nicht erreichbar", config.gateway.url))?;
            Ok(Arc::new(gateway))
        }
        GatewayTyp::Memory => {
            tracing::warn!("In-Memory-Gateway aktiv – kein echter Medienfluss");
            Ok(Arc::new(InMemoryGateway::neu()))
        }
    }
}

/// Uebernimmt periodisch den Signaling-Zustand in Metriken und Health
async fn sampler_starten(
    state: Arc<SignalingState>,
    metriken: GroupcallMetrics,
    health: HealthState,
    intervall: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(intervall);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                metriken_uebernehmen(&state.statistik(), &metriken, &health);
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Metrik-Sampler beendet");
}

/// Schreibt eine Momentaufnahme in Gauges, Counter und Health-Zustand
pub fn metriken_uebernehmen(
    statistik: &SignalingStatistik,
    metriken: &GroupcallMetrics,
    health: &HealthState,
) {
    metriken.connections_active.set(statistik.verbindungen as i64);
    metriken.identities_bound.set(statistik.identitaeten as i64);
    metriken.bindings_active.set(statistik.bindungen as i64);
    metriken.rooms_active.set(statistik.raeume as i64);
    metriken.participants_active.set(statistik.teilnehmer as i64);
    metriken
        .media_gateway_up
        .set(i64::from(statistik.gateway_verfuegbar));

    for (kind, gesamt) in &statistik.nachrichten {
        GroupcallMetrics::zaehler_nachziehen(&metriken.messages_total, kind, *gesamt);
    }
    for (kind, gesamt) in &statistik.ablehnungen {
        GroupcallMetrics::zaehler_nachziehen(&metriken.rejections_total, kind, *gesamt);
    }

    health.gateway_status_setzen(statistik.gateway_verfuegbar);
    health.raeume_setzen(statistik.raeume);
}
