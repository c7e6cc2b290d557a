//! In-Memory Media-Gateway
//!
//! Erzeugt Pipelines und Endpoints ohne externen Media-Server. Jeder Aufruf
//! wird als `GatewayAufruf` protokolliert, sodass Tests die Interaktion des
//! Signaling-Kerns mit dem Gateway exakt pruefen koennen.
//!
//! ## Fehlerinjektion
//! - `pipeline_fehler_setzen` – `pipeline_erstellen` schlaegt fehl
//! - `angebot_fehler_setzen` – `angebot_verarbeiten` schlaegt fehl
//! - `erstellungs_verzoegerung_setzen` – Pipeline-Erstellung dauert kuenstlich
//!   laenger (macht Join-Races in Tests reproduzierbar)

use async_trait::async_trait;
use dashmap::DashMap;
use groupcall_core::media::{EndpointEvent, MediaEndpoint, MediaGateway, MediaPipeline};
use groupcall_core::types::{IceCandidate, MediaKind};
use groupcall_core::{GroupcallError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

/// Kapazitaet des Ereignis-Kanals pro Endpoint
const EREIGNIS_KANAL_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Aufzeichnung
// ---------------------------------------------------------------------------

/// Ein protokollierter Gateway-Aufruf
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayAufruf {
    PipelineErstellt {
        pipeline: String,
    },
    EndpointErstellt {
        pipeline: String,
        endpoint: String,
    },
    AngebotVerarbeitet {
        endpoint: String,
        sdp_offer: String,
    },
    KandidatenGesammelt {
        endpoint: String,
    },
    Verbunden {
        quelle: String,
        senke: String,
        art: MediaKind,
    },
    IceKandidatHinzugefuegt {
        endpoint: String,
        kandidat: IceCandidate,
    },
    EndpointFreigegeben {
        endpoint: String,
    },
    PipelineFreigegeben {
        pipeline: String,
    },
}

// ---------------------------------------------------------------------------
// InMemoryGateway
// ---------------------------------------------------------------------------

/// Prozesslokales Media-Gateway
///
/// Clone teilt den inneren Zustand; Tests behalten einen Clone und geben
/// den anderen als `Arc<dyn MediaGateway>` an den Signaling-Kern.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    inner: Arc<GatewayInner>,
}

#[derive(Default)]
struct GatewayInner {
    naechste_id: AtomicU64,
    aufrufe: Mutex<Vec<GatewayAufruf>>,
    endpoints: DashMap<String, Arc<InMemoryEndpoint>>,
    pipeline_fehler: AtomicBool,
    angebot_fehler: AtomicBool,
    erstellungs_verzoegerung: Mutex<Option<Duration>>,
}

impl GatewayInner {
    fn protokollieren(&self, aufruf: GatewayAufruf) {
        tracing::trace!(aufruf = ?aufruf, "In-Memory-Gateway");
        self.aufrufe.lock().push(aufruf);
    }

    fn naechste_id(&self) -> u64 {
        self.naechste_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl InMemoryGateway {
    /// Erstellt ein neues, leeres Gateway
    pub fn neu() -> Self {
        Self::default()
    }

    /// Alle bisherigen Aufrufe in Reihenfolge
    pub fn aufrufe(&self) -> Vec<GatewayAufruf> {
        self.inner.aufrufe.lock().clone()
    }

    /// Anzahl der erstellten Pipelines
    pub fn pipeline_anzahl(&self) -> usize {
        self.zaehlen(|a| matches!(a, GatewayAufruf::PipelineErstellt { .. }))
    }

    /// Anzahl der erstellten Endpoints
    pub fn endpoint_anzahl(&self) -> usize {
        self.zaehlen(|a| matches!(a, GatewayAufruf::EndpointErstellt { .. }))
    }

    /// Anzahl der freigegebenen Pipelines
    pub fn freigegebene_pipelines(&self) -> usize {
        self.zaehlen(|a| matches!(a, GatewayAufruf::PipelineFreigegeben { .. }))
    }

    /// Gibt zurueck ob der Endpoint mit dieser ID freigegeben wurde
    pub fn ist_freigegeben(&self, endpoint_id: &str) -> bool {
        self.inner
            .endpoints
            .get(endpoint_id)
            .map(|e| e.freigegeben.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Alle Verbindungen (Quelle, Senke, Medienart) in Aufruf-Reihenfolge
    pub fn verbindungen(&self) -> Vec<(String, String, MediaKind)> {
        self.aufrufe()
            .into_iter()
            .filter_map(|a| match a {
                GatewayAufruf::Verbunden { quelle, senke, art } => Some((quelle, senke, art)),
                _ => None,
            })
            .collect()
    }

    /// ICE-Kandidaten die einem bestimmten Endpoint hinzugefuegt wurden
    pub fn kandidaten_fuer(&self, endpoint_id: &str) -> Vec<IceCandidate> {
        self.aufrufe()
            .into_iter()
            .filter_map(|a| match a {
                GatewayAufruf::IceKandidatHinzugefuegt { endpoint, kandidat }
                    if endpoint == endpoint_id =>
                {
                    Some(kandidat)
                }
                _ => None,
            })
            .collect()
    }

    /// Laesst `pipeline_erstellen` fehlschlagen
    pub fn pipeline_fehler_setzen(&self, aktiv: bool) {
        self.inner.pipeline_fehler.store(aktiv, Ordering::Release);
    }

    /// Laesst `angebot_verarbeiten` fehlschlagen
    pub fn angebot_fehler_setzen(&self, aktiv: bool) {
        self.inner.angebot_fehler.store(aktiv, Ordering::Release);
    }

    /// Verzoegert jede Pipeline-Erstellung um `dauer`
    pub fn erstellungs_verzoegerung_setzen(&self, dauer: Duration) {
        *self.inner.erstellungs_verzoegerung.lock() = Some(dauer);
    }

    /// Sendet ein Ereignis im Namen eines Endpoints
    ///
    /// Gibt `false` zurueck wenn der Endpoint unbekannt ist oder niemand zuhoert.
    pub fn ereignis_senden(&self, endpoint_id: &str, ereignis: EndpointEvent) -> bool {
        match self.inner.endpoints.get(endpoint_id) {
            Some(endpoint) => endpoint.ereignis_tx.send(ereignis).is_ok(),
            None => false,
        }
    }

    fn zaehlen(&self, filter: impl Fn(&GatewayAufruf) -> bool) -> usize {
        self.inner.aufrufe.lock().iter().filter(|a| filter(a)).count()
    }
}

#[async_trait]
impl MediaGateway for InMemoryGateway {
    async fn pipeline_erstellen(&self) -> Result<Arc<dyn MediaPipeline>> {
        let verzoegerung = *self.inner.erstellungs_verzoegerung.lock();
        if let Some(dauer) = verzoegerung {
            tokio::time::sleep(dauer).await;
        }

        if self.inner.pipeline_fehler.load(Ordering::Acquire) {
            return Err(GroupcallError::gateway("Pipeline-Erstellung abgelehnt"));
        }

        let id = format!("pipeline-{}", self.inner.naechste_id());
        self.inner
            .protokollieren(GatewayAufruf::PipelineErstellt { pipeline: id.clone() });

        Ok(Arc::new(InMemoryPipeline {
            id,
            gateway: Arc::downgrade(&self.inner),
        }))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct InMemoryPipeline {
    id: String,
    gateway: Weak<GatewayInner>,
}

impl InMemoryPipeline {
    fn gateway(&self) -> Result<Arc<GatewayInner>> {
        self.gateway
            .upgrade()
            .ok_or_else(|| GroupcallError::Getrennt("In-Memory-Gateway beendet".into()))
    }
}

#[async_trait]
impl MediaPipeline for InMemoryPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    async fn endpoint_erstellen(&self) -> Result<Arc<dyn MediaEndpoint>> {
        let gateway = self.gateway()?;
        let id = format!("{}/endpoint-{}", self.id, gateway.naechste_id());
        let (ereignis_tx, _) = broadcast::channel(EREIGNIS_KANAL_GROESSE);

        let endpoint = Arc::new(InMemoryEndpoint {
            id: id.clone(),
            gateway: Arc::downgrade(&gateway),
            ereignis_tx,
            freigegeben: AtomicBool::new(false),
        });
        gateway.endpoints.insert(id.clone(), Arc::clone(&endpoint));
        gateway.protokollieren(GatewayAufruf::EndpointErstellt {
            pipeline: self.id.clone(),
            endpoint: id,
        });

        Ok(endpoint)
    }

    async fn freigeben(&self) -> Result<()> {
        self.gateway()?
            .protokollieren(GatewayAufruf::PipelineFreigegeben {
                pipeline: self.id.clone(),
            });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Endpoint des In-Memory-Gateways
pub struct InMemoryEndpoint {
    id: String,
    gateway: Weak<GatewayInner>,
    ereignis_tx: broadcast::Sender<EndpointEvent>,
    freigegeben: AtomicBool,
}

impl InMemoryEndpoint {
    fn gateway(&self) -> Result<Arc<GatewayInner>> {
        self.gateway
            .upgrade()
            .ok_or_else(|| GroupcallError::Getrennt("In-Memory-Gateway beendet".into()))
    }
}

/// Synthetische SDP-Answer fuer einen Endpoint
pub fn sdp_antwort_fuer(endpoint_id: &str) -> String {
    format!("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns={endpoint_id}\r\nt=0 0\r\n")
}

#[async_trait]
impl MediaEndpoint for InMemoryEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn angebot_verarbeiten(&self, sdp_offer: &str) -> Result<String> {
        let gateway = self.gateway()?;
        if gateway.angebot_fehler.load(Ordering::Acquire) {
            return Err(GroupcallError::gateway("processOffer abgelehnt"));
        }
        gateway.protokollieren(GatewayAufruf::AngebotVerarbeitet {
            endpoint: self.id.clone(),
            sdp_offer: sdp_offer.to_string(),
        });
        Ok(sdp_antwort_fuer(&self.id))
    }

    async fn kandidaten_sammeln(&self) -> Result<()> {
        self.gateway()?
            .protokollieren(GatewayAufruf::KandidatenGesammelt {
                endpoint: self.id.clone(),
            });
        Ok(())
    }

    async fn verbinden(&self, senke: &dyn MediaEndpoint, art: MediaKind) -> Result<()> {
        self.gateway()?.protokollieren(GatewayAufruf::Verbunden {
            quelle: self.id.clone(),
            senke: senke.id().to_string(),
            art,
        });
        Ok(())
    }

    async fn ice_kandidat_hinzufuegen(&self, kandidat: IceCandidate) -> Result<()> {
        self.gateway()?
            .protokollieren(GatewayAufruf::IceKandidatHinzugefuegt {
                endpoint: self.id.clone(),
                kandidat,
            });
        Ok(())
    }

    async fn freigeben(&self) -> Result<()> {
        self.freigegeben.store(true, Ordering::Release);
        self.gateway()?
            .protokollieren(GatewayAufruf::EndpointFreigegeben {
                endpoint: self.id.clone(),
            });
        Ok(())
    }

    fn ereignisse_abonnieren(&self) -> broadcast::Receiver<EndpointEvent> {
        self.ereignis_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
