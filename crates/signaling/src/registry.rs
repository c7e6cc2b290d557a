//! Raum- und Session-Registry
//!
//! `RoomRegistry` erzeugt Raeume bei Bedarf. Pro Raum-ID existiert eine
//! `OnceCell`, die atomar in die Map eingefuegt wird; nur der Gewinner der
//! Initialisierung erstellt die Pipeline. Gleichzeitige Erstaufrufe sehen
//! daher dieselbe `Room`-Instanz.
//!
//! `SessionRegistry` ordnet jeder Verbindung ihre aktuelle Session zu.

use dashmap::DashMap;
use groupcall_core::media::MediaGateway;
use groupcall_core::types::{ConnectionId, RoomId};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{SignalingError, SignalingResult};
use crate::room::Room;
use crate::session::UserSession;

type RaumZelle = Arc<OnceCell<Arc<Room>>>;

// ---------------------------------------------------------------------------
// RoomRegistry
// ---------------------------------------------------------------------------

/// Alle aktiven Raeume, indiziert nach ID
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RoomRegistryInner>,
}

struct RoomRegistryInner {
    raeume: DashMap<RoomId, RaumZelle>,
    gateway: Arc<dyn MediaGateway>,
}

impl RoomRegistry {
    pub fn neu(gateway: Arc<dyn MediaGateway>) -> Self {
        Self {
            inner: Arc::new(RoomRegistryInner {
                raeume: DashMap::new(),
                gateway,
            }),
        }
    }

    /// Liefert den Raum mit dieser ID und erstellt ihn bei Bedarf
    pub async fn holen_oder_erstellen(&self, id: &RoomId) -> SignalingResult<Arc<Room>> {
        let zelle = self
            .inner
            .raeume
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let ergebnis = zelle
            .get_or_try_init(|| async {
                tracing::debug!(raum = %id, "Erstelle Pipeline fuer neuen Raum");
                let pipeline = self.inner.gateway.pipeline_erstellen().await?;
                Ok::<_, SignalingError>(Arc::new(Room::neu(id.clone(), pipeline)))
            })
            .await;

        match ergebnis {
            Ok(raum) => Ok(Arc::clone(raum)),
            Err(e) => {
                // Nicht initialisierte Zelle wieder entfernen
                self.inner
                    .raeume
                    .remove_if(id, |_, z| Arc::ptr_eq(z, &zelle) && !z.initialized());
                tracing::error!(raum = %id, fehler = %e, "Raum konnte nicht erstellt werden");
                Err(e)
            }
        }
    }

    /// Liefert einen vorhandenen Raum
    pub fn holen(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.inner.raeume.get(id)?.get().cloned()
    }

    /// Entfernt einen leeren Raum und gibt seine Pipeline frei
    ///
    /// Hat der Raum (noch) Teilnehmer oder ist unter der ID inzwischen ein
    /// anderer Raum registriert, passiert nichts. Gibt zurueck ob entfernt wurde.
    pub async fn entfernen(&self, raum: &Arc<Room>) -> bool {
        let entfernt = self
            .inner
            .raeume
            .remove_if(raum.id(), |_, zelle| {
                zelle.get().is_some_and(|r| Arc::ptr_eq(r, raum)) && raum.schliessen_wenn_leer()
            })
            .is_some();

        if entfernt {
            tracing::info!(raum = %raum.id(), "Leerer Raum entfernt");
            raum.schliessen().await;
        }
        entfernt
    }

    /// Alle aktuell registrierten Raeume
    pub fn raeume(&self) -> Vec<Arc<Room>> {
        self.inner
            .raeume
            .iter()
            .filter_map(|e| e.value().get().cloned())
            .collect()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.raeume.len()
    }

    /// Gesamtzahl der Teilnehmer ueber alle Raeume
    pub fn teilnehmer_anzahl(&self) -> usize {
        self.raeume().iter().map(|r| r.anzahl()).sum()
    }

    /// Gibt an ob das Media-Gateway erreichbar ist
    pub fn gateway_verfuegbar(&self) -> bool {
        self.inner.gateway.ist_verfuegbar()
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Aktuelle Session jeder Verbindung
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sitzungen: Arc<DashMap<ConnectionId, Arc<UserSession>>>,
}

impl SessionRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert die Session einer Verbindung und gibt die vorherige zurueck
    pub fn registrieren(&self, session: Arc<UserSession>) -> Option<Arc<UserSession>> {
        self.sitzungen.insert(session.verbindung().id(), session)
    }

    pub fn holen(&self, verbindung: &ConnectionId) -> Option<Arc<UserSession>> {
        self.sitzungen.get(verbindung).map(|s| Arc::clone(&s))
    }

    pub fn entfernen(&self, verbindung: &ConnectionId) -> Option<Arc<UserSession>> {
        self.sitzungen.remove(verbindung).map(|(_, s)| s)
    }

    /// Entfernt Eintraege anderer Verbindungen die im selben Raum unter
    /// demselben Namen wie `aktuell` registriert sind
    ///
    /// Gibt die Anzahl entfernter Eintraege zurueck.
    pub fn ersetzte_entfernen(&self, aktuell: &Arc<UserSession>) -> usize {
        let vorher = self.sitzungen.len();
        self.sitzungen.retain(|_, s| {
            Arc::ptr_eq(s, aktuell)
                || s.name() != aktuell.name()
                || s.raum_id() != aktuell.raum_id()
        });
        vorher.saturating_sub(self.sitzungen.len())
    }

    pub fn anzahl(&self) -> usize {
        self.sitzungen.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use groupcall_media::InMemoryGateway;
    use std::time::Duration;

    fn registry() -> (RoomRegistry, InMemoryGateway) {
        let gateway = InMemoryGateway::neu();
        (RoomRegistry::neu(Arc::new(gateway.clone())), gateway)
    }

    #[tokio::test]
    async fn gleichzeitiges_erstellen_liefert_denselben_raum() {
        let (registry, gateway) = registry();
        gateway.erstellungs_verzoegerung_setzen(Duration::from_millis(20));
        let id = RoomId::from("lobby");

        let (a, b) = tokio::join!(
            registry.holen_oder_erstellen(&id),
            registry.holen_oder_erstellen(&id)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(gateway.pipeline_anzahl(), 1);
        assert_eq!(registry.anzahl(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn paralleles_erstellen_auf_mehreren_threads() {
        let (registry, gateway) = registry();
        gateway.erstellungs_verzoegerung_setzen(Duration::from_millis(10));
        let id = RoomId::from("lobby");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                registry.holen_oder_erstellen(&id).await.unwrap()
            }));
        }

        let mut raeume = Vec::new();
        for t in tasks {
            raeume.push(t.await.unwrap());
        }
        assert!(raeume.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(gateway.pipeline_anzahl(), 1);
    }

    #[tokio::test]
    async fn fehlgeschlagene_erstellung_hinterlaesst_nichts() {
        let (registry, gateway) = registry();
        gateway.pipeline_fehler_setzen(true);
        let id = RoomId::from("lobby");

        assert!(registry.holen_oder_erstellen(&id).await.is_err());
        assert_eq!(registry.anzahl(), 0);
        assert!(registry.holen(&id).is_none());

        gateway.pipeline_fehler_setzen(false);
        assert!(registry.holen_oder_erstellen(&id).await.is_ok());
    }

    #[tokio::test]
    async fn leerer_raum_wird_entfernt() {
        let (registry, gateway) = registry();
        let id = RoomId::from("lobby");
        let raum = registry.holen_oder_erstellen(&id).await.unwrap();
        let (h, _rx) = ConnectionHandle::neu(8);
        let session = raum.beitreten("alice", h).await.unwrap();

        assert!(!registry.entfernen(&raum).await);
        assert!(registry.holen(&id).is_some());

        raum.verlassen(&session).await;
        assert!(registry.entfernen(&raum).await);
        assert!(registry.holen(&id).is_none());
        assert!(raum.ist_geschlossen());

        for _ in 0..50 {
            if gateway.freigegebene_pipelines() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(gateway.freigegebene_pipelines(), 1);
    }

    #[tokio::test]
    async fn veralteter_raum_entfernt_nachfolger_nicht() {
        let (registry, _gateway) = registry();
        let id = RoomId::from("lobby");
        let alt = registry.holen_oder_erstellen(&id).await.unwrap();
        assert!(registry.entfernen(&alt).await);

        let neu = registry.holen_oder_erstellen(&id).await.unwrap();
        assert!(!Arc::ptr_eq(&alt, &neu));
        assert!(!registry.entfernen(&alt).await);
        assert!(registry.holen(&id).is_some());
    }

    #[tokio::test]
    async fn session_registry() {
        let (registry, _gateway) = registry();
        let raum = registry
            .holen_oder_erstellen(&RoomId::from("r"))
            .await
            .unwrap();
        let (h, _rx) = ConnectionHandle::neu(8);
        let session = raum.beitreten("alice", h.clone()).await.unwrap();

        let sitzungen = SessionRegistry::neu();
        assert!(sitzungen.registrieren(Arc::clone(&session)).is_none());
        assert!(Arc::ptr_eq(&sitzungen.holen(&h.id()).unwrap(), &session));
        assert_eq!(sitzungen.anzahl(), 1);
        assert!(sitzungen.entfernen(&h.id()).is_some());
        assert!(sitzungen.holen(&h.id()).is_none());
    }

    #[tokio::test]
    async fn ersetzte_session_wird_ausgetragen() {
        let (registry, _gateway) = registry();
        let raum = registry
            .holen_oder_erstellen(&RoomId::from("r"))
            .await
            .unwrap();
        let (h1, _r1) = ConnectionHandle::neu(8);
        let (h2, _r2) = ConnectionHandle::neu(8);
        let (hb, _rb) = ConnectionHandle::neu(8);

        let sitzungen = SessionRegistry::neu();
        sitzungen.registrieren(raum.beitreten("bob", hb.clone()).await.unwrap());
        sitzungen.registrieren(raum.beitreten("alice", h1.clone()).await.unwrap());
        let neu = raum.beitreten("alice", h2.clone()).await.unwrap();
        sitzungen.registrieren(Arc::clone(&neu));

        assert_eq!(sitzungen.ersetzte_entfernen(&neu), 1);
        assert!(sitzungen.holen(&h1.id()).is_none());
        assert!(sitzungen.holen(&h2.id()).is_some());
        assert!(sitzungen.holen(&hb.id()).is_some());
    }
}
