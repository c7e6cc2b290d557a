//! Room – Teilnehmer die sich eine Media-Pipeline teilen
//!
//! Die Teilnehmerliste ist die massgebliche Quelle fuer Raum-Mitgliedschaft.
//! Namen sind innerhalb eines Raums eindeutig; ein erneuter Beitritt unter
//! demselben Namen ersetzt (und schliesst) die alte Session.
//!
//! Broadcasts an Teilnehmer sind pro Empfaenger fehlerisoliert: ein
//! fehlgeschlagenes Senden wird geloggt und blockiert die uebrigen nicht.

use groupcall_core::media::MediaPipeline;
use groupcall_core::types::RoomId;
use groupcall_protocol::SignalMessage;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::ConnectionHandle;
use crate::error::{SignalingError, SignalingResult};
use crate::session::UserSession;

/// Ein Raum mit seinen Teilnehmern
pub struct Room {
    id: RoomId,
    /// Teilnehmer in Beitrittsreihenfolge
    teilnehmer: RwLock<Vec<Arc<UserSession>>>,
    /// Benutzername des Anrufers bei Ad-hoc-Anrufen
    anrufer: RwLock<Option<String>>,
    pipeline: Arc<dyn MediaPipeline>,
    geschlossen: AtomicBool,
}

impl Room {
    /// Erstellt einen Raum mit exklusiv zugeordneter Pipeline
    pub fn neu(id: RoomId, pipeline: Arc<dyn MediaPipeline>) -> Self {
        tracing::info!(raum = %id, pipeline = pipeline.id(), "Raum erstellt");
        Self {
            id,
            teilnehmer: RwLock::new(Vec::new()),
            anrufer: RwLock::new(None),
            pipeline,
            geschlossen: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn pipeline(&self) -> &Arc<dyn MediaPipeline> {
        &self.pipeline
    }

    pub fn anrufer(&self) -> Option<String> {
        self.anrufer.read().clone()
    }

    /// Markiert den Raum als Ad-hoc-Anruf von `name`
    pub fn anrufer_setzen(&self, name: &str) {
        *self.anrufer.write() = Some(name.to_string());
    }

    /// Fuegt einen Teilnehmer hinzu
    ///
    /// Leerer Name oder leere Raum-ID: es entsteht keine Session. Ist kein
    /// Anrufer gesetzt, erfahren die anderen Teilnehmer vom Neuen und der
    /// Neue bekommt die Liste der vorhandenen Teilnehmer.
    pub async fn beitreten(
        &self,
        name: &str,
        verbindung: ConnectionHandle,
    ) -> SignalingResult<Arc<UserSession>> {
        if name.is_empty() || self.id.ist_leer() {
            return Err(SignalingError::protokoll("Name oder Raum ist leer"));
        }

        tracing::info!(raum = %self.id, teilnehmer = %name, "Teilnehmer tritt bei");
        let session = Arc::new(
            UserSession::neu(name, self.id.clone(), verbindung, Arc::clone(&self.pipeline)).await?,
        );

        let ersetzt = {
            let mut teilnehmer = self.teilnehmer.write();
            if self.geschlossen.load(Ordering::Acquire) {
                None
            } else {
                match teilnehmer.iter_mut().find(|s| s.name() == name) {
                    Some(platz) => Some(Some(std::mem::replace(platz, Arc::clone(&session)))),
                    None => {
                        teilnehmer.push(Arc::clone(&session));
                        Some(None)
                    }
                }
            }
        };

        match ersetzt {
            None => {
                session.schliessen().await;
                return Err(SignalingError::RaumGeschlossen(self.id.to_string()));
            }
            Some(Some(alt)) => {
                tracing::warn!(raum = %self.id, teilnehmer = %name, "Vorhandene Session ersetzt");
                alt.schliessen().await;
            }
            Some(None) => {}
        }

        if self.anrufer.read().is_none() {
            self.neuen_teilnehmer_melden(&session);
            self.teilnehmer_namen_senden(&session);
        }

        Ok(session)
    }

    /// Entfernt einen Teilnehmer und schliesst seine Session
    ///
    /// Alle verbleibenden Teilnehmer geben ihren Empfang vom Verlassenden
    /// frei und bekommen `participantLeft`. Ist die Session nicht (mehr)
    /// Teilnehmer, etwa weil sie durch einen Beitritt unter gleichem Namen
    /// ersetzt wurde, passiert nichts und es wird `false` geliefert.
    pub async fn verlassen(&self, session: &Arc<UserSession>) -> bool {
        let verbleibend = {
            let mut teilnehmer = self.teilnehmer.write();
            let vorher = teilnehmer.len();
            teilnehmer.retain(|s| !Arc::ptr_eq(s, session));
            if teilnehmer.len() == vorher {
                None
            } else {
                Some(teilnehmer.clone())
            }
        };

        let Some(verbleibend) = verbleibend else {
            tracing::debug!(raum = %self.id, teilnehmer = %session.name(), "Session ist kein Teilnehmer mehr");
            return false;
        };

        tracing::info!(raum = %self.id, teilnehmer = %session.name(), "Teilnehmer verlaesst Raum");

        let mut nicht_benachrichtigt = Vec::new();
        for anderer in &verbleibend {
            anderer.video_abbrechen_von(session.name()).await;
            if let Err(e) = anderer.senden(SignalMessage::ParticipantLeft {
                name: session.name().to_string(),
            }) {
                tracing::warn!(raum = %self.id, teilnehmer = %anderer.name(), fehler = %e, "participantLeft nicht zugestellt");
                nicht_benachrichtigt.push(anderer.name().to_string());
            }
        }

        if !nicht_benachrichtigt.is_empty() {
            tracing::error!(
                raum = %self.id,
                teilnehmer = %session.name(),
                nicht_benachrichtigt = ?nicht_benachrichtigt,
                "Teilnehmer konnten nicht ueber das Verlassen informiert werden"
            );
        }

        session.schliessen().await;
        true
    }

    /// Schnappschuss aller Teilnehmer in Beitrittsreihenfolge
    pub fn teilnehmer(&self) -> Vec<Arc<UserSession>> {
        self.teilnehmer.read().clone()
    }

    pub fn teilnehmer_namen(&self) -> Vec<String> {
        self.teilnehmer
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn teilnehmer_nach_name(&self, name: &str) -> Option<Arc<UserSession>> {
        self.teilnehmer
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    pub fn anzahl(&self) -> usize {
        self.teilnehmer.read().len()
    }

    pub fn ist_leer(&self) -> bool {
        self.teilnehmer.read().is_empty()
    }

    /// Sendet `newParticipantArrived` an alle anderen Teilnehmer
    ///
    /// Gibt die Anzahl erfolgreicher Zustellungen zurueck.
    pub fn neuen_teilnehmer_melden(&self, neu: &UserSession) -> usize {
        tracing::debug!(raum = %self.id, teilnehmer = %neu.name(), "Melde neuen Teilnehmer");

        let mut zugestellt = 0;
        for anderer in self.teilnehmer() {
            if anderer.name() == neu.name() {
                continue;
            }
            match anderer.senden(SignalMessage::NewParticipantArrived {
                name: neu.name().to_string(),
            }) {
                Ok(()) => zugestellt += 1,
                Err(e) => tracing::warn!(
                    raum = %self.id,
                    teilnehmer = %anderer.name(),
                    fehler = %e,
                    "newParticipantArrived nicht zugestellt"
                ),
            }
        }
        zugestellt
    }

    /// Sendet `existingParticipants` (alle ausser dem Empfaenger)
    pub fn teilnehmer_namen_senden(&self, empfaenger: &UserSession) {
        let namen: Vec<String> = self
            .teilnehmer_namen()
            .into_iter()
            .filter(|n| n != empfaenger.name())
            .collect();

        tracing::debug!(raum = %self.id, teilnehmer = %empfaenger.name(), anzahl = namen.len(), "Sende Teilnehmerliste");
        if let Err(e) = empfaenger.senden(SignalMessage::ExistingParticipants { data: namen }) {
            tracing::warn!(raum = %self.id, teilnehmer = %empfaenger.name(), fehler = %e, "existingParticipants nicht zugestellt");
        }
    }

    /// Markiert den Raum als geschlossen, falls er leer ist
    ///
    /// Danach schlaegt jeder Beitritt mit `RaumGeschlossen` fehl.
    pub fn schliessen_wenn_leer(&self) -> bool {
        let teilnehmer = self.teilnehmer.write();
        if teilnehmer.is_empty() {
            self.geschlossen.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }

    /// Schliesst alle Sessions und gibt die Pipeline im Hintergrund frei
    pub async fn schliessen(&self) {
        self.geschlossen.store(true, Ordering::Release);
        let sessions = std::mem::take(&mut *self.teilnehmer.write());
        for session in sessions {
            session.schliessen().await;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let raum = self.id.clone();
        tokio::spawn(async move {
            match pipeline.freigeben().await {
                Ok(()) => tracing::info!(raum = %raum, "Pipeline freigegeben"),
                Err(e) => tracing::error!(raum = %raum, fehler = %e, "Pipeline-Freigabe fehlgeschlagen"),
            }
        });

        tracing::info!(raum = %self.id, "Raum geschlossen");
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("teilnehmer", &self.teilnehmer_namen())
            .field("anrufer", &self.anrufer())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use groupcall_core::media::MediaGateway;
    use groupcall_media::InMemoryGateway;
    use groupcall_protocol::OutboundMessage;
    use tokio::sync::mpsc;

    async fn raum(id: &str) -> (Room, InMemoryGateway) {
        let gateway = InMemoryGateway::neu();
        let pipeline = gateway.pipeline_erstellen().await.unwrap();
        (Room::neu(RoomId::from(id), pipeline), gateway)
    }

    fn verbindung() -> (ConnectionHandle, mpsc::Receiver<OutboundMessage>) {
        ConnectionHandle::neu(32)
    }

    fn empfangen(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut nachrichten = Vec::new();
        while let Ok(n) = rx.try_recv() {
            nachrichten.push(n);
        }
        nachrichten
    }

    fn signal(s: SignalMessage) -> OutboundMessage {
        OutboundMessage::Signal(s)
    }

    #[tokio::test]
    async fn leerer_name_erzeugt_keine_session() {
        let (r, gateway) = raum("r1").await;
        let (h, _rx) = verbindung();
        assert!(matches!(
            r.beitreten("", h).await,
            Err(SignalingError::Protokoll(_))
        ));
        assert!(r.ist_leer());
        assert_eq!(gateway.endpoint_anzahl(), 0);

        let (leer, _) = raum("").await;
        let (h, _rx) = verbindung();
        assert!(leer.beitreten("alice", h).await.is_err());
    }

    #[tokio::test]
    async fn beitritt_meldet_und_listet() {
        let (r, _g) = raum("r1").await;
        let (ha, mut ra) = verbindung();
        let (hb, mut rb) = verbindung();

        r.beitreten("alice", ha).await.unwrap();
        assert_eq!(
            empfangen(&mut ra),
            vec![signal(SignalMessage::ExistingParticipants { data: vec![] })]
        );

        r.beitreten("bob", hb).await.unwrap();
        assert_eq!(
            empfangen(&mut ra),
            vec![signal(SignalMessage::NewParticipantArrived { name: "bob".into() })]
        );
        assert_eq!(
            empfangen(&mut rb),
            vec![signal(SignalMessage::ExistingParticipants {
                data: vec!["alice".into()]
            })]
        );
        assert_eq!(r.teilnehmer_namen(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn anrufer_unterdrueckt_broadcast() {
        let (r, _g) = raum("r1").await;
        r.anrufer_setzen("alice");
        let (ha, mut ra) = verbindung();
        let (hb, mut rb) = verbindung();

        r.beitreten("alice", ha).await.unwrap();
        r.beitreten("bob", hb).await.unwrap();
        assert!(empfangen(&mut ra).is_empty());
        assert!(empfangen(&mut rb).is_empty());
    }

    #[tokio::test]
    async fn gleicher_name_ersetzt_session() {
        let (r, gateway) = raum("r1").await;
        let (h1, _r1) = verbindung();
        let (h2, _r2) = verbindung();

        let alt = r.beitreten("alice", h1).await.unwrap();
        let neu = r.beitreten("alice", h2.clone()).await.unwrap();

        assert_eq!(r.anzahl(), 1);
        let aktuell = r.teilnehmer_nach_name("alice").unwrap();
        assert!(Arc::ptr_eq(&aktuell, &neu));
        assert_eq!(aktuell.verbindung(), &h2);

        for _ in 0..50 {
            if gateway.ist_freigegeben(alt.ausgehend().id()) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(gateway.ist_freigegeben(alt.ausgehend().id()));
    }

    #[tokio::test]
    async fn ersetzte_session_verlaesst_nicht() {
        let (r, _g) = raum("r1").await;
        let (hb, mut rb) = verbindung();
        let (h1, _r1) = verbindung();
        let (h2, mut r2) = verbindung();

        let bob = r.beitreten("bob", hb).await.unwrap();
        let alt = r.beitreten("alice", h1).await.unwrap();
        let neu = r.beitreten("alice", h2).await.unwrap();
        bob.endpoint_fuer(&neu).await.unwrap();
        empfangen(&mut rb);
        empfangen(&mut r2);

        assert!(!r.verlassen(&alt).await);

        assert_eq!(r.teilnehmer_namen(), vec!["bob".to_string(), "alice".to_string()]);
        assert!(empfangen(&mut rb).is_empty());
        assert!(empfangen(&mut r2).is_empty());
        assert!(bob.eingehender_endpoint("alice").await.is_some());
    }

    #[tokio::test]
    async fn beitritt_und_verlassen_stellt_zustand_wieder_her() {
        let (r, _g) = raum("r1").await;
        let (ha, _ra) = verbindung();
        let (hb, _rb) = verbindung();
        r.beitreten("alice", ha).await.unwrap();
        let vorher = r.teilnehmer_namen();

        let bob = r.beitreten("bob", hb).await.unwrap();
        r.verlassen(&bob).await;

        assert_eq!(r.teilnehmer_namen(), vorher);
    }

    #[tokio::test]
    async fn verlassen_benachrichtigt_und_gibt_frei() {
        let (r, gateway) = raum("r1").await;
        let (ha, mut ra) = verbindung();
        let (hb, _rb) = verbindung();
        let alice = r.beitreten("alice", ha).await.unwrap();
        let bob = r.beitreten("bob", hb).await.unwrap();
        let von_bob = alice.endpoint_fuer(&bob).await.unwrap();
        empfangen(&mut ra);

        r.verlassen(&bob).await;

        assert_eq!(
            empfangen(&mut ra),
            vec![signal(SignalMessage::ParticipantLeft { name: "bob".into() })]
        );
        assert!(alice.eingehender_endpoint("bob").await.is_none());
        for _ in 0..50 {
            if gateway.ist_freigegeben(von_bob.id()) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(gateway.ist_freigegeben(von_bob.id()));
    }

    #[tokio::test]
    async fn fehlerhafter_empfaenger_blockiert_andere_nicht() {
        let (r, _g) = raum("r1").await;
        let (ha, mut ra) = verbindung();
        let (hb, rb) = verbindung();
        let (hc, mut rc) = verbindung();
        let (hd, _rd) = verbindung();

        r.beitreten("alice", ha).await.unwrap();
        r.beitreten("bob", hb).await.unwrap();
        r.beitreten("carol", hc).await.unwrap();
        empfangen(&mut ra);
        empfangen(&mut rc);
        drop(rb);

        r.beitreten("dave", hd).await.unwrap();
        assert_eq!(
            empfangen(&mut ra),
            vec![signal(SignalMessage::NewParticipantArrived { name: "dave".into() })]
        );
        assert_eq!(
            empfangen(&mut rc),
            vec![signal(SignalMessage::NewParticipantArrived { name: "dave".into() })]
        );
    }

    #[tokio::test]
    async fn geschlossener_raum_lehnt_beitritt_ab() {
        let (r, _g) = raum("r1").await;
        assert!(r.schliessen_wenn_leer());
        let (h, _rx) = verbindung();
        assert!(matches!(
            r.beitreten("alice", h).await,
            Err(SignalingError::RaumGeschlossen(_))
        ));
        assert!(r.ist_leer());
    }

    #[tokio::test]
    async fn schliessen_gibt_pipeline_frei() {
        let (r, gateway) = raum("r1").await;
        let (ha, _ra) = verbindung();
        r.beitreten("alice", ha).await.unwrap();
        assert!(!r.schliessen_wenn_leer());

        r.schliessen().await;
        assert!(r.ist_leer());
        assert!(r.ist_geschlossen());
        for _ in 0..50 {
            if gateway.freigegebene_pipelines() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(gateway.freigegebene_pipelines(), 1);
    }
}
