//! Presence-Directory – Welche Identitaeten haben welche Verbindungen
//!
//! Bildet (Domain, Benutzername) auf alle Verbindungen dieser Identitaet ab
//! (Multi-Device). Jede Bindung traegt Auth-/Anzeige-Metadaten und einen
//! Raum-Hinweis, der beim Anrufen bzw. Angerufenwerden gesetzt und beim
//! Verlassen geloescht wird.
//!
//! Der Raum-Hinweis ist nur ein Nachschlage-Kuerzel. Massgeblich fuer die
//! Mitgliedschaft ist die Teilnehmerliste des Raums; beide koennen kurzzeitig
//! auseinanderlaufen.
//!
//! Beim Schliessen einer Verbindung werden ihre Bindungen entfernt
//! (`verbindung_entfernen`).

use dashmap::DashMap;
use groupcall_core::types::{ConnectionId, RoomId};
use std::sync::Arc;

use crate::connection::ConnectionHandle;

// ---------------------------------------------------------------------------
// IdentityBinding
// ---------------------------------------------------------------------------

/// Metadaten die mit einer Identitaet gebunden werden
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMetadata {
    pub auth_token: String,
    pub display_name: String,
}

/// Bindung einer Identitaet an eine Verbindung
#[derive(Debug, Clone)]
pub struct IdentityBinding {
    /// Domain in Kleinschreibung
    pub domain: String,
    pub username: String,
    pub auth_token: String,
    pub display_name: String,
    pub verbindung: ConnectionHandle,
    pub raum_hinweis: Option<RoomId>,
}

/// Schluessel einer Identitaet: (Domain klein, Benutzername)
type IdentitaetsSchluessel = (String, String);

fn schluessel(domain: &str, username: &str) -> IdentitaetsSchluessel {
    (domain.to_lowercase(), username.to_string())
}

// ---------------------------------------------------------------------------
// PresenceDirectory
// ---------------------------------------------------------------------------

/// Verzeichnis aller gebundenen Identitaeten
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct PresenceDirectory {
    inner: Arc<PresenceInner>,
}

#[derive(Default)]
struct PresenceInner {
    /// Identitaet -> alle Bindungen (eine pro Verbindung)
    bindungen: DashMap<IdentitaetsSchluessel, Vec<IdentityBinding>>,
    /// Verbindung -> Identitaeten die an sie gebunden sind
    verbindungen: DashMap<ConnectionId, Vec<IdentitaetsSchluessel>>,
}

impl PresenceDirectory {
    /// Erstellt ein leeres Verzeichnis
    pub fn neu() -> Self {
        Self::default()
    }

    /// Bindet eine Identitaet an eine Verbindung
    ///
    /// Ist dieselbe Verbindung bereits an die Identitaet gebunden, werden nur
    /// die Metadaten aktualisiert (der Raum-Hinweis bleibt erhalten).
    pub fn binden(
        &self,
        domain: &str,
        username: &str,
        metadaten: IdentityMetadata,
        verbindung: ConnectionHandle,
    ) {
        let key = schluessel(domain, username);
        let conn_id = verbindung.id();

        {
            let mut eintrag = self.inner.bindungen.entry(key.clone()).or_default();
            match eintrag.iter_mut().find(|b| b.verbindung == verbindung) {
                Some(vorhanden) => {
                    vorhanden.auth_token = metadaten.auth_token;
                    vorhanden.display_name = metadaten.display_name;
                }
                None => eintrag.push(IdentityBinding {
                    domain: key.0.clone(),
                    username: key.1.clone(),
                    auth_token: metadaten.auth_token,
                    display_name: metadaten.display_name,
                    verbindung,
                    raum_hinweis: None,
                }),
            }
        }

        let mut schluessel_der_verbindung = self.inner.verbindungen.entry(conn_id).or_default();
        if !schluessel_der_verbindung.contains(&key) {
            schluessel_der_verbindung.push(key.clone());
        }

        tracing::info!(
            domain = %key.0,
            username = %key.1,
            verbindung = %conn_id,
            "Identitaet gebunden"
        );
    }

    /// Alle aktuellen Bindungen einer Identitaet (ggf. leer)
    pub fn bindungen_fuer(&self, domain: &str, username: &str) -> Vec<IdentityBinding> {
        self.inner
            .bindungen
            .get(&schluessel(domain, username))
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Setzt oder loescht den Raum-Hinweis auf allen Bindungen einer Identitaet
    pub fn raum_hinweis_setzen(&self, domain: &str, username: &str, raum: Option<RoomId>) {
        if let Some(mut bindungen) = self.inner.bindungen.get_mut(&schluessel(domain, username)) {
            for bindung in bindungen.iter_mut() {
                bindung.raum_hinweis = raum.clone();
            }
        }
        tracing::debug!(domain, username, raum = ?raum, "Raum-Hinweis gesetzt");
    }

    /// Erster gesetzter Raum-Hinweis einer Identitaet
    pub fn raum_hinweis(&self, domain: &str, username: &str) -> Option<RoomId> {
        self.inner
            .bindungen
            .get(&schluessel(domain, username))?
            .iter()
            .find_map(|b| b.raum_hinweis.clone())
    }

    /// Bindung die zu einer bestimmten Verbindung gehoert
    ///
    /// Ist die Verbindung an mehrere Identitaeten gebunden, gewinnt die zuerst
    /// gebundene.
    pub fn bindung_fuer_verbindung(&self, verbindung: &ConnectionId) -> Option<IdentityBinding> {
        let schluessel = self.inner.verbindungen.get(verbindung)?.clone();
        schluessel.iter().find_map(|key| {
            self.inner
                .bindungen
                .get(key)?
                .iter()
                .find(|b| b.verbindung.id() == *verbindung)
                .cloned()
        })
    }

    /// Entfernt alle Bindungen einer geschlossenen Verbindung
    ///
    /// Gibt die Anzahl entfernter Bindungen zurueck.
    pub fn verbindung_entfernen(&self, verbindung: &ConnectionId) -> usize {
        let Some((_, schluessel)) = self.inner.verbindungen.remove(verbindung) else {
            return 0;
        };

        let mut entfernt = 0;
        for key in schluessel {
            if let Some(mut bindungen) = self.inner.bindungen.get_mut(&key) {
                let vorher = bindungen.len();
                bindungen.retain(|b| b.verbindung.id() != *verbindung);
                entfernt += vorher - bindungen.len();
            }
            self.inner.bindungen.remove_if(&key, |_, b| b.is_empty());
        }

        tracing::debug!(verbindung = %verbindung, entfernt, "Presence-Bindungen entfernt");
        entfernt
    }

    /// Anzahl der Identitaeten mit mindestens einer Bindung
    pub fn identitaeten_anzahl(&self) -> usize {
        self.inner.bindungen.len()
    }

    /// Gesamtzahl aller Bindungen
    pub fn bindungen_anzahl(&self) -> usize {
        self.inner.bindungen.iter().map(|e| e.value().len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> IdentityMetadata {
        IdentityMetadata {
            auth_token: "token".into(),
            display_name: name.into(),
        }
    }

    #[test]
    fn mehrere_geraete_pro_identitaet() {
        let pd = PresenceDirectory::neu();
        let (a, _ra) = ConnectionHandle::neu(4);
        let (b, _rb) = ConnectionHandle::neu(4);

        pd.binden("acme", "bob", meta("Bob"), a.clone());
        pd.binden("ACME", "bob", meta("Bob"), b.clone());

        let bindungen = pd.bindungen_fuer("acme", "bob");
        assert_eq!(bindungen.len(), 2);
        assert_eq!(bindungen[0].verbindung, a);
        assert_eq!(bindungen[1].verbindung, b);
        assert_eq!(pd.identitaeten_anzahl(), 1);
    }

    #[test]
    fn erneutes_binden_aktualisiert_metadaten() {
        let pd = PresenceDirectory::neu();
        let (a, _ra) = ConnectionHandle::neu(4);

        pd.binden("acme", "bob", meta("Bob"), a.clone());
        pd.raum_hinweis_setzen("acme", "bob", Some(RoomId::from("r1")));
        pd.binden("acme", "bob", meta("Bobby"), a);

        let bindungen = pd.bindungen_fuer("acme", "bob");
        assert_eq!(bindungen.len(), 1);
        assert_eq!(bindungen[0].display_name, "Bobby");
        assert_eq!(bindungen[0].raum_hinweis, Some(RoomId::from("r1")));
    }

    #[test]
    fn unbekannte_identitaet_ist_leer() {
        let pd = PresenceDirectory::neu();
        assert!(pd.bindungen_fuer("acme", "niemand").is_empty());
        assert!(pd.raum_hinweis("acme", "niemand").is_none());
    }

    #[test]
    fn raum_hinweis_gilt_fuer_alle_bindungen() {
        let pd = PresenceDirectory::neu();
        let (a, _ra) = ConnectionHandle::neu(4);
        let (b, _rb) = ConnectionHandle::neu(4);
        pd.binden("acme", "alice", meta("Alice"), a);
        pd.binden("acme", "alice", meta("Alice"), b);

        let raum = RoomId::from("r1");
        pd.raum_hinweis_setzen("Acme", "alice", Some(raum.clone()));
        assert!(pd
            .bindungen_fuer("acme", "alice")
            .iter()
            .all(|b| b.raum_hinweis.as_ref() == Some(&raum)));
        assert_eq!(pd.raum_hinweis("acme", "alice"), Some(raum));

        pd.raum_hinweis_setzen("acme", "alice", None);
        assert!(pd.raum_hinweis("acme", "alice").is_none());
    }

    #[test]
    fn bindung_ueber_verbindung_finden() {
        let pd = PresenceDirectory::neu();
        let (a, _ra) = ConnectionHandle::neu(4);
        pd.binden("acme", "bob", meta("Bob"), a.clone());

        let bindung = pd.bindung_fuer_verbindung(&a.id()).unwrap();
        assert_eq!(bindung.username, "bob");
        assert!(pd.bindung_fuer_verbindung(&ConnectionId::new()).is_none());
    }

    #[test]
    fn verbindung_entfernen_raeumt_auf() {
        let pd = PresenceDirectory::neu();
        let (a, _ra) = ConnectionHandle::neu(4);
        let (b, _rb) = ConnectionHandle::neu(4);
        pd.binden("acme", "bob", meta("Bob"), a.clone());
        pd.binden("acme", "bob", meta("Bob"), b.clone());

        assert_eq!(pd.verbindung_entfernen(&a.id()), 1);
        assert_eq!(pd.bindungen_fuer("acme", "bob").len(), 1);
        assert_eq!(pd.verbindung_entfernen(&a.id()), 0);

        assert_eq!(pd.verbindung_entfernen(&b.id()), 1);
        assert_eq!(pd.identitaeten_anzahl(), 0);
        assert_eq!(pd.bindungen_anzahl(), 0);
    }

    #[test]
    fn paralleles_binden_verliert_nichts() {
        let pd = PresenceDirectory::neu();
        let mut empfaenger = Vec::new();

        std::thread::scope(|s| {
            let mut handles = Vec::new();
            for _ in 0..16 {
                let (h, rx) = ConnectionHandle::neu(1);
                empfaenger.push(rx);
                let pd = pd.clone();
                handles.push(s.spawn(move || pd.binden("acme", "bob", meta("Bob"), h)));
            }
            for h in handles {
                h.join().unwrap();
            }
        });

        assert_eq!(pd.bindungen_fuer("acme", "bob").len(), 16);
    }
}
