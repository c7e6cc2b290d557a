//! groupcall-core – Gemeinsame Typen, Traits und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Groupcall-Crates gemeinsam genutzt werden: ID-Typen, ICE-Kandidaten,
//! die Schnittstelle zum externen Media-Gateway und den zentralen Fehlertyp.

pub mod error;
pub mod media;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{GroupcallError, Result};
pub use media::{EndpointEvent, MediaEndpoint, MediaGateway, MediaPipeline};
pub use types::{ConnectionId, IceCandidate, MediaKind, RoomId};
