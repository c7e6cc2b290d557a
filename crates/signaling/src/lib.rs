//! groupcall-signaling – WebSocket Signaling Layer
//!
//! Dieser Crate implementiert den Signaling-Kern fuer Gruppenanrufe: er
//! nimmt WebSocket-Verbindungen an, bindet Identitaeten, verwaltet Raeume
//! und Sessions und steuert das Media-Gateway (WebRTC-Endpoints in einer
//! Pipeline pro Raum).
//!
//! ## Architektur
//!
//! ```text
//! WebSocket Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task, serialisierte Send-Queue)
//!     |
//!     v
//! SignalingDispatcher
//!     |
//!     +-- PresenceHandler (ping, identify)
//!     +-- RoomHandler     (joinRoom, leaveRoom)
//!     +-- CallHandler     (call, incomingCallResponse)
//!     +-- MediaHandler    (receiveVideoFrom, onIceCandidate, changeMediaType)
//!
//! PresenceDirectory – Identitaet -> Verbindungen, Raum-Hinweise
//! RoomRegistry      – Raum-ID -> Room (Pipeline + Teilnehmer)
//! UserSession       – Teilnehmer: ausgehender + eingehende Endpoints
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod registry;
pub mod room;
pub mod server_state;
pub mod session;
pub mod ws;

// Bequeme Re-Exporte
pub use connection::{ClientConnection, ConnectionHandle};
pub use dispatcher::SignalingDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use presence::{IdentityBinding, IdentityMetadata, PresenceDirectory};
pub use registry::{RoomRegistry, SessionRegistry};
pub use room::Room;
pub use server_state::{SignalingConfig, SignalingState, SignalingStatistik};
pub use session::UserSession;
pub use ws::SignalingServer;
