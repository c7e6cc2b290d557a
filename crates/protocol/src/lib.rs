//! groupcall-protocol – Signaling-Protokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen die zwischen Browser-/Mobile-
//! Client und Signaling-Server als Text-Frames (ein JSON-Objekt pro Frame)
//! ausgetauscht werden.

pub mod error;
pub mod signaling;

pub use error::DecodeError;
pub use signaling::{InboundMessage, OutboundMessage, RejectionResponse, SignalMessage};
