//! Handler fuer alle Signaling-Nachrichten
//!
//! Jeder Handler ist fuer eine Gruppe von Nachrichtentypen zustaendig
//! und hat Zugriff auf den gemeinsamen SignalingState.

pub mod call_handler;
pub mod media_handler;
pub mod presence_handler;
pub mod room_handler;
