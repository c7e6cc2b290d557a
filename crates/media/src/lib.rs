//! groupcall-media – Anbindungen an das externe Media-Gateway
//!
//! Implementiert die Traits aus `groupcall_core::media`:
//!
//! - `KurentoGateway` – JSON-RPC 2.0 ueber WebSocket zu einem
//!   Kurento-kompatiblen Media-Server
//! - `InMemoryGateway` – prozesslokales Gateway fuer Entwicklung und Tests;
//!   zeichnet alle Aufrufe auf und erlaubt Fehlerinjektion

pub mod kurento;
pub mod memory;

pub use kurento::{KurentoClient, KurentoGateway};
pub use memory::{sdp_antwort_fuer, GatewayAufruf, InMemoryGateway};
