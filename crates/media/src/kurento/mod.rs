//! Kurento-Anbindung (JSON-RPC 2.0 ueber WebSocket)
//!
//! ```text
//! KurentoGateway ── create(MediaPipeline) ──> KurentoPipeline
//! KurentoPipeline ── create(WebRtcEndpoint) + subscribe ──> KurentoEndpoint
//! KurentoEndpoint ── invoke(processOffer | gatherCandidates | connect | addIceCandidate)
//! Media-Server ── onEvent ──> Ereignis-Kanal des Endpoints
//! ```

mod client;
mod gateway;

pub use client::KurentoClient;
pub use gateway::KurentoGateway;
