//! # Session-Core
//!
//! Durable audio sessions bridged between native devices and RTP peers.
//!
//! This crate provides:
//! - [`SessionManager`]: create/update/remove/list sessions and answer SDP offers
//! - [`BridgeEngine`]: one per session, moves audio between a native stream
//!   and a peer connection across a lock-free ring
//! - [`SessionStore`]: JSON file persistence of session configurations
//! - SDP offer/answer and a plain RTP/UDP [`PeerConnector`]
//!
//! ## Architecture
//!
//! ```text
//! request layer ──▶ SessionManager ──▶ SessionStore (sessions.json)
//!                        │
//!                        └──▶ BridgeEngine (per session)
//!                                ├──▶ AudioBackend ─▶ native stream ◀─▶ ring
//!                                └──▶ PeerConnector ─▶ RTP tracks
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use soundrelay_audio_core::SimulatedBackend;
//! use soundrelay_session_core::{Direction, ManagerConfig, SessionConfigPatch, SessionManager};
//!
//! # async fn run() -> soundrelay_session_core::Result<()> {
//! let manager = SessionManager::with_rtp(
//!     ManagerConfig::new("data/sessions.json"),
//!     Arc::new(SimulatedBackend::new()),
//! )
//! .await?;
//!
//! let session = manager
//!     .create(SessionConfigPatch::named("Mic In").with_direction(Direction::Capture))
//!     .await?;
//! println!("created {}", session.config.id);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod errors;
pub mod manager;
pub mod peer;
pub mod sdp;
pub mod store;
pub mod types;

pub use bridge::{BridgeEngine, BridgeState, BridgeStats, EngineSettings};
pub use config::{ManagerConfig, MediaConfig};
pub use errors::{Result, SessionError};
pub use manager::{SessionManager, SessionStatus};
pub use peer::{MediaRequest, PeerConnection, PeerConnector, PeerLink, PeerStatsSnapshot, RtpPeerConnector};
pub use store::SessionStore;
pub use types::{
    Direction, NegotiateResponse, PersistedState, SessionConfig, SessionConfigPatch, SessionId, SessionState,
};
