//! Peer media connections
//!
//! A [`PeerConnector`] turns a remote SDP offer into a live connection plus
//! the two PCM tracks the bridge engine talks to:
//!
//! - `outbound`: interleaved i16 frames in the negotiated format, sent to the peer
//! - `inbound`: decoded i16 frames received from the peer
//!
//! The tracks belong to the connection, not to a native stream, so a stream
//! can be swapped underneath them without renegotiating.

pub mod rtp;

pub use rtp::{RtpPeerConnection, RtpPeerConnector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use soundrelay_audio_core::{AudioFormat, PayloadCodec};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::types::{Direction, SessionId};

/// What the engine asks a connector for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRequest {
    pub session_id: SessionId,
    pub direction: Direction,
}

/// A negotiated connection and its tracks
#[derive(Debug)]
pub struct PeerLink {
    /// SDP answer to hand back to the remote side
    pub answer: String,
    pub codec: PayloadCodec,
    /// Format of the PCM exchanged on both tracks
    pub media_format: AudioFormat,
    pub outbound: mpsc::Sender<Vec<i16>>,
    pub inbound: mpsc::Receiver<Vec<i16>>,
    pub connection: Box<dyn PeerConnection>,
}

/// Builds peer connections from remote offers
#[async_trait]
pub trait PeerConnector: Send + Sync + fmt::Debug {
    /// Apply `offer` and start media for `request`
    async fn connect(&self, offer: &str, request: &MediaRequest) -> Result<PeerLink>;
}

/// A live peer connection. `close` is idempotent.
#[async_trait]
pub trait PeerConnection: Send + Sync + fmt::Debug {
    async fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn stats(&self) -> PeerStatsSnapshot;
}

/// Packet counters kept by a connection's I/O tasks
#[derive(Debug, Default)]
pub struct PeerStats {
    pub(crate) packets_sent: AtomicU64,
    pub(crate) packets_received: AtomicU64,
    pub(crate) packets_dropped: AtomicU64,
    pub(crate) send_errors: AtomicU64,
}

impl PeerStats {
    pub fn snapshot(&self) -> PeerStatsSnapshot {
        PeerStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Late, duplicate, foreign or undecodable packets, and packets the
    /// inbound track had no room for
    pub packets_dropped: u64,
    pub send_errors: u64,
}
