//! Types for SDP negotiation

use soundrelay_audio_core::{AudioFormat, PayloadCodec};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Media direction attribute (`a=sendrecv` and friends)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn attribute(&self) -> &'static str {
        match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        }
    }

    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "sendrecv" => Some(MediaDirection::SendRecv),
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }

    /// Whether the party using this direction sends media
    pub fn sends(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::SendOnly)
    }

    /// Whether the party using this direction receives media
    pub fn receives(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::RecvOnly)
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribute())
    }
}

/// `a=rtpmap:<pt> <encoding>/<clock rate>[/<channels>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding: String,
    pub clock_rate: u32,
    pub channels: Option<u16>,
}

/// `o=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: u64,
    pub session_version: u64,
    pub address: IpAddr,
}

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<u8>,
    pub connection: Option<IpAddr>,
    pub rtpmaps: Vec<RtpMap>,
    pub direction: Option<MediaDirection>,
    pub ptime: Option<u32>,
}

impl MediaDescription {
    pub fn rtpmap(&self, payload_type: u8) -> Option<&RtpMap> {
        self.rtpmaps.iter().find(|m| m.payload_type == payload_type)
    }
}

/// A parsed session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub origin: Option<Origin>,
    pub session_name: String,
    /// Session-level `c=` address
    pub connection: Option<IpAddr>,
    /// Session-level direction attribute
    pub direction: Option<MediaDirection>,
    pub media: Vec<MediaDescription>,
}

/// Outcome of applying an offer to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedMedia {
    pub codec: PayloadCodec,
    pub payload_type: u8,
    /// Sample format carried on the wire
    pub format: AudioFormat,
    pub remote_addr: SocketAddr,
    /// Transport profile echoed from the offer
    pub protocol: String,
    pub ptime_ms: u32,
    /// Direction we answer with
    pub local_direction: MediaDirection,
}

impl NegotiatedMedia {
    /// Frames carried by one packet
    pub fn frames_per_packet(&self) -> usize {
        (self.format.sample_rate as usize * self.ptime_ms as usize / 1000).max(1)
    }
}
