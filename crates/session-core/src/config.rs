//! Manager and media configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// RTP media transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Local address media sockets bind to
    pub bind_ip: IpAddr,
    /// Address written into SDP answers; derived from the route to the
    /// remote peer when unset
    pub advertised_ip: Option<IpAddr>,
    /// Packetization time used when the offer does not ask for one
    pub ptime_ms: u32,
    /// Decoded inbound frames queued between the socket and the engine
    pub inbound_queue_frames: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertised_ip: None,
            ptime_ms: 20,
            inbound_queue_frames: 64,
        }
    }
}

impl MediaConfig {
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_advertised_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.advertised_ip = ip;
        self
    }

    pub fn with_ptime_ms(mut self, ptime_ms: u32) -> Self {
        self.ptime_ms = ptime_ms;
        self
    }

    pub fn with_inbound_queue_frames(mut self, frames: usize) -> Self {
        self.inbound_queue_frames = frames;
        self
    }
}

/// Session manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Location of the sessions file
    pub store_path: PathBuf,
    /// Upper bound on one negotiate call
    pub negotiation_timeout: Duration,
    /// How long `remove` waits for an engine to shut down before dropping it
    pub shutdown_timeout: Duration,
    /// Published blocks each ring can hold before dropping the oldest
    pub ring_capacity_blocks: usize,
    pub media: MediaConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/sessions.json"),
            negotiation_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            ring_capacity_blocks: 8,
            media: MediaConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            ..Default::default()
        }
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_ring_capacity_blocks(mut self, blocks: usize) -> Self {
        self.ring_capacity_blocks = blocks;
        self
    }

    pub fn with_media(mut self, media: MediaConfig) -> Self {
        self.media = media;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.store_path, PathBuf::from("data/sessions.json"));
        assert_eq!(config.negotiation_timeout, Duration::from_secs(10));
        assert_eq!(config.ring_capacity_blocks, 8);
        assert_eq!(config.media.ptime_ms, 20);
        assert!(config.media.bind_ip.is_unspecified());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"store_path": "/tmp/s.json", "media": {"ptime_ms": 10}}"#).unwrap();
        assert_eq!(config.store_path, PathBuf::from("/tmp/s.json"));
        assert_eq!(config.media.ptime_ms, 10);
        assert_eq!(config.media.inbound_queue_frames, 64);
        assert_eq!(config.ring_capacity_blocks, 8);
    }
}
