//! # Audio-Core
//!
//! Real-time audio plumbing for soundrelay.
//!
//! This crate provides:
//! - Device backends behind the [`AudioBackend`] trait (simulated, and CPAL with
//!   the `device-cpal` feature)
//! - A lock-free, allocation-free [block ring](ring) for the device callback boundary
//! - Streaming [format conversion](format) (channel mapping, resampling)
//! - RTP packets and the payload codecs a plain RTP/AVP peer negotiates
//!
//! ## Architecture
//!
//! ```text
//! device callback ◀──▶ BlockWriter/BlockReader ◀──▶ pump task ◀──▶ FormatConverter ◀──▶ codec/RTP
//!   (real-time)          (lock-free ring)          (async, may allocate)
//! ```
//!
//! Nothing on the left of the ring allocates, locks or waits.
//!
//! ## Feature Flags
//!
//! - `device-cpal`: hardware devices through CPAL

pub mod codec;
pub mod device;
pub mod error;
pub mod format;
pub mod ring;
pub mod rtp;
pub mod types;

pub use codec::PayloadCodec;
#[cfg(feature = "device-cpal")]
pub use device::CpalBackend;
pub use device::{AudioBackend, NativeStream, SimulatedBackend, StreamIo};
pub use error::{AudioError, AudioResult};
pub use format::FormatConverter;
pub use ring::{BlockReader, BlockWriter, RingStats, RingStatsSnapshot, block_ring};
pub use rtp::{RtpPacket, RtpPacketizer, SequenceTracker};
pub use types::{AudioFormat, DeviceCatalog, DeviceSummary, HostApiSummary, StreamDirection, StreamParams};

/// Version information for the audio library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
