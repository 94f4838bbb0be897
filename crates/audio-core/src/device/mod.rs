//! Audio Device Abstraction
//!
//! A backend opens native streams whose real-time callback talks to exactly
//! one side of a block ring:
//!
//! ```text
//!  capture:   device callback ──BlockWriter──▶ ring ──▶ (pump, network side)
//!  playback:  (pump, network side) ──▶ ring ──BlockReader──▶ device callback
//! ```
//!
//! The callback never blocks or allocates; everything else (device lookup,
//! buffer allocation, thread start-up) happens in `open_stream`.
//!
//! # Backends
//!
//! - [`SimulatedBackend`] - always available; timed tone source / recording sink
//! - `CpalBackend` - real hardware via cpal (feature `device-cpal`)

use std::fmt;

use crate::error::AudioResult;
use crate::ring::{BlockReader, BlockWriter};
use crate::types::{DeviceCatalog, StreamDirection, StreamParams};

#[cfg(feature = "device-cpal")]
pub mod cpal_impl;
pub mod simulated;

#[cfg(feature = "device-cpal")]
pub use cpal_impl::CpalBackend;
pub use simulated::SimulatedBackend;

/// The ring endpoint handed to a stream's real-time callback
#[derive(Debug)]
pub enum StreamIo {
    /// Capture streams write device input into the ring
    Capture(BlockWriter),
    /// Playback streams read device output from the ring
    Playback(BlockReader),
}

impl StreamIo {
    /// Direction this endpoint can serve
    pub fn direction(&self) -> StreamDirection {
        match self {
            StreamIo::Capture(_) => StreamDirection::Input,
            StreamIo::Playback(_) => StreamDirection::Output,
        }
    }
}

/// A running native stream.
///
/// `close` is idempotent; dropping an open stream closes it.
pub trait NativeStream: Send + fmt::Debug {
    /// Parameters the stream was opened with
    fn params(&self) -> &StreamParams;

    /// Stop the device and release it
    fn close(&mut self) -> AudioResult<()>;

    /// Whether `close` has completed
    fn is_closed(&self) -> bool;
}

/// Native audio subsystem
///
/// Device and host API ids are opaque integers. They are validated here,
/// lazily, when a stream is actually opened.
pub trait AudioBackend: Send + Sync + fmt::Debug {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Enumerate host APIs and devices
    fn catalog(&self) -> AudioResult<DeviceCatalog>;

    /// Open and start a stream. Blocking; call from a blocking-friendly context.
    fn open_stream(&self, params: &StreamParams, io: StreamIo) -> AudioResult<Box<dyn NativeStream>>;
}
