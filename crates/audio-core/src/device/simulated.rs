//! Simulated audio devices
//!
//! Memory-backed devices that run on a timed thread instead of hardware.
//! Capture streams produce a 440 Hz tone, playback streams consume and
//! meter whatever the ring delivers. Used by tests and by hosts without
//! native audio support.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{AudioBackend, NativeStream, StreamIo};
use crate::error::{AudioError, AudioResult};
use crate::types::{DeviceCatalog, DeviceSummary, HostApiSummary, StreamDirection, StreamParams};

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.25;
const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 192_000;

/// One simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub id: u32,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl SimulatedDevice {
    /// Device with both inputs and outputs
    pub fn duplex(id: u32, channels: u16) -> Self {
        Self {
            id,
            name: format!("Simulated Device {}", id),
            max_input_channels: channels,
            max_output_channels: channels,
        }
    }

    fn max_channels(&self, direction: StreamDirection) -> u16 {
        match direction {
            StreamDirection::Input => self.max_input_channels,
            StreamDirection::Output => self.max_output_channels,
        }
    }
}

#[derive(Debug, Default)]
struct Bookkeeping {
    failing: HashSet<u32>,
    failing_close: HashSet<u32>,
    open_delay: Duration,
    close_delay: Duration,
    next_stream_id: u64,
    active: HashMap<u64, StreamParams>,
    opens: u64,
    closes: u64,
}

#[derive(Debug)]
struct Inner {
    devices: Vec<SimulatedDevice>,
    books: Mutex<Bookkeeping>,
    captured_frames: AtomicU64,
    played_frames: AtomicU64,
    /// f32 bits of the loudest played sample
    played_peak: AtomicU32,
}

/// Backend made of simulated devices
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    inner: Arc<Inner>,
}

impl SimulatedBackend {
    /// Four duplex stereo-capable devices with ids 0..=3 (8 channels max)
    pub fn new() -> Self {
        Self::with_devices((0..4).map(|id| SimulatedDevice::duplex(id, 8)).collect())
    }

    /// Backend exposing exactly `devices`
    pub fn with_devices(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            inner: Arc::new(Inner {
                devices,
                books: Mutex::new(Bookkeeping::default()),
                captured_frames: AtomicU64::new(0),
                played_frames: AtomicU64::new(0),
                played_peak: AtomicU32::new(0),
            }),
        }
    }

    /// Make every subsequent open of `device_id` fail
    pub fn fail_device(&self, device_id: u32) {
        self.inner.books.lock().failing.insert(device_id);
    }

    /// Undo [`fail_device`](Self::fail_device)
    pub fn restore_device(&self, device_id: u32) {
        self.inner.books.lock().failing.remove(&device_id);
    }

    /// Delay every open by `delay`, like a slow driver
    pub fn set_open_delay(&self, delay: Duration) {
        self.inner.books.lock().open_delay = delay;
    }

    /// Make every subsequent close of a stream on `device_id` report an error.
    ///
    /// The stream still stops and is released.
    pub fn fail_close(&self, device_id: u32) {
        self.inner.books.lock().failing_close.insert(device_id);
    }

    /// Delay every close by `delay`, like a driver stuck in teardown
    pub fn set_close_delay(&self, delay: Duration) {
        self.inner.books.lock().close_delay = delay;
    }

    /// Streams opened so far
    pub fn open_count(&self) -> u64 {
        self.inner.books.lock().opens
    }

    /// Streams closed so far
    pub fn close_count(&self) -> u64 {
        self.inner.books.lock().closes
    }

    /// Parameters of every stream currently open
    pub fn active_streams(&self) -> Vec<StreamParams> {
        self.inner.books.lock().active.values().copied().collect()
    }

    /// Frames produced by capture streams
    pub fn captured_frames(&self) -> u64 {
        self.inner.captured_frames.load(Ordering::Relaxed)
    }

    /// Frames consumed by playback streams
    pub fn played_frames(&self) -> u64 {
        self.inner.played_frames.load(Ordering::Relaxed)
    }

    /// Loudest absolute sample value any playback stream received
    pub fn played_peak(&self) -> f32 {
        f32::from_bits(self.inner.played_peak.load(Ordering::Relaxed))
    }

    fn resolve_device(&self, params: &StreamParams) -> AudioResult<&SimulatedDevice> {
        if let Some(host_api) = params.host_api {
            if host_api != 0 {
                return Err(AudioError::HostApiNotFound {
                    host_api_id: host_api,
                });
            }
        }

        let device = match params.device {
            Some(id) => self
                .inner
                .devices
                .iter()
                .find(|d| d.id == id)
                .ok_or_else(|| AudioError::device_not_found(id))?,
            None => self
                .inner
                .devices
                .iter()
                .find(|d| d.max_channels(params.direction) > 0)
                .ok_or_else(|| AudioError::device_not_found("default"))?,
        };

        let max_channels = device.max_channels(params.direction);
        if max_channels == 0 {
            return Err(AudioError::DirectionNotSupported {
                device_id: device.id.to_string(),
                direction: params.direction,
            });
        }
        if params.channels == 0 || params.channels > max_channels {
            return Err(AudioError::FormatNotSupported {
                device_id: device.id.to_string(),
                reason: format!("{} channels requested, device has {}", params.channels, max_channels),
            });
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&params.sample_rate) {
            return Err(AudioError::FormatNotSupported {
                device_id: device.id.to_string(),
                reason: format!("sample rate {} out of range", params.sample_rate),
            });
        }
        Ok(device)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn catalog(&self) -> AudioResult<DeviceCatalog> {
        let devices: Vec<DeviceSummary> = self
            .inner
            .devices
            .iter()
            .map(|d| DeviceSummary {
                id: d.id,
                name: d.name.clone(),
                host_api_id: 0,
                max_input_channels: d.max_input_channels,
                max_output_channels: d.max_output_channels,
                default_sample_rate: Some(48000),
            })
            .collect();

        let host_api = HostApiSummary {
            id: 0,
            name: "Simulated".to_string(),
            device_count: devices.len() as u32,
            default_input_device: devices
                .iter()
                .find(|d| d.max_input_channels > 0)
                .map(|d| d.id),
            default_output_device: devices
                .iter()
                .find(|d| d.max_output_channels > 0)
                .map(|d| d.id),
        };

        Ok(DeviceCatalog {
            host_apis: vec![host_api],
            devices,
        })
    }

    fn open_stream(&self, params: &StreamParams, io: StreamIo) -> AudioResult<Box<dyn NativeStream>> {
        if io.direction() != params.direction {
            return Err(AudioError::configuration(format!(
                "{} stream requested with a {} ring endpoint",
                params.direction,
                io.direction()
            )));
        }
        if params.block_size == 0 {
            return Err(AudioError::configuration("block size must be non-zero"));
        }

        let delay = self.inner.books.lock().open_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let device = self.resolve_device(params)?;
        if self.inner.books.lock().failing.contains(&device.id) {
            return Err(AudioError::platform(format!("device {} failed to open", device.id)));
        }

        let running = Arc::new(AtomicBool::new(true));
        let thread = spawn_device_thread(*params, io, running.clone(), self.inner.clone())?;

        let stream_id = {
            let mut books = self.inner.books.lock();
            books.next_stream_id += 1;
            books.opens += 1;
            let id = books.next_stream_id;
            books.active.insert(id, *params);
            id
        };

        info!(
            "Opened simulated {} stream on device {} ({}, {} frames/block)",
            params.direction,
            device.id,
            params.format().description(),
            params.block_size
        );

        Ok(Box::new(SimulatedStream {
            stream_id,
            device_id: device.id,
            params: *params,
            backend: self.inner.clone(),
            running,
            thread: Some(thread),
            closed: false,
        }))
    }
}

fn spawn_device_thread(
    params: StreamParams,
    io: StreamIo,
    running: Arc<AtomicBool>,
    backend: Arc<Inner>,
) -> AudioResult<JoinHandle<()>> {
    let name = format!("sim-{}-{}", params.direction, params.device_label());
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            let period = params.block_period();
            let channels = params.channels as usize;
            let mut block = vec![0.0f32; params.block_len()];
            let mut phase = 0.0f32;
            let phase_step = TONE_HZ / params.sample_rate as f32;
            let mut io = io;
            let mut next_tick = Instant::now();

            while running.load(Ordering::Acquire) {
                match &mut io {
                    StreamIo::Capture(writer) => {
                        for frame in block.chunks_exact_mut(channels) {
                            let value = (phase * std::f32::consts::TAU).sin() * TONE_AMPLITUDE;
                            frame.iter_mut().for_each(|s| *s = value);
                            phase = (phase + phase_step).fract();
                        }
                        writer.write(&block);
                        backend
                            .captured_frames
                            .fetch_add(params.block_size as u64, Ordering::Relaxed);
                    }
                    StreamIo::Playback(reader) => {
                        reader.fill(&mut block);
                        let peak = block.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
                        backend.played_peak.fetch_max(peak.to_bits(), Ordering::Relaxed);
                        backend
                            .played_frames
                            .fetch_add(params.block_size as u64, Ordering::Relaxed);
                    }
                }

                next_tick += period;
                let now = Instant::now();
                if next_tick > now {
                    std::thread::sleep(next_tick - now);
                } else {
                    next_tick = now;
                }
            }
        })
        .map_err(|e| AudioError::platform(format!("failed to start device thread: {}", e)))
}

/// Stream handle returned by [`SimulatedBackend`]
#[derive(Debug)]
pub struct SimulatedStream {
    stream_id: u64,
    device_id: u32,
    params: StreamParams,
    backend: Arc<Inner>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl NativeStream for SimulatedStream {
    fn params(&self) -> &StreamParams {
        &self.params
    }

    fn close(&mut self) -> AudioResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let (delay, fail) = {
            let books = self.backend.books.lock();
            (books.close_delay, books.failing_close.contains(&self.device_id))
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }

        let mut books = self.backend.books.lock();
        books.active.remove(&self.stream_id);
        books.closes += 1;
        debug!(
            "Closed simulated {} stream on device {}",
            self.params.direction,
            self.params.device_label()
        );
        if fail {
            return Err(AudioError::platform(format!("device {} failed to close", self.device_id)));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
