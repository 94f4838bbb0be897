//! CPAL-based audio backend
//!
//! Real hardware through the CPAL (Cross-Platform Audio Library) crate.
//! Host APIs are numbered by their position in `cpal::available_hosts()`,
//! devices by their position in `host.devices()`.
//!
//! CPAL streams are not `Send`, so every stream is built, started and
//! eventually dropped on a dedicated thread that parks on a shutdown channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AudioBackend, NativeStream, StreamIo};
use crate::error::{AudioError, AudioResult};
use crate::format::{f32_to_i16, i16_to_f32};
use crate::types::{DeviceCatalog, DeviceSummary, HostApiSummary, StreamDirection, StreamParams};

/// Backend over every host API CPAL finds on this machine
#[derive(Debug, Default, Clone)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn host(&self, host_api: Option<u32>) -> AudioResult<Host> {
        let Some(index) = host_api else {
            return Ok(cpal::default_host());
        };
        let id = cpal::available_hosts()
            .get(index as usize)
            .copied()
            .ok_or(AudioError::HostApiNotFound { host_api_id: index })?;
        cpal::host_from_id(id).map_err(|e| AudioError::platform(format!("host {} unavailable: {}", index, e)))
    }

    fn device(&self, host: &Host, params: &StreamParams) -> AudioResult<Device> {
        match params.device {
            Some(index) => host
                .devices()
                .map_err(|e| AudioError::platform(format!("Failed to enumerate devices: {}", e)))?
                .nth(index as usize)
                .ok_or_else(|| AudioError::device_not_found(index)),
            None => match params.direction {
                StreamDirection::Input => host.default_input_device(),
                StreamDirection::Output => host.default_output_device(),
            }
            .ok_or_else(|| AudioError::device_not_found("default")),
        }
    }
}

fn max_channels<I>(configs: Result<I, cpal::SupportedStreamConfigsError>) -> u16
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    configs
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Pick a supported configuration matching rate and channel count,
/// preferring f32 samples over i16
fn find_matching_config(device: &Device, params: &StreamParams) -> AudioResult<(StreamConfig, SampleFormat)> {
    let configs: Vec<SupportedStreamConfigRange> = match params.direction {
        StreamDirection::Input => device.supported_input_configs().map(|c| c.collect()),
        StreamDirection::Output => device.supported_output_configs().map(|c| c.collect()),
    }
    .map_err(|e| AudioError::platform(format!("Failed to get supported {} configs: {}", params.direction, e)))?;

    let device_id = params.device_label();
    if configs.is_empty() {
        return Err(AudioError::DirectionNotSupported {
            device_id,
            direction: params.direction,
        });
    }

    let matching = |format: SampleFormat| {
        configs.iter().find(|c| {
            c.sample_format() == format
                && c.channels() == params.channels
                && c.min_sample_rate().0 <= params.sample_rate
                && c.max_sample_rate().0 >= params.sample_rate
        })
    };
    let (range, format) = matching(SampleFormat::F32)
        .map(|c| (c, SampleFormat::F32))
        .or_else(|| matching(SampleFormat::I16).map(|c| (c, SampleFormat::I16)))
        .ok_or_else(|| AudioError::FormatNotSupported {
            device_id,
            reason: format!("no f32/i16 configuration for {}", params.format().description()),
        })?;

    let mut config = range.with_sample_rate(cpal::SampleRate(params.sample_rate)).config();
    config.buffer_size = cpal::BufferSize::Fixed(params.block_size);
    Ok((config, format))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn catalog(&self) -> AudioResult<DeviceCatalog> {
        let mut catalog = DeviceCatalog::default();

        for (host_index, host_id) in cpal::available_hosts().into_iter().enumerate() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    warn!("Skipping unavailable host {}: {}", host_id.name(), e);
                    continue;
                }
            };
            let devices = host
                .devices()
                .map_err(|e| AudioError::platform(format!("Failed to enumerate devices: {}", e)))?;

            let default_input = host.default_input_device().and_then(|d| d.name().ok());
            let default_output = host.default_output_device().and_then(|d| d.name().ok());
            let mut summary = HostApiSummary {
                id: host_index as u32,
                name: host_id.name().to_string(),
                device_count: 0,
                default_input_device: None,
                default_output_device: None,
            };

            for (device_index, device) in devices.enumerate() {
                let name = device.name().unwrap_or_else(|_| format!("Device {}", device_index));
                let id = device_index as u32;
                if summary.default_input_device.is_none() && default_input.as_deref() == Some(name.as_str()) {
                    summary.default_input_device = Some(id);
                }
                if summary.default_output_device.is_none() && default_output.as_deref() == Some(name.as_str()) {
                    summary.default_output_device = Some(id);
                }

                let default_sample_rate = device
                    .default_output_config()
                    .or_else(|_| device.default_input_config())
                    .ok()
                    .map(|c| c.sample_rate().0);

                catalog.devices.push(DeviceSummary {
                    id,
                    name,
                    host_api_id: summary.id,
                    max_input_channels: max_channels(device.supported_input_configs()),
                    max_output_channels: max_channels(device.supported_output_configs()),
                    default_sample_rate,
                });
                summary.device_count += 1;
            }

            catalog.host_apis.push(summary);
        }

        Ok(catalog)
    }

    fn open_stream(&self, params: &StreamParams, io: StreamIo) -> AudioResult<Box<dyn NativeStream>> {
        if io.direction() != params.direction {
            return Err(AudioError::configuration(format!(
                "{} stream requested with a {} ring endpoint",
                params.direction,
                io.direction()
            )));
        }

        let host = self.host(params.host_api)?;
        let device = self.device(&host, params)?;
        let (config, sample_format) = find_matching_config(&device, params)?;
        let device_name = device.name().unwrap_or_else(|_| params.device_label());

        let (ready_tx, ready_rx) = mpsc::channel::<AudioResult<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_name = format!("cpal-{}-{}", params.direction, params.device_label());
        let log_name = device_name.clone();
        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let stream = match build_stream(&device, &config, sample_format, io) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::platform(format!("Failed to start stream: {}", e))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Either an explicit close or the handle being dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Stopped stream on device: {}", log_name);
            })
            .map_err(|e| AudioError::platform(format!("failed to start stream thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::platform("stream thread exited during start-up"));
            }
        }

        info!(
            "Started {} stream on device: {} ({}, {} frames/block)",
            params.direction,
            device_name,
            params.format().description(),
            params.block_size
        );

        Ok(Box::new(CpalStream {
            params: *params,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        }))
    }
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    io: StreamIo,
) -> AudioResult<cpal::Stream> {
    let on_error = |err: cpal::StreamError| error!("Audio stream error: {}", err);

    let built = match (io, sample_format) {
        (StreamIo::Capture(mut writer), SampleFormat::I16) => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                writer.write_iter(data.iter().map(|s| i16_to_f32(*s)));
            },
            on_error,
            None,
        ),
        (StreamIo::Capture(mut writer), _) => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| writer.write(data),
            on_error,
            None,
        ),
        (StreamIo::Playback(mut reader), SampleFormat::I16) => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                reader.fill_with(data, f32_to_i16);
            },
            on_error,
            None,
        ),
        (StreamIo::Playback(mut reader), _) => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                reader.fill(data);
            },
            on_error,
            None,
        ),
    };

    built.map_err(|e| AudioError::platform(format!("Failed to build stream: {}", e)))
}

/// Handle to a stream owned by its CPAL thread
#[derive(Debug)]
pub struct CpalStream {
    params: StreamParams,
    shutdown_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl NativeStream for CpalStream {
    fn params(&self) -> &StreamParams {
        &self.params
    }

    fn close(&mut self) -> AudioResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| AudioError::platform("stream thread panicked"))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
