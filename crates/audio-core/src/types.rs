//! Core audio types shared by backends and the session layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Direction of a native stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    /// Audio input (microphone, line in)
    Input,
    /// Audio output (speaker, line out)
    Output,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Input => write!(f, "input"),
            StreamDirection::Output => write!(f, "output"),
        }
    }
}

/// Sample rate and channel layout of an interleaved PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioFormat {
    /// Create a new audio format
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Short human readable description, e.g. `48000Hz/2ch`
    pub fn description(&self) -> String {
        format!("{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// Everything a backend needs to open one native stream.
///
/// Device and host API ids are opaque integers; `None` selects the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamParams {
    pub direction: StreamDirection,
    pub host_api: Option<u32>,
    pub device: Option<u32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback
    pub block_size: u32,
}

impl StreamParams {
    /// Format of the samples exchanged with the device
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    /// Interleaved samples in one block
    pub fn block_len(&self) -> usize {
        self.block_size as usize * self.channels as usize
    }

    /// Wall-clock duration of one block
    pub fn block_period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }

    /// Whether both params address the same physical endpoint
    pub fn same_device(&self, other: &StreamParams) -> bool {
        self.direction == other.direction && self.host_api == other.host_api && self.device == other.device
    }

    /// Printable device label used in logs and errors
    pub fn device_label(&self) -> String {
        match self.device {
            Some(id) => id.to_string(),
            None => "default".to_string(),
        }
    }
}

/// A native audio subsystem backend (e.g. ALSA, CoreAudio, WASAPI)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostApiSummary {
    pub id: u32,
    pub name: String,
    pub device_count: u32,
    pub default_input_device: Option<u32>,
    pub default_output_device: Option<u32>,
}

/// Capability listing of one hardware device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: u32,
    pub name: String,
    pub host_api_id: u32,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: Option<u32>,
}

/// Read-only enumeration of host APIs and devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCatalog {
    pub host_apis: Vec<HostApiSummary>,
    pub devices: Vec<DeviceSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_geometry() {
        let params = StreamParams {
            direction: StreamDirection::Input,
            host_api: None,
            device: Some(2),
            sample_rate: 48000,
            channels: 2,
            block_size: 480,
        };

        assert_eq!(params.block_len(), 960);
        assert_eq!(params.block_period(), Duration::from_millis(10));
        assert_eq!(params.device_label(), "2");
        assert_eq!(params.format().description(), "48000Hz/2ch");
    }

    #[test]
    fn test_same_device_ignores_format() {
        let params = StreamParams {
            direction: StreamDirection::Output,
            host_api: Some(0),
            device: Some(3),
            sample_rate: 48000,
            channels: 2,
            block_size: 480,
        };
        let resampled = StreamParams {
            sample_rate: 44100,
            channels: 1,
            ..params
        };
        assert!(params.same_device(&resampled));
        assert!(!params.same_device(&StreamParams {
            device: Some(4),
            ..params
        }));
        assert!(!params.same_device(&StreamParams {
            host_api: None,
            ..params
        }));
    }
}
