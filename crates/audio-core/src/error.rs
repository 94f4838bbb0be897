//! Error types for audio-core

use thiserror::Error;

use crate::types::StreamDirection;

/// Result type for audio operations
pub type AudioResult<T> = std::result::Result<T, AudioError>;

/// Errors raised by device backends, rings, codecs and converters
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    /// Device id does not exist on the selected host API
    #[error("Audio device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    /// Host API id does not exist
    #[error("Host API not found: {host_api_id}")]
    HostApiNotFound { host_api_id: u32 },

    /// Device exists but cannot run in the requested direction
    #[error("Device {device_id} has no {direction} channels")]
    DirectionNotSupported {
        device_id: String,
        direction: StreamDirection,
    },

    /// Requested parameter combination is not supported by the device
    #[error("Format not supported by device {device_id}: {reason}")]
    FormatNotSupported { device_id: String, reason: String },

    /// Failure reported by the platform audio layer
    #[error("Platform audio error: {message}")]
    PlatformError { message: String },

    /// Invalid stream or codec configuration
    #[error("Audio configuration error: {message}")]
    ConfigurationError { message: String },

    /// Malformed encoded data (RTP, payload)
    #[error("Invalid audio data: {message}")]
    InvalidData { message: String },
}

impl AudioError {
    /// Create a device-not-found error
    pub fn device_not_found(device_id: impl ToString) -> Self {
        Self::DeviceNotFound {
            device_id: device_id.to_string(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::PlatformError {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create an invalid-data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}
