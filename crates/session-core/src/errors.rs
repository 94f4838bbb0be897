//! Error Types for Session Core
//!
//! One variant per failure class the control plane can observe.

use soundrelay_audio_core::AudioError;
use thiserror::Error;

/// Main result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Main error type for session operations
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Malformed create/update input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Native device open/reconfigure failure
    #[error("Device error: {0}")]
    Device(#[from] AudioError),

    /// Malformed SDP, incompatible media or timeout
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Operation not valid in the engine's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation attempted after shutdown
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// I/O or parse failure on the persisted file
    #[error("Storage error: {0}")]
    Storage(String),
}

// Convenience constructors
impl SessionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SessionError::Validation(msg.into())
    }

    pub fn not_found(session_id: impl ToString) -> Self {
        SessionError::NotFound(session_id.to_string())
    }

    pub fn negotiation(msg: impl Into<String>) -> Self {
        SessionError::Negotiation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        SessionError::Conflict(msg.into())
    }

    pub fn session_closed(session_id: impl ToString) -> Self {
        SessionError::SessionClosed(session_id.to_string())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        SessionError::Storage(msg.into())
    }

    /// Stable machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Validation(_) => "ValidationError",
            SessionError::NotFound(_) => "NotFoundError",
            SessionError::Device(_) => "DeviceError",
            SessionError::Negotiation(_) => "NegotiationError",
            SessionError::Conflict(_) => "ConflictError",
            SessionError::SessionClosed(_) => "SessionClosedError",
            SessionError::Storage(_) => "StorageError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_errors_become_device_errors() {
        let err: SessionError = AudioError::device_not_found(7).into();
        assert_eq!(err.kind(), "DeviceError");
        assert_eq!(err.to_string(), "Device error: Audio device not found: 7");
    }
}
