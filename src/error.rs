//! Error types for the duplex voice session

use std::time::Duration;

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session was disconnected before it opened")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Microphone access was refused or no input device exists.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::Audio(AudioError::PermissionDenied(_)))
    }

    /// The transport never reached the open state.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::ConnectFailed(_) | TransportError::ConnectTimeout(_))
        )
    }
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Wire format errors. Always non-fatal: the offending frame is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Payload of {0} bytes is not a whole number of 16-bit samples")]
    OddLength(usize),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// Transport errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport is not open")]
    NotOpen,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failures_are_distinguishable() {
        let denied = Error::from(AudioError::PermissionDenied("no input device".into()));
        let timeout = Error::from(TransportError::ConnectTimeout(Duration::from_secs(1)));
        let refused = Error::from(TransportError::ConnectFailed("refused".into()));

        assert!(denied.is_permission_denied());
        assert!(!denied.is_connect_failure());
        assert!(timeout.is_connect_failure());
        assert!(refused.is_connect_failure());
        assert!(!refused.is_permission_denied());
        assert!(!Error::Cancelled.is_connect_failure());
    }
}
