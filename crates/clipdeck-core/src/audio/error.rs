//! Audio output error types

use thiserror::Error;

/// Errors that can occur while creating or driving output sinks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// No audio output device available
    #[error("No audio output devices found")]
    NoDevices,

    /// Named device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get a usable device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build the output stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the output stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Failed to convert a buffer to the device sample rate
    #[error("Resampling failed: {0}")]
    ResampleError(String),

    /// Sink creation failed
    #[error("Failed to create output sink: {0}")]
    SinkCreation(String),

    /// Operation on a sink whose native resources were already freed
    #[error("Output sink already released")]
    Released,
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
