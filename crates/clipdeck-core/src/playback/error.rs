//! Playback error types

use thiserror::Error;

use crate::audio::AudioError;

/// Why a play request had no audible effect
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// No raw clip data under that name
    #[error("Clip not found: {0}")]
    NotFound(String),

    /// The output sink failed while preparing or starting playback
    #[error("Audio error for {clip}: {source}")]
    Audio {
        clip: String,
        #[source]
        source: AudioError,
    },

    /// Playback started but ended without reaching its completion marker
    /// (stopped, evicted or replaced by a newer play of the same clip)
    #[error("Playback of {0} was interrupted")]
    Interrupted(String),

    /// The background worker pool could not run the request
    #[error("Playback worker pool unavailable: {0}")]
    PoolUnavailable(String),
}

impl PlaybackError {
    pub fn audio(clip: impl Into<String>, source: AudioError) -> Self {
        Self::Audio {
            clip: clip.into(),
            source,
        }
    }
}

/// Result type for playback operations
pub type PlaybackResult<T> = Result<T, PlaybackError>;
