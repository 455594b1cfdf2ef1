//! Output backend configuration

use serde::{Deserialize, Serialize};

/// Configuration for the output device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output device name as reported by the host (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Requested stream buffer size in frames (None = host default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_frames: Option<u32>,
}

impl OutputConfig {
    /// Use a specific output device
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device = Some(name.into());
        self
    }

    /// Request a fixed stream buffer size in frames
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = Some(frames);
        self
    }

    /// Output latency in milliseconds for the requested buffer, if fixed
    pub fn latency_ms(&self, sample_rate: u32) -> Option<f32> {
        self.buffer_frames
            .map(|frames| (frames as f32 / sample_rate as f32) * 1000.0)
    }
}
