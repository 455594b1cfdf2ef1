//! Engine configuration
//!
//! Every field has a default, so a partial YAML file only overrides what it
//! names:
//!
//! ```yaml
//! namespace: audio
//! max_cache_entries: 8
//! output:
//!   buffer_frames: 256
//! ```

mod io;

pub use io::{load_config, save_config};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::OutputConfig;
use crate::cache::{CACHE_EXPIRE_TIME, MAX_CACHE_SIZE};
use crate::timestretch::DEFAULT_CHUNK_SIZE;
use crate::types::SAMPLE_RATE;
use crate::wav::DEFAULT_HEADER_SIZE;

/// Playback engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Byte-source namespace clips are preloaded from
    pub namespace: String,

    /// Rate clips are played at
    pub sample_rate: u32,

    /// Prepared sinks kept before least-recently-used eviction
    pub max_cache_entries: usize,

    /// Idle seconds after which a sink may be swept
    pub cache_expire_secs: u64,

    /// Seconds between sweeps
    pub sweep_interval_secs: u64,

    /// Reload attempts allowed when a play finds no clips loaded
    pub preload_retries: u32,

    /// Samples fed to the time-stretch engine per call
    pub stretch_chunk_size: usize,

    /// Header size assumed when a clip fails WAV validation
    pub default_header_size: usize,

    /// Background threads for preload and play requests
    pub worker_threads: usize,

    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "audio".to_string(),
            sample_rate: SAMPLE_RATE,
            max_cache_entries: MAX_CACHE_SIZE,
            cache_expire_secs: CACHE_EXPIRE_TIME.as_secs(),
            sweep_interval_secs: 60,
            preload_retries: 1,
            stretch_chunk_size: DEFAULT_CHUNK_SIZE,
            default_header_size: DEFAULT_HEADER_SIZE,
            worker_threads: 2,
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn cache_expire_time(&self) -> Duration {
        Duration::from_secs(self.cache_expire_secs)
    }

    /// Sweep interval, never shorter than one second
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Default config file location
///
/// Returns: `<config dir>/clipdeck/config.yaml` (e.g. `~/.config/clipdeck/config.yaml`)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipdeck")
        .join("config.yaml")
}
