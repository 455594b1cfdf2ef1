//! clipdeck core - clip playback engine
//!
//! Preloads short WAV clips, optionally time-stretches or transposes them,
//! and keeps a bounded cache of prepared output sinks ready to play.

pub mod audio;
pub mod cache;
pub mod config;
pub mod playback;
pub mod source;
pub mod timestretch;
pub mod types;
pub mod wav;

pub use playback::{PlayRequest, PlaybackCoordinator, PlaybackError, PlaybackResult};
pub use types::*;
