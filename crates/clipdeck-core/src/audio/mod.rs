//! Audio output for clipdeck
//!
//! Playback goes through two traits:
//!
//! - [`OutputDevice`] creates sinks and reports the minimum static buffer size
//! - [`OutputSink`] is one fully-buffered clip: write once, then
//!   play / stop / rewind until released
//!
//! The cpal backend (feature `cpal-backend`) implements both on top of a
//! single mixed output stream. Positions and markers are always expressed in
//! 16 kHz clip frames; the backend converts to the device rate internally.
//!
//! # Example Usage
//!
//! ```ignore
//! use clipdeck_core::audio::{CpalOutput, OutputConfig};
//!
//! let output = CpalOutput::start(&OutputConfig::default(), 16_000)?;
//! let coordinator = PlaybackCoordinator::new(config, Arc::new(output))?;
//! ```

mod config;
mod error;
mod sink;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
#[cfg(feature = "cpal-backend")]
mod device;
#[cfg(feature = "cpal-backend")]
mod resample;

#[cfg(test)]
pub(crate) mod mock;

pub use config::OutputConfig;
pub use error::{AudioError, AudioResult};
pub use sink::{MarkerListener, OutputDevice, OutputSink, PlayState, SinkSpec};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalOutput;
#[cfg(feature = "cpal-backend")]
pub use device::{find_output_device, list_output_devices};
#[cfg(feature = "cpal-backend")]
pub use resample::resample_mono;
