//! Output sink abstraction
//!
//! An [`OutputSink`] is one prepared, fully-buffered playback resource: it is
//! created at a fixed size, written once with the whole PCM payload, then
//! played, stopped and rewound any number of times until released.
//! [`OutputDevice`] creates sinks; the cpal backend and the test mock are the
//! two implementations.

use super::error::AudioResult;

/// Callback fired when playback reaches a marker position
///
/// `FnOnce`: a marker notifies at most once, after which it is cleared.
pub type MarkerListener = Box<dyn FnOnce() + Send + 'static>;

/// Playback state of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
}

/// Format and size of a sink to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSpec {
    /// Sample rate of the PCM that will be written
    pub sample_rate: u32,
    pub channels: u16,
    /// Static buffer size in bytes
    pub buffer_bytes: usize,
}

/// A prepared static-buffer playback resource
///
/// Positions are in frames of the written PCM, independent of the rate the
/// physical device runs at. Implementations need not be `Sync`; callers
/// serialize access through a per-sink lock.
pub trait OutputSink: Send {
    /// Write the PCM payload, returning the number of samples accepted
    fn write(&mut self, pcm: &[i16]) -> AudioResult<usize>;

    /// Start (or resume) playback from the current head position
    fn play(&mut self) -> AudioResult<()>;

    /// Stop playback
    fn stop(&mut self) -> AudioResult<()>;

    fn play_state(&self) -> PlayState;

    /// Move the playback head
    fn set_playback_head(&mut self, frame: usize) -> AudioResult<()>;

    /// Set the output gain (0.0 - 1.0)
    fn set_volume(&mut self, volume: f32) -> AudioResult<()>;

    /// Notify `listener` once when playback reaches `frame`
    ///
    /// Replaces any previous marker; the replaced listener is dropped
    /// without being called.
    fn set_marker(&mut self, frame: usize, listener: MarkerListener) -> AudioResult<()>;

    /// Remove the pending marker, dropping its listener
    fn clear_marker(&mut self);

    /// Free the underlying resources; every later call fails with `Released`
    fn release(&mut self) -> AudioResult<()>;
}

/// Creates output sinks
pub trait OutputDevice: Send + Sync {
    /// Smallest static buffer the device accepts, in bytes
    fn min_buffer_bytes(&self, sample_rate: u32, channels: u16) -> usize;

    /// Create a sink ready to be written
    fn create_sink(&self, spec: &SinkSpec) -> AudioResult<Box<dyn OutputSink>>;
}
