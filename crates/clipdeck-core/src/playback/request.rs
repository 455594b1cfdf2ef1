//! Play request builder

use std::fmt;

use crate::audio::MarkerListener;
use crate::types::{Pitch, Tempo};

/// Callback run right before playback starts
pub type StartListener = Box<dyn FnOnce() + Send + 'static>;

/// One request to play a clip
///
/// ```ignore
/// coordinator.play(
///     PlayRequest::new("chime")
///         .volume(0.8)
///         .tempo(1.15)
///         .pitch(-3.0)
///         .on_completed(|| log::info!("done")),
/// );
/// ```
pub struct PlayRequest {
    pub(crate) name: String,
    pub(crate) volume: Option<f32>,
    pub(crate) tempo: Tempo,
    pub(crate) pitch: Pitch,
    pub(crate) on_started: Option<StartListener>,
    pub(crate) on_completed: Option<MarkerListener>,
}

impl PlayRequest {
    /// Play `name` (filename stem); an empty name stops every clip instead
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume: None,
            tempo: Tempo::IDENTITY,
            pitch: Pitch::IDENTITY,
            on_started: None,
            on_completed: None,
        }
    }

    /// Output gain, clamped to [0.0, 1.0] when applied
    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Tempo ratio; 1.0 plays the clip unchanged
    pub fn tempo(mut self, ratio: f32) -> Self {
        self.tempo = Tempo::from_ratio(ratio);
        self
    }

    /// Transpose by `semitones` (clamped to one octave) without changing tempo
    pub fn pitch(mut self, semitones: f32) -> Self {
        self.pitch = Pitch::from_semitones(semitones);
        self
    }

    /// Called on the playing thread immediately before playback starts
    ///
    /// Runs while the clip's handle is locked, so it must not stop or play
    /// the same clip through the coordinator.
    pub fn on_started(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_started = Some(Box::new(f));
        self
    }

    /// Called at most once, when playback reaches the end of the clip
    ///
    /// Never called if the clip is stopped, evicted or replayed first.
    pub fn on_completed(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_completed = Some(Box::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for PlayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayRequest")
            .field("name", &self.name)
            .field("volume", &self.volume)
            .field("tempo", &self.tempo)
            .field("pitch", &self.pitch)
            .field("on_started", &self.on_started.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .finish()
    }
}
