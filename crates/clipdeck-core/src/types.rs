//! Common types for clipdeck
//!
//! Fixed output format constants and the cache key used throughout the
//! engine. Clips are always played as 16 kHz mono 16-bit PCM.

use std::fmt;

/// Sample rate every clip is played at
pub const SAMPLE_RATE: u32 = 16_000;

/// Output channel count (mono)
pub const CHANNELS: u16 = 1;

/// Bytes per PCM sample (16-bit)
pub const BYTES_PER_SAMPLE: usize = 2;

/// File extension clips are stored with
pub const CLIP_EXTENSION: &str = "wav";

/// Map a clip's base name to the filename it is stored under
///
/// `"chime"` → `"chime.wav"`
pub fn clip_filename(base_name: &str) -> String {
    format!("{}.{}", base_name, CLIP_EXTENSION)
}

/// Whether a filename carries the clip extension (case-insensitive)
pub fn is_clip_filename(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(CLIP_EXTENSION))
        .unwrap_or(false)
}

/// Tempo ratio quantized to thousandths
///
/// 1.0 = unchanged, >1.0 = faster (shorter), <1.0 = slower (longer).
/// Quantizing makes the ratio usable as a hash key: 1.15 and 1.1500001
/// address the same cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tempo(u32);

impl Tempo {
    /// Unchanged playback speed
    pub const IDENTITY: Tempo = Tempo(1000);

    /// Smallest ratio accepted (quarter speed)
    pub const MIN_RATIO: f32 = 0.25;
    /// Largest ratio accepted (4x speed)
    pub const MAX_RATIO: f32 = 4.0;

    /// Create a tempo from a ratio, clamped to [`MIN_RATIO`, `MAX_RATIO`]
    ///
    /// Non-finite ratios collapse to identity.
    ///
    /// [`MIN_RATIO`]: Tempo::MIN_RATIO
    /// [`MAX_RATIO`]: Tempo::MAX_RATIO
    pub fn from_ratio(ratio: f32) -> Self {
        if !ratio.is_finite() {
            return Self::IDENTITY;
        }
        let clamped = ratio.clamp(Self::MIN_RATIO, Self::MAX_RATIO);
        Tempo((clamped * 1000.0).round() as u32)
    }

    /// The ratio as a float
    pub fn ratio(self) -> f32 {
        self.0 as f32 / 1000.0
    }

    pub fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<f32> for Tempo {
    fn from(ratio: f32) -> Self {
        Self::from_ratio(ratio)
    }
}

/// Pitch shift in cents (hundredths of a semitone)
///
/// Clamped to one octave either way. Like [`Tempo`] it is quantized so it
/// can be part of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pitch(i32);

impl Pitch {
    /// No transposition
    pub const IDENTITY: Pitch = Pitch(0);

    /// Largest shift accepted, in semitones, up or down
    pub const MAX_SEMITONES: f32 = 12.0;

    /// Non-finite values collapse to identity
    pub fn from_semitones(semitones: f32) -> Self {
        if !semitones.is_finite() {
            return Self::IDENTITY;
        }
        let clamped = semitones.clamp(-Self::MAX_SEMITONES, Self::MAX_SEMITONES);
        Pitch((clamped * 100.0).round() as i32)
    }

    pub fn semitones(self) -> f32 {
        self.0 as f32 / 100.0
    }

    pub fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }
}

/// Key of one prepared output sink in the audio cache
///
/// Distinct tempos or pitches of the same clip are distinct entries because
/// the processed PCM differs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Clip base name (filename stem, no extension)
    pub name: String,
    pub tempo: Tempo,
    pub pitch: Pitch,
}

impl CacheKey {
    pub fn new(name: impl Into<String>, tempo: Tempo) -> Self {
        Self {
            name: name.into(),
            tempo,
            pitch: Pitch::IDENTITY,
        }
    }

    pub fn with_pitch(mut self, pitch: Pitch) -> Self {
        self.pitch = pitch;
        self
    }

    /// Whether the clip plays exactly as stored
    pub fn is_unprocessed(&self) -> bool {
        self.tempo.is_identity() && self.pitch.is_identity()
    }

    /// Key for the clip at its original tempo
    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name, Tempo::IDENTITY)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tempo.is_identity() {
            write!(f, "@{:.3}", self.tempo.ratio())?;
        }
        if !self.pitch.is_identity() {
            write!(f, "{:+.2}st", self.pitch.semitones())?;
        }
        Ok(())
    }
}
