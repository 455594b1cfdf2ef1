//! Tempo and pitch processing for clips
//!
//! Speeds a clip up or slows it down, optionally transposing it, without
//! changing its sample rate, then rebuilds the WAV container around the new
//! payload. The same pipeline backs offline file conversion.
//!
//! # Pipeline
//!
//! ```text
//! Idle → Configured → Feeding (put chunk → drain until empty)* → Flushing → FinalDrain → Released
//! ```
//!
//! Samples are normalized from i16 to [-1.0, 1.0] before submission and
//! clamped back on the way out. Input is fed in fixed chunks; after every
//! chunk all currently available output is drained, and after the flush the
//! drain runs once more to collect the samples the stretcher holds for its
//! analysis window. The engine is released when it is dropped, so cleanup
//! happens on every path, including errors and panics.
//!
//! [`stretch_wav`] is fail-open: if anything goes wrong the original bytes are
//! returned and the clip plays unchanged. [`try_stretch_wav`] and
//! [`stretch_file`] report the failure instead.

mod signalsmith;

pub use signalsmith::SignalsmithEngine;

use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{Pitch, Tempo, SAMPLE_RATE};
use crate::wav;

/// Samples submitted to the engine per put
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Stage of one stretch invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StretchPhase {
    Idle,
    Configured,
    Feeding,
    Flushing,
    FinalDrain,
    Released,
}

impl fmt::Display for StretchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StretchPhase::Idle => "idle",
            StretchPhase::Configured => "configuring",
            StretchPhase::Feeding => "feeding",
            StretchPhase::Flushing => "flushing",
            StretchPhase::FinalDrain => "draining",
            StretchPhase::Released => "releasing",
        };
        f.write_str(name)
    }
}

/// Time-stretch failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StretchError {
    /// The engine reported a failure
    #[error("Time-stretch engine failed while {phase}: {message}")]
    Engine { phase: StretchPhase, message: String },

    /// The engine panicked; it has been dropped
    #[error("Time-stretch engine panicked while {0}")]
    Panicked(StretchPhase),

    /// The engine could not be created
    #[error("Failed to configure time-stretch engine: {0}")]
    Configure(String),

    /// Reading the input or writing the output file failed
    #[error("{}: {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl StretchError {
    pub fn engine(phase: StretchPhase, message: impl Into<String>) -> Self {
        Self::Engine {
            phase,
            message: message.into(),
        }
    }
}

/// A stateful tempo processor for mono float samples
///
/// Configured at construction (sample rate, mono, tempo, pitch) and released
/// on drop. Output becomes available incrementally while feeding; `flush`
/// pushes out whatever the engine still holds internally.
pub trait TimeStretchEngine {
    /// Submit input samples
    fn put_samples(&mut self, samples: &[f32]) -> Result<(), StretchError>;

    /// Copy up to `output.len()` processed samples out, returning how many
    fn receive_samples(&mut self, output: &mut [f32]) -> usize;

    /// Signal end of input
    fn flush(&mut self) -> Result<(), StretchError>;

    /// Processed samples ready to be received
    fn available(&self) -> usize;
}

/// Creates an engine for a (sample rate, tempo, pitch) triple
pub type EngineFactory<'a> =
    dyn Fn(u32, Tempo, Pitch) -> Result<Box<dyn TimeStretchEngine>, StretchError> + 'a;

/// Factory for the default signalsmith-stretch engine
pub fn signalsmith_factory(
    sample_rate: u32,
    tempo: Tempo,
    pitch: Pitch,
) -> Result<Box<dyn TimeStretchEngine>, StretchError> {
    if sample_rate == 0 {
        return Err(StretchError::Configure("sample rate is zero".into()));
    }
    Ok(Box::new(SignalsmithEngine::new(sample_rate, tempo, pitch)))
}

/// Normalize a signed 16-bit sample to [-1.0, 1.0)
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Clamp to [-1.0, 1.0] and scale back to a signed 16-bit sample
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Decode little-endian 16-bit PCM bytes (a trailing odd byte is dropped)
pub fn decode_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian 16-bit PCM bytes
pub fn encode_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Drain every sample the engine currently has ready
fn drain_into(engine: &mut dyn TimeStretchEngine, buf: &mut [f32], out: &mut Vec<f32>) {
    loop {
        let n = engine.receive_samples(buf);
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Run float samples through an engine: chunked feed, flush, final drain
pub fn stretch_samples(
    engine: &mut dyn TimeStretchEngine,
    input: &[f32],
    chunk_size: usize,
) -> Result<Vec<f32>, StretchError> {
    let mut phase = StretchPhase::Configured;
    run_engine(engine, input, chunk_size, &mut phase)
}

fn run_engine(
    engine: &mut dyn TimeStretchEngine,
    input: &[f32],
    chunk_size: usize,
    phase: &mut StretchPhase,
) -> Result<Vec<f32>, StretchError> {
    let chunk_size = chunk_size.max(1);
    let mut output = Vec::with_capacity(input.len());
    let mut buf = vec![0.0f32; chunk_size];

    *phase = StretchPhase::Feeding;
    for chunk in input.chunks(chunk_size) {
        engine.put_samples(chunk)?;
        drain_into(engine, &mut buf, &mut output);
    }

    *phase = StretchPhase::Flushing;
    engine.flush()?;

    *phase = StretchPhase::FinalDrain;
    drain_into(engine, &mut buf, &mut output);
    Ok(output)
}

/// Change the tempo and pitch of 16-bit mono samples
///
/// Identity tempo and pitch skip the engine entirely; the samples still pass
/// through normalization so the result is within one LSB of the input.
pub fn stretch_pcm16(
    samples: &[i16],
    sample_rate: u32,
    tempo: Tempo,
    pitch: Pitch,
    chunk_size: usize,
    factory: &EngineFactory<'_>,
) -> Result<Vec<i16>, StretchError> {
    let normalized: Vec<f32> = samples.iter().map(|&s| i16_to_f32(s)).collect();

    if tempo.is_identity() && pitch.is_identity() {
        return Ok(normalized.into_iter().map(f32_to_i16).collect());
    }

    let mut phase = StretchPhase::Idle;
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        phase = StretchPhase::Configured;
        let mut engine = factory(sample_rate, tempo, pitch)?;
        let out = run_engine(engine.as_mut(), &normalized, chunk_size, &mut phase);
        phase = StretchPhase::Released;
        drop(engine);
        out
    }));

    let stretched = match result {
        Ok(out) => out?,
        Err(_) => return Err(StretchError::Panicked(phase)),
    };

    Ok(stretched.into_iter().map(f32_to_i16).collect())
}

/// Rebuild a WAV file with its payload stretched and transposed
///
/// The original header bytes are kept verbatim except for the RIFF size
/// and the data chunk length. An unparseable header falls back to
/// `fallback_header_size` bytes at 16 kHz.
pub fn try_stretch_wav(
    bytes: &[u8],
    tempo: Tempo,
    pitch: Pitch,
    chunk_size: usize,
    fallback_header_size: usize,
    factory: &EngineFactory<'_>,
) -> Result<Vec<u8>, StretchError> {
    if tempo.is_identity() && pitch.is_identity() {
        return Ok(bytes.to_vec());
    }

    let (header_size, sample_rate) = match wav::parse(bytes) {
        Ok(info) if info.sample_rate > 0 => (info.header_size, info.sample_rate),
        Ok(info) => (info.header_size, SAMPLE_RATE),
        Err(e) => {
            log::warn!(
                "[STRETCH] {}, assuming {}-byte header at {} Hz",
                e,
                fallback_header_size,
                SAMPLE_RATE
            );
            (fallback_header_size, SAMPLE_RATE)
        }
    };
    let header_size = header_size.min(bytes.len());
    let (header, payload) = bytes.split_at(header_size);

    let samples = decode_pcm16(payload);
    let stretched = stretch_pcm16(&samples, sample_rate, tempo, pitch, chunk_size, factory)?;

    let pcm = encode_pcm16(&stretched);
    let mut out = Vec::with_capacity(header.len() + pcm.len());
    out.extend_from_slice(header);
    out.extend_from_slice(&pcm);
    let total_len = out.len();
    if !wav::patch_sizes(&mut out, total_len, pcm.len()) {
        log::debug!("[STRETCH] No data chunk in header, only RIFF size rewritten");
    }
    log::debug!(
        "[STRETCH] {} → {} samples at tempo {:.3}, pitch {:+.2}st",
        samples.len(),
        stretched.len(),
        tempo.ratio(),
        pitch.semitones()
    );
    Ok(out)
}

/// Fail-open [`try_stretch_wav`]: on any failure the original bytes are
/// returned unchanged
pub fn stretch_wav(
    bytes: &[u8],
    tempo: Tempo,
    pitch: Pitch,
    chunk_size: usize,
    fallback_header_size: usize,
    factory: &EngineFactory<'_>,
) -> Vec<u8> {
    match try_stretch_wav(bytes, tempo, pitch, chunk_size, fallback_header_size, factory) {
        Ok(out) => out,
        Err(e) => {
            log::warn!("[STRETCH] {}, playing unchanged", e);
            bytes.to_vec()
        }
    }
}

/// Stretch and transpose the WAV file at `input` into `output`
///
/// Unlike [`stretch_wav`] nothing is written when processing fails. Returns
/// the number of output frames.
pub fn stretch_file(
    input: &Path,
    output: &Path,
    tempo: Tempo,
    pitch: Pitch,
    chunk_size: usize,
    fallback_header_size: usize,
    factory: &EngineFactory<'_>,
) -> Result<usize, StretchError> {
    let io_error = |path: &Path, e: std::io::Error| StretchError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let bytes = fs::read(input).map_err(|e| io_error(input, e))?;
    let out = try_stretch_wav(&bytes, tempo, pitch, chunk_size, fallback_header_size, factory)?;
    fs::write(output, &out).map_err(|e| io_error(output, e))?;

    let frames = wav::parse(&out)
        .map(|info| info.data_size as usize / 2)
        .unwrap_or_else(|_| out.len().saturating_sub(fallback_header_size) / 2);
    log::info!(
        "[STRETCH] Wrote {} ({} frames) from {}",
        output.display(),
        frames,
        input.display()
    );
    Ok(frames)
}
