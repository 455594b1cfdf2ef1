//! One-shot sample rate conversion with rubato
//!
//! Clips are 16 kHz; most output devices are not. Each static buffer is
//! converted once, when it is written, so the audio callback only mixes.

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use super::error::{AudioError, AudioResult};

/// Input frames per rubato call
const CHUNK_SIZE: usize = 1024;

/// Convert a mono buffer from `source_rate` to `target_rate`
///
/// The output is trimmed of the resampler delay and cut to
/// `len * target_rate / source_rate` frames.
pub fn resample_mono(input: &[f32], source_rate: u32, target_rate: u32) -> AudioResult<Vec<f32>> {
    if source_rate == 0 || target_rate == 0 {
        return Err(AudioError::ResampleError("Sample rate cannot be zero".into()));
    }
    if source_rate == target_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        1.0,
        params,
        CHUNK_SIZE,
        1,
    )
    .map_err(|e| AudioError::ResampleError(format!("Failed to create resampler: {:?}", e)))?;

    let expected = (input.len() as u64 * target_rate as u64 / source_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay);

    let mut pos = 0;
    while input.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk = [&input[pos..pos + needed]];
        let out = resampler
            .process(&chunk[..], None)
            .map_err(|e| AudioError::ResampleError(format!("{:?}", e)))?;
        output.extend_from_slice(&out[0]);
        pos += needed;
    }

    if pos < input.len() {
        let chunk = [&input[pos..]];
        let out = resampler
            .process_partial(Some(&chunk[..]), None)
            .map_err(|e| AudioError::ResampleError(format!("{:?}", e)))?;
        output.extend_from_slice(&out[0]);
    }

    // Push the delayed tail out
    while output.len() < expected + delay {
        let out = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| AudioError::ResampleError(format!("{:?}", e)))?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let start = delay.min(output.len());
    let end = (start + expected).min(output.len());
    Ok(output[start..end].to_vec())
}
