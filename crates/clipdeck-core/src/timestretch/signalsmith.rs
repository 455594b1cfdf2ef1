//! Time-stretch engine backed by signalsmith-stretch
//!
//! signalsmith-stretch derives the stretch ratio from the ratio of input to
//! output buffer lengths on each `process` call. This adapter turns that into
//! the put/receive/flush model the pipeline drives: every submitted chunk is
//! processed into `len / tempo` output samples which are queued until drained.
//!
//! The stretcher delays its output by `input_latency / tempo + output_latency`
//! samples. That many leading samples are discarded and the tail is pushed
//! out on flush (silence worth one input latency, then the stretcher's own
//! flush), so the total output length stays close to `input_len / tempo`.
//!
//! Pitch is independent of tempo: the stretcher transposes by a fixed number
//! of semitones while the length ratio sets the speed.

use std::collections::VecDeque;

use signalsmith_stretch::Stretch;

use super::{StretchError, TimeStretchEngine};
use crate::types::{Pitch, Tempo, CHANNELS};

/// Mono time stretcher for offline clip processing
pub struct SignalsmithEngine {
    stretcher: Stretch,
    /// Tempo ratio (input_len / output_len)
    ratio: f64,
    /// Fractional output samples carried between chunks
    carry: f64,
    /// Leading latency samples still to discard
    pending_trim: usize,
    /// Processed samples waiting to be received
    ready: VecDeque<f32>,
    /// Scratch output buffer reused across chunks
    scratch: Vec<f32>,
    flushed: bool,
}

impl SignalsmithEngine {
    /// Create an engine for mono audio at `sample_rate` with the given tempo
    /// and pitch shift
    pub fn new(sample_rate: u32, tempo: Tempo, pitch: Pitch) -> Self {
        let mut stretcher = Stretch::preset_default(CHANNELS as u32, sample_rate);
        if !pitch.is_identity() {
            stretcher.set_transpose_factor_semitones(pitch.semitones(), None);
        }
        let ratio = tempo.ratio() as f64;
        let pending_trim = (stretcher.input_latency() as f64 / ratio).round() as usize
            + stretcher.output_latency();

        log::debug!(
            "[STRETCH] signalsmith: {} Hz, ratio {:.3}, pitch {:+.2}st, trim {} samples",
            sample_rate,
            ratio,
            pitch.semitones(),
            pending_trim
        );

        Self {
            stretcher,
            ratio,
            carry: 0.0,
            pending_trim,
            ready: VecDeque::new(),
            scratch: Vec::new(),
            flushed: false,
        }
    }

    /// Queue the first `len` scratch samples, discarding any latency still owed
    fn enqueue_scratch(&mut self, len: usize) {
        let skip = self.pending_trim.min(len);
        self.pending_trim -= skip;
        self.ready.extend(&self.scratch[skip..len]);
    }

    fn process_chunk(&mut self, input: &[f32]) {
        let exact = input.len() as f64 / self.ratio + self.carry;
        let out_len = exact.floor() as usize;
        self.carry = exact - out_len as f64;

        if self.scratch.len() < out_len {
            self.scratch.resize(out_len, 0.0);
        }
        self.scratch[..out_len].fill(0.0);
        self.stretcher.process(input, &mut self.scratch[..out_len]);
        self.enqueue_scratch(out_len);
    }
}

impl TimeStretchEngine for SignalsmithEngine {
    fn put_samples(&mut self, samples: &[f32]) -> Result<(), StretchError> {
        if self.flushed {
            return Err(StretchError::engine(
                super::StretchPhase::Feeding,
                "samples submitted after flush",
            ));
        }
        if !samples.is_empty() {
            self.process_chunk(samples);
        }
        Ok(())
    }

    fn receive_samples(&mut self, output: &mut [f32]) -> usize {
        let n = output.len().min(self.ready.len());
        for (slot, sample) in output.iter_mut().zip(self.ready.drain(..n)) {
            *slot = sample;
        }
        n
    }

    fn flush(&mut self) -> Result<(), StretchError> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;

        // Push the samples still sitting in the input window through
        let silence = vec![0.0f32; self.stretcher.input_latency()];
        self.process_chunk(&silence);

        let tail_len = self.stretcher.output_latency();
        if self.scratch.len() < tail_len {
            self.scratch.resize(tail_len, 0.0);
        }
        self.scratch[..tail_len].fill(0.0);
        self.stretcher.flush(&mut self.scratch[..tail_len]);
        self.enqueue_scratch(tail_len);
        Ok(())
    }

    fn available(&self) -> usize {
        self.ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SAMPLE_RATE;

    fn tone(len: usize) -> Vec<f32> {
        tone_at(440.0, len)
    }

    fn tone_at(freq: f32, len: usize) -> Vec<f32> {
        let step = freq * 2.0 * std::f32::consts::PI / SAMPLE_RATE as f32;
        (0..len).map(|i| (i as f32 * step).sin() * 0.5).collect()
    }

    /// Sign changes per second, a rough frequency estimate for a pure tone
    fn zero_crossing_rate(samples: &[f32]) -> f32 {
        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        crossings as f32 * SAMPLE_RATE as f32 / samples.len() as f32 / 2.0
    }

    fn run(engine: &mut SignalsmithEngine, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        let mut buf = vec![0.0; 4096];
        for chunk in input.chunks(4096) {
            engine.put_samples(chunk).unwrap();
            loop {
                let n = engine.receive_samples(&mut buf);
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
        }
        engine.flush().unwrap();
        loop {
            let n = engine.receive_samples(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_speedup_shortens_output() {
        let input = tone(SAMPLE_RATE as usize); // 1 second
        let mut engine =
            SignalsmithEngine::new(SAMPLE_RATE, Tempo::from_ratio(1.15), Pitch::IDENTITY);
        let out = run(&mut engine, &input);

        let expected = input.len() as f64 / 1.15;
        let diff = (out.len() as f64 - expected).abs();
        assert!(
            diff < expected * 0.05,
            "output {} samples, expected ~{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn test_slowdown_lengthens_output() {
        let input = tone(SAMPLE_RATE as usize);
        let mut engine =
            SignalsmithEngine::new(SAMPLE_RATE, Tempo::from_ratio(0.8), Pitch::IDENTITY);
        let out = run(&mut engine, &input);
        assert!(out.len() > input.len());
    }

    #[test]
    fn test_pitch_shift_keeps_length_and_lowers_tone() {
        let input = tone_at(880.0, SAMPLE_RATE as usize);
        let mut engine =
            SignalsmithEngine::new(SAMPLE_RATE, Tempo::IDENTITY, Pitch::from_semitones(-12.0));
        let out = run(&mut engine, &input);

        let diff = (out.len() as f64 - input.len() as f64).abs();
        assert!(diff < input.len() as f64 * 0.05, "output {} samples", out.len());

        // Skip the edges; an octave down should land near 440 Hz
        let steady = &out[out.len() / 4..out.len() * 3 / 4];
        let freq = zero_crossing_rate(steady);
        assert!(freq > 330.0 && freq < 660.0, "estimated {} Hz", freq);
    }

    #[test]
    fn test_put_after_flush_is_rejected() {
        let mut engine =
            SignalsmithEngine::new(SAMPLE_RATE, Tempo::from_ratio(1.5), Pitch::IDENTITY);
        engine.flush().unwrap();
        assert!(engine.put_samples(&[0.0; 16]).is_err());
    }
}
