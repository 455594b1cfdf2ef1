//! cpal output backend
//!
//! One output stream mixes every playing sink. Each sink is a voice holding
//! its static buffer, already converted to the device rate.
//!
//! ```text
//! ┌────────────────┐  play/stop/head   ┌───────────────┐
//! │ CpalSink (×N)  │──────────────────►│  VoiceState   │◄── mixed by ──┐
//! └────────────────┘   (voice lock)    └───────────────┘               │
//!                                                            ┌─────────┴─────────┐
//!                                                            │  stream thread    │
//!                                                            │  (owns cpal       │
//!                                                            │   Stream)         │
//!                                                            └─────────┬─────────┘
//!                                      marker reached (crossbeam)      │
//! ┌────────────────┐◄──────────────────────────────────────────────────┘
//! │ marker thread  │  runs MarkerListener off the audio callback
//! └────────────────┘
//! ```
//!
//! `cpal::Stream` is not `Send`, so it is built and kept alive on its own
//! thread; dropping [`CpalOutput`] signals that thread to drop the stream.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam::channel::{self, Receiver, Sender};

use super::config::OutputConfig;
use super::device::{choose_stream_config, find_output_device};
use super::error::{AudioError, AudioResult};
use super::resample::resample_mono;
use super::sink::{MarkerListener, OutputDevice, OutputSink, PlayState, SinkSpec};
use crate::timestretch::i16_to_f32;
use crate::types::BYTES_PER_SAMPLE;

/// Smallest static buffer handed out, in frames (~20ms at 16 kHz)
const MIN_BUFFER_FRAMES: usize = 320;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable playback state of one voice, shared with the audio callback
#[derive(Default)]
struct VoiceState {
    /// Static buffer at the device rate
    samples: Arc<[f32]>,
    /// Playback head in device frames
    position: usize,
    playing: bool,
    volume: f32,
    /// Marker in device frames
    marker: Option<usize>,
    /// Armed together with `marker` and taken when it fires
    listener: Option<MarkerListener>,
}

struct Voice {
    id: u64,
    state: Mutex<VoiceState>,
}

/// A marker that was reached, on its way to the marker thread
type FiredMarker = (u64, MarkerListener);

/// Voices currently attached to the output stream
#[derive(Default)]
struct Mixer {
    voices: Mutex<Vec<Arc<Voice>>>,
}

impl Mixer {
    /// Mix all playing voices into an interleaved output buffer
    fn render(&self, data: &mut [f32], channels: usize, markers: &Sender<FiredMarker>) {
        data.fill(0.0);
        let frames = data.len() / channels.max(1);

        let voices = lock(&self.voices);
        for voice in voices.iter() {
            let mut state = lock(&voice.state);
            if !state.playing {
                continue;
            }

            let samples = state.samples.clone();
            let start = state.position.min(samples.len());
            let n = frames.min(samples.len() - start);
            let volume = state.volume;

            for (frame, &sample) in data
                .chunks_mut(channels.max(1))
                .zip(&samples[start..start + n])
            {
                for out in frame.iter_mut() {
                    *out += sample * volume;
                }
            }

            state.position = start + n;
            if let Some(marker) = state.marker {
                if state.position >= marker.min(samples.len()) {
                    state.marker = None;
                    // Never blocks: the channel is unbounded
                    if let Some(listener) = state.listener.take() {
                        let _ = markers.send((voice.id, listener));
                    }
                }
            }
            if state.position >= samples.len() {
                state.playing = false;
            }
        }
    }
}

/// Handle to the stream thread; dropping it stops audio output
struct StreamThread {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread
        self.shutdown_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Output device backed by a single cpal stream
pub struct CpalOutput {
    mixer: Arc<Mixer>,
    device_rate: u32,
    next_voice_id: AtomicU64,
    _stream: StreamThread,
    _marker_thread: JoinHandle<()>,
}

impl CpalOutput {
    /// Open the configured device and start the output stream
    ///
    /// `preferred_rate` is the rate the device is asked to run at; clips
    /// play correctly either way.
    pub fn start(config: &OutputConfig, preferred_rate: u32) -> AudioResult<Self> {
        let mixer = Arc::new(Mixer::default());
        let (marker_tx, marker_rx) = channel::unbounded::<FiredMarker>();
        let (ready_tx, ready_rx) = channel::bounded::<AudioResult<u32>>(1);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let stream_mixer = mixer.clone();
        let stream_config = config.clone();
        let handle = thread::Builder::new()
            .name("clipdeck-output".to_string())
            .spawn(move || {
                stream_thread(
                    stream_config,
                    preferred_rate,
                    stream_mixer,
                    marker_tx,
                    ready_tx,
                    shutdown_rx,
                )
            })
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        let stream = StreamThread {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        };

        let device_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamBuildError("output thread exited".into()))??;

        let marker_thread = thread::Builder::new()
            .name("clipdeck-markers".to_string())
            .spawn(move || marker_thread(marker_rx))
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        Ok(Self {
            mixer,
            device_rate,
            next_voice_id: AtomicU64::new(1),
            _stream: stream,
            _marker_thread: marker_thread,
        })
    }

    /// Rate the output stream actually runs at
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

fn stream_thread(
    config: OutputConfig,
    preferred_rate: u32,
    mixer: Arc<Mixer>,
    markers: Sender<FiredMarker>,
    ready: Sender<AudioResult<u32>>,
    shutdown: Receiver<()>,
) {
    let built = (|| -> AudioResult<(cpal::Stream, u32)> {
        let device = find_output_device(config.device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let stream_config = choose_stream_config(&device, preferred_rate, &config)?;
        let channels = stream_config.channels as usize;
        let rate = stream_config.sample_rate.0;

        log::info!(
            "[CPAL] Using {}: {} channels, {}Hz, buffer {:?}",
            device_name,
            channels,
            rate,
            stream_config.buffer_size
        );

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    mixer.render(data, channels, &markers);
                },
                move |err| {
                    log::error!("[CPAL] Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
        Ok((stream, rate))
    })();

    match built {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            // Blocks until CpalOutput is dropped
            let _ = shutdown.recv();
            drop(stream);
            log::info!("[CPAL] Output stream stopped");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

fn marker_thread(markers: Receiver<FiredMarker>) {
    for (voice_id, listener) in markers {
        if panic::catch_unwind(AssertUnwindSafe(listener)).is_err() {
            log::warn!("[CPAL] Marker listener for voice {} panicked", voice_id);
        }
    }
}

impl OutputDevice for CpalOutput {
    fn min_buffer_bytes(&self, _sample_rate: u32, channels: u16) -> usize {
        MIN_BUFFER_FRAMES * channels as usize * BYTES_PER_SAMPLE
    }

    fn create_sink(&self, spec: &SinkSpec) -> AudioResult<Box<dyn OutputSink>> {
        if spec.channels != 1 {
            return Err(AudioError::SinkCreation(format!(
                "{} channels requested, only mono is supported",
                spec.channels
            )));
        }

        let voice = Arc::new(Voice {
            id: self.next_voice_id.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(VoiceState {
                volume: 1.0,
                ..Default::default()
            }),
        });
        lock(&self.mixer.voices).push(voice.clone());

        Ok(Box::new(CpalSink {
            voice,
            mixer: self.mixer.clone(),
            source_rate: spec.sample_rate,
            device_rate: self.device_rate,
            capacity_samples: spec.buffer_bytes / BYTES_PER_SAMPLE,
            released: false,
        }))
    }
}

/// One voice of the cpal mixer
struct CpalSink {
    voice: Arc<Voice>,
    mixer: Arc<Mixer>,
    source_rate: u32,
    device_rate: u32,
    capacity_samples: usize,
    released: bool,
}

impl CpalSink {
    fn to_device_frames(&self, frames: usize) -> usize {
        if self.source_rate == 0 || self.source_rate == self.device_rate {
            return frames;
        }
        (frames as u64 * self.device_rate as u64 / self.source_rate as u64) as usize
    }

    fn check_live(&self) -> AudioResult<()> {
        if self.released {
            Err(AudioError::Released)
        } else {
            Ok(())
        }
    }
}

impl OutputSink for CpalSink {
    fn write(&mut self, pcm: &[i16]) -> AudioResult<usize> {
        self.check_live()?;
        let accepted = pcm.len().min(self.capacity_samples);
        let normalized: Vec<f32> = pcm[..accepted].iter().map(|&s| i16_to_f32(s)).collect();
        let samples = resample_mono(&normalized, self.source_rate, self.device_rate)?;

        let mut state = lock(&self.voice.state);
        state.samples = samples.into();
        state.position = 0;
        Ok(accepted)
    }

    fn play(&mut self) -> AudioResult<()> {
        self.check_live()?;
        lock(&self.voice.state).playing = true;
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.check_live()?;
        lock(&self.voice.state).playing = false;
        Ok(())
    }

    fn play_state(&self) -> PlayState {
        if !self.released && lock(&self.voice.state).playing {
            PlayState::Playing
        } else {
            PlayState::Stopped
        }
    }

    fn set_playback_head(&mut self, frame: usize) -> AudioResult<()> {
        self.check_live()?;
        let position = self.to_device_frames(frame);
        lock(&self.voice.state).position = position;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> AudioResult<()> {
        self.check_live()?;
        lock(&self.voice.state).volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    fn set_marker(&mut self, frame: usize, listener: MarkerListener) -> AudioResult<()> {
        self.check_live()?;
        let marker = self.to_device_frames(frame);
        let mut state = lock(&self.voice.state);
        state.marker = Some(marker);
        state.listener = Some(listener);
        Ok(())
    }

    fn clear_marker(&mut self) {
        let mut state = lock(&self.voice.state);
        state.marker = None;
        state.listener = None;
    }

    fn release(&mut self) -> AudioResult<()> {
        self.check_live()?;
        {
            let mut state = lock(&self.voice.state);
            state.playing = false;
            state.marker = None;
            state.listener = None;
            state.samples = Arc::from(Vec::new());
        }
        lock(&self.mixer.voices).retain(|v| v.id != self.voice.id);
        self.released = true;
        log::trace!("[CPAL] Released voice {}", self.voice.id);
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn voice_with(samples: Vec<f32>, marker: Option<usize>) -> Arc<Voice> {
        Arc::new(Voice {
            id: 7,
            state: Mutex::new(VoiceState {
                samples: samples.into(),
                position: 0,
                playing: true,
                volume: 0.5,
                marker,
                listener: None,
            }),
        })
    }

    fn counting_listener(calls: &Arc<AtomicUsize>) -> MarkerListener {
        let counter = calls.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn run_fired(rx: &Receiver<FiredMarker>) -> usize {
        let mut fired = 0;
        while let Ok((_, listener)) = rx.try_recv() {
            listener();
            fired += 1;
        }
        fired
    }

    #[test]
    fn test_render_mixes_and_stops_at_end() {
        let mixer = Mixer::default();
        let voice = voice_with(vec![1.0; 6], None);
        lock(&mixer.voices).push(voice.clone());
        let (tx, _rx) = channel::unbounded();

        let mut data = vec![0.0f32; 8]; // 4 stereo frames
        mixer.render(&mut data, 2, &tx);
        assert_eq!(data, vec![0.5; 8]);
        assert!(lock(&voice.state).playing);

        mixer.render(&mut data, 2, &tx);
        assert_eq!(data, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert!(!lock(&voice.state).playing);
    }

    #[test]
    fn test_marker_fires_once() {
        let mixer = Mixer::default();
        let voice = voice_with(vec![0.1; 10], Some(10));
        let calls = Arc::new(AtomicUsize::new(0));
        lock(&voice.state).listener = Some(counting_listener(&calls));
        lock(&mixer.voices).push(voice.clone());
        let (tx, rx) = channel::unbounded();

        let mut data = vec![0.0f32; 6];
        mixer.render(&mut data, 1, &tx);
        assert_eq!(run_fired(&rx), 0);
        mixer.render(&mut data, 1, &tx);
        assert_eq!(run_fired(&rx), 1);
        assert!(lock(&voice.state).marker.is_none());
        assert!(lock(&voice.state).listener.is_none());

        // replay from the start without re-arming: nothing fires
        {
            let mut state = lock(&voice.state);
            state.position = 0;
            state.playing = true;
        }
        mixer.render(&mut data, 1, &tx);
        mixer.render(&mut data, 1, &tx);
        assert_eq!(run_fired(&rx), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rearmed_marker_not_run_by_earlier_fire() {
        let mixer = Mixer::default();
        let voice = voice_with(vec![0.1; 4], Some(4));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        lock(&voice.state).listener = Some(counting_listener(&first));
        lock(&mixer.voices).push(voice.clone());
        let (tx, rx) = channel::unbounded();

        let mut data = vec![0.0f32; 8];
        mixer.render(&mut data, 1, &tx);

        // Replay arms a new marker before the marker thread drains the first
        {
            let mut state = lock(&voice.state);
            state.position = 0;
            state.playing = true;
            state.marker = Some(4);
            state.listener = Some(counting_listener(&second));
        }
        assert_eq!(run_fired(&rx), 1);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert!(lock(&voice.state).listener.is_some());
    }

    #[test]
    fn test_marker_thread_runs_listeners() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel::unbounded();
        let handle = thread::spawn(move || marker_thread(rx));
        tx.send((7, counting_listener(&calls))).unwrap();
        tx.send((7, Box::new(|| panic!("listener failed")) as MarkerListener))
            .unwrap();
        tx.send((8, counting_listener(&calls))).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
