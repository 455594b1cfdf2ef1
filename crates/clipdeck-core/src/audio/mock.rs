//! Recording output device for tests
//!
//! Every sink call is appended to a shared [`SinkCall`] log. Markers are held
//! by the device so a test can fire them explicitly, or the device can fire
//! them on a helper thread as soon as a sink starts playing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use super::error::{AudioError, AudioResult};
use super::sink::{MarkerListener, OutputDevice, OutputSink, PlayState, SinkSpec};

/// One recorded sink operation
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Create { id: u64, spec: SinkSpec },
    Write { id: u64, samples: usize },
    Play { id: u64 },
    Stop { id: u64 },
    Head { id: u64, frame: usize },
    Volume { id: u64, volume: f32 },
    Marker { id: u64, frame: usize },
    Release { id: u64 },
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<SinkCall>>,
    markers: Mutex<HashMap<u64, MarkerListener>>,
    playing: Mutex<HashMap<u64, bool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Output device that records instead of producing sound
#[derive(Clone)]
pub struct MockDevice {
    shared: Arc<Shared>,
    next_id: Arc<AtomicU64>,
    auto_complete: bool,
    fail_create: Arc<AtomicBool>,
    fail_release: Arc<AtomicBool>,
    min_buffer_bytes: usize,
}

impl MockDevice {
    /// Markers only fire through [`MockDevice::fire_marker`]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            next_id: Arc::new(AtomicU64::new(1)),
            auto_complete: false,
            fail_create: Arc::new(AtomicBool::new(false)),
            fail_release: Arc::new(AtomicBool::new(false)),
            min_buffer_bytes: 0,
        }
    }

    /// Playback "finishes" immediately: the marker fires right after `play`
    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Self::new()
        }
    }

    pub fn with_min_buffer_bytes(mut self, bytes: usize) -> Self {
        self.min_buffer_bytes = bytes;
        self
    }

    /// Make every following `create_sink` fail
    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `release` on every sink fail after recording the call
    pub fn fail_releases(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.shared.calls).clone()
    }

    pub fn creates(&self) -> Vec<SinkSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Create { spec, .. } => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&SinkCall) -> bool) -> usize {
        lock(&self.shared.calls).iter().filter(|c| matches(c)).count()
    }

    pub fn plays(&self) -> usize {
        self.count(|c| matches!(c, SinkCall::Play { .. }))
    }

    pub fn releases(&self) -> usize {
        self.count(|c| matches!(c, SinkCall::Release { .. }))
    }

    pub fn is_playing(&self, id: u64) -> bool {
        lock(&self.shared.playing).get(&id).copied().unwrap_or(false)
    }

    /// Ids of sinks with a pending marker
    pub fn armed_markers(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = lock(&self.shared.markers).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Fire the pending marker of sink `id`, as if playback reached it
    pub fn fire_marker(&self, id: u64) -> bool {
        let listener = lock(&self.shared.markers).remove(&id);
        lock(&self.shared.playing).insert(id, false);
        match listener {
            Some(listener) => {
                listener();
                true
            }
            None => false,
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for MockDevice {
    fn min_buffer_bytes(&self, _sample_rate: u32, _channels: u16) -> usize {
        self.min_buffer_bytes
    }

    fn create_sink(&self, spec: &SinkSpec) -> AudioResult<Box<dyn OutputSink>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AudioError::SinkCreation("mock failure".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.calls).push(SinkCall::Create { id, spec: *spec });
        Ok(Box::new(MockSink {
            id,
            shared: self.shared.clone(),
            auto_complete: self.auto_complete,
            capacity_samples: spec.buffer_bytes / 2,
            fail_release: self.fail_release.clone(),
            released: false,
        }))
    }
}

struct MockSink {
    id: u64,
    shared: Arc<Shared>,
    auto_complete: bool,
    capacity_samples: usize,
    fail_release: Arc<AtomicBool>,
    released: bool,
}

impl MockSink {
    fn record(&self, call: SinkCall) -> AudioResult<()> {
        if self.released {
            return Err(AudioError::Released);
        }
        lock(&self.shared.calls).push(call);
        Ok(())
    }

    fn set_playing(&self, playing: bool) {
        lock(&self.shared.playing).insert(self.id, playing);
    }
}

impl OutputSink for MockSink {
    fn write(&mut self, pcm: &[i16]) -> AudioResult<usize> {
        let samples = pcm.len().min(self.capacity_samples);
        self.record(SinkCall::Write { id: self.id, samples })?;
        Ok(samples)
    }

    fn play(&mut self) -> AudioResult<()> {
        self.record(SinkCall::Play { id: self.id })?;
        self.set_playing(true);
        if self.auto_complete {
            let shared = self.shared.clone();
            let id = self.id;
            thread::spawn(move || {
                lock(&shared.playing).insert(id, false);
                let listener = lock(&shared.markers).remove(&id);
                if let Some(listener) = listener {
                    listener();
                }
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.record(SinkCall::Stop { id: self.id })?;
        self.set_playing(false);
        Ok(())
    }

    fn play_state(&self) -> PlayState {
        if !self.released && lock(&self.shared.playing).get(&self.id).copied().unwrap_or(false) {
            PlayState::Playing
        } else {
            PlayState::Stopped
        }
    }

    fn set_playback_head(&mut self, frame: usize) -> AudioResult<()> {
        self.record(SinkCall::Head { id: self.id, frame })
    }

    fn set_volume(&mut self, volume: f32) -> AudioResult<()> {
        self.record(SinkCall::Volume { id: self.id, volume })
    }

    fn set_marker(&mut self, frame: usize, listener: MarkerListener) -> AudioResult<()> {
        self.record(SinkCall::Marker { id: self.id, frame })?;
        lock(&self.shared.markers).insert(self.id, listener);
        Ok(())
    }

    fn clear_marker(&mut self) {
        lock(&self.shared.markers).remove(&self.id);
    }

    fn release(&mut self) -> AudioResult<()> {
        self.record(SinkCall::Release { id: self.id })?;
        self.set_playing(false);
        lock(&self.shared.markers).remove(&self.id);
        self.released = true;
        if self.fail_release.load(Ordering::SeqCst) {
            // Native side already gone
            return Err(AudioError::Released);
        }
        Ok(())
    }
}
