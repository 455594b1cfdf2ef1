//! Bounded cache of prepared output sinks
//!
//! Each entry owns one [`OutputSink`] written with a clip's full PCM payload,
//! keyed by (clip name, tempo). Entries are evicted when the cache grows past
//! its capacity (least recently used first) or when they sit unused longer
//! than the expiry time ([`AudioCache::sweep`], driven by [`Sweeper`]).
//!
//! # Locking
//!
//! Two granularities, always taken in this order:
//!
//! 1. the key → entry map (insert, evict, lookup, iteration)
//! 2. one handle's sink (stop / rewind / configure / play / release)
//!
//! Native calls on a handle are never made while the map lock is held;
//! evicted handles are removed from the map first and released afterwards.

mod sweeper;

pub use sweeper::Sweeper;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::audio::{AudioError, AudioResult, OutputDevice, OutputSink, PlayState, SinkSpec};
use crate::types::{CacheKey, BYTES_PER_SAMPLE, CHANNELS};

/// Default capacity of the cache
pub const MAX_CACHE_SIZE: usize = 5;

/// Default idle time after which an entry may be swept
pub const CACHE_EXPIRE_TIME: Duration = Duration::from_secs(60);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// PCM payload produced for a new cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedPcm {
    pub samples: Vec<i16>,
    /// Header bytes stripped from the source file
    pub header_size: usize,
}

struct SinkSlot {
    sink: Box<dyn OutputSink>,
    released: bool,
}

/// One prepared sink, shared between the cache and in-flight play requests
pub struct PlaybackHandle {
    key: CacheKey,
    frame_count: usize,
    slot: Mutex<SinkSlot>,
}

impl PlaybackHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Frames of PCM written to the sink
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Run `f` with exclusive access to the sink
    ///
    /// Fails with [`AudioError::Released`] once the handle was evicted.
    pub fn with_sink<R>(
        &self,
        f: impl FnOnce(&mut dyn OutputSink) -> AudioResult<R>,
    ) -> AudioResult<R> {
        let mut slot = lock(&self.slot);
        if slot.released {
            return Err(AudioError::Released);
        }
        f(slot.sink.as_mut())
    }

    pub fn play_state(&self) -> PlayState {
        let slot = lock(&self.slot);
        if slot.released {
            PlayState::Stopped
        } else {
            slot.sink.play_state()
        }
    }

    pub fn is_released(&self) -> bool {
        lock(&self.slot).released
    }

    /// Stop playback if active and drop any pending completion marker
    pub fn stop(&self) -> AudioResult<()> {
        self.with_sink(|sink| {
            sink.clear_marker();
            if sink.play_state() == PlayState::Playing {
                sink.stop()?;
            }
            Ok(())
        })
    }

    /// Stop if playing, then free the native sink
    fn release(&self) -> AudioResult<()> {
        let mut slot = lock(&self.slot);
        if slot.released {
            return Ok(());
        }
        slot.sink.clear_marker();
        if slot.sink.play_state() == PlayState::Playing {
            if let Err(e) = slot.sink.stop() {
                log::warn!("[AUDIO_CACHE] Failed to stop {} before release: {}", self.key, e);
            }
        }
        // A failed release still leaves the handle unusable
        slot.released = true;
        slot.sink.release()
    }
}

struct CacheEntry {
    handle: Arc<PlaybackHandle>,
    last_used: Instant,
    /// Recency order; higher is more recent
    sequence: u64,
}

/// Bounded LRU + TTL cache of prepared output sinks
pub struct AudioCache {
    device: Arc<dyn OutputDevice>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    sequence: AtomicU64,
    sample_rate: u32,
    capacity: usize,
    expire_after: Duration,
}

impl AudioCache {
    pub fn new(
        device: Arc<dyn OutputDevice>,
        sample_rate: u32,
        capacity: usize,
        expire_after: Duration,
    ) -> Self {
        Self {
            device,
            entries: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            sample_rate,
            capacity: capacity.max(1),
            expire_after,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Existing handle for `key`, or a new one built from `producer`'s PCM
    ///
    /// Either way the entry becomes the most recently used. `producer` runs
    /// without the map lock held; if a concurrent call inserted the same key
    /// meanwhile, the newer sink is discarded and the cached one returned.
    /// On failure nothing is inserted.
    pub fn get_or_create(
        &self,
        key: &CacheKey,
        producer: impl FnOnce() -> PreparedPcm,
    ) -> AudioResult<Arc<PlaybackHandle>> {
        if let Some(handle) = self.touch(key) {
            log::trace!("[AUDIO_CACHE] Hit for {}", key);
            return Ok(handle);
        }

        let prepared = producer();
        let handle = Arc::new(self.create_handle(key, &prepared)?);

        let evicted = {
            let mut entries = lock(&self.entries);
            if let Some(existing) = entries.get_mut(key) {
                existing.last_used = Instant::now();
                existing.sequence = self.next_sequence();
                let existing = existing.handle.clone();
                drop(entries);
                log::debug!("[AUDIO_CACHE] Lost creation race for {}, discarding duplicate", key);
                Self::release_logged(&handle, "duplicate");
                return Ok(existing);
            }

            entries.insert(
                key.clone(),
                CacheEntry {
                    handle: handle.clone(),
                    last_used: Instant::now(),
                    sequence: self.next_sequence(),
                },
            );
            self.take_over_capacity(&mut entries)
        };

        for old in &evicted {
            Self::release_logged(old, "capacity");
        }
        Ok(handle)
    }

    fn touch(&self, key: &CacheKey) -> Option<Arc<PlaybackHandle>> {
        let mut entries = lock(&self.entries);
        let entry = entries.get_mut(key)?;
        // Concurrent touches: last writer wins
        entry.last_used = Instant::now();
        entry.sequence = self.next_sequence();
        Some(entry.handle.clone())
    }

    fn create_handle(&self, key: &CacheKey, prepared: &PreparedPcm) -> AudioResult<PlaybackHandle> {
        let pcm_bytes = prepared.samples.len() * BYTES_PER_SAMPLE;
        let min_bytes = self.device.min_buffer_bytes(self.sample_rate, CHANNELS);
        let spec = SinkSpec {
            sample_rate: self.sample_rate,
            channels: CHANNELS,
            buffer_bytes: pcm_bytes.max(min_bytes),
        };

        let mut sink = self.device.create_sink(&spec)?;
        if let Err(e) = sink.write(&prepared.samples) {
            let _ = sink.release();
            return Err(e);
        }

        let frame_count = pcm_bytes / (BYTES_PER_SAMPLE * CHANNELS as usize);
        log::debug!(
            "[AUDIO_CACHE] Created sink for {}: {} frames, {}-byte header, {}-byte buffer",
            key,
            frame_count,
            prepared.header_size,
            spec.buffer_bytes
        );

        Ok(PlaybackHandle {
            key: key.clone(),
            frame_count,
            slot: Mutex::new(SinkSlot {
                sink,
                released: false,
            }),
        })
    }

    /// Remove the least recently used entries beyond capacity
    fn take_over_capacity(
        &self,
        entries: &mut HashMap<CacheKey, CacheEntry>,
    ) -> Vec<Arc<PlaybackHandle>> {
        if entries.len() <= self.capacity {
            return Vec::new();
        }

        let mut by_age: Vec<(u64, CacheKey)> = entries
            .iter()
            .map(|(key, entry)| (entry.sequence, key.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(sequence, _)| *sequence);

        let excess = entries.len() - self.capacity;
        by_age
            .into_iter()
            .take(excess)
            .filter_map(|(_, key)| entries.remove(&key))
            .map(|entry| entry.handle)
            .collect()
    }

    fn release_logged(handle: &PlaybackHandle, reason: &str) {
        match handle.release() {
            Ok(()) => log::debug!("[AUDIO_CACHE] Evicted {} ({})", handle.key(), reason),
            Err(e) => log::warn!(
                "[AUDIO_CACHE] Failed to release {} ({}): {}",
                handle.key(),
                reason,
                e
            ),
        }
    }

    /// Evict every entry idle for longer than the expiry time as of `now`
    ///
    /// Returns the number of entries removed. Entries leave the map before
    /// they are stopped and released, so a lookup never returns a handle
    /// that is mid-release; a failed release still counts as removed.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let expired: Vec<Arc<PlaybackHandle>> = {
            let mut entries = lock(&self.entries);
            let keys: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, entry)| {
                    now.saturating_duration_since(entry.last_used) > self.expire_after
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| entries.remove(key))
                .map(|entry| entry.handle)
                .collect()
        };

        for handle in &expired {
            Self::release_logged(handle, "expired");
        }
        expired.len()
    }

    /// Evict entries that have expired by now
    pub fn sweep(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    /// Stop every tempo variant of `name`; entries stay cached
    pub fn stop_by_name(&self, name: &str) -> usize {
        let handles: Vec<Arc<PlaybackHandle>> = lock(&self.entries)
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, entry)| entry.handle.clone())
            .collect();
        Self::stop_handles(&handles)
    }

    /// Stop every cached handle; entries stay cached
    pub fn stop_all(&self) -> usize {
        let handles: Vec<Arc<PlaybackHandle>> = lock(&self.entries)
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        Self::stop_handles(&handles)
    }

    fn stop_handles(handles: &[Arc<PlaybackHandle>]) -> usize {
        let mut stopped = 0;
        for handle in handles {
            match handle.stop() {
                Ok(()) => stopped += 1,
                // Evicted between the snapshot and now
                Err(AudioError::Released) => {}
                Err(e) => log::warn!("[AUDIO_CACHE] Failed to stop {}: {}", handle.key(), e),
            }
        }
        stopped
    }

    /// Whether any tempo variant of `name` is playing
    pub fn is_playing(&self, name: &str) -> bool {
        let handles: Vec<Arc<PlaybackHandle>> = lock(&self.entries)
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, entry)| entry.handle.clone())
            .collect();
        handles
            .iter()
            .any(|handle| handle.play_state() == PlayState::Playing)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        lock(&self.entries).contains_key(key)
    }

    /// Cached keys, most recently used first
    pub fn keys(&self) -> Vec<CacheKey> {
        let entries = lock(&self.entries);
        let mut keys: Vec<(u64, CacheKey)> = entries
            .iter()
            .map(|(key, entry)| (entry.sequence, key.clone()))
            .collect();
        keys.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        keys.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{MockDevice, SinkCall};
    use crate::types::{Pitch, Tempo, SAMPLE_RATE};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn cache_with(device: &MockDevice) -> AudioCache {
        AudioCache::new(
            Arc::new(device.clone()),
            SAMPLE_RATE,
            MAX_CACHE_SIZE,
            CACHE_EXPIRE_TIME,
        )
    }

    fn pcm(frames: usize) -> PreparedPcm {
        PreparedPcm {
            samples: vec![100; frames],
            header_size: 44,
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let device = MockDevice::new();
        let cache = cache_with(&device);
        let key = CacheKey::identity("chime");
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_create(&key, || {
                calls.fetch_add(1, Ordering::SeqCst);
                pcm(800)
            })
            .unwrap();
        let second = cache
            .get_or_create(&key, || {
                calls.fetch_add(1, Ordering::SeqCst);
                pcm(800)
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.frame_count(), 800);
        assert_eq!(device.creates().len(), 1);
        assert_eq!(device.creates()[0].buffer_bytes, 1600);
    }

    #[test]
    fn test_buffer_respects_device_minimum() {
        let device = MockDevice::new().with_min_buffer_bytes(4096);
        let cache = cache_with(&device);

        let handle = cache.get_or_create(&CacheKey::identity("tick"), || pcm(10)).unwrap();
        assert_eq!(device.creates()[0].buffer_bytes, 4096);
        assert_eq!(handle.frame_count(), 10);
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let device = MockDevice::new();
        let cache = cache_with(&device);

        for i in 0..8 {
            cache
                .get_or_create(&CacheKey::identity(format!("clip{}", i)), || pcm(16))
                .unwrap();
        }
        // Touch clip3 so it outlives clip4..
        cache
            .get_or_create(&CacheKey::identity("clip3"), || pcm(16))
            .unwrap();
        cache
            .get_or_create(&CacheKey::identity("clip8"), || pcm(16))
            .unwrap();

        let names: Vec<String> = cache.keys().into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["clip8", "clip3", "clip7", "clip6", "clip5"]);
        assert_eq!(cache.len(), MAX_CACHE_SIZE);
        assert_eq!(device.releases(), 4);
    }

    #[test]
    fn test_tempo_and_pitch_variants_are_distinct() {
        let device = MockDevice::new();
        let cache = cache_with(&device);

        cache.get_or_create(&CacheKey::identity("chime"), || pcm(100)).unwrap();
        cache
            .get_or_create(&CacheKey::new("chime", Tempo::from_ratio(1.15)), || pcm(87))
            .unwrap();

        let lowered = CacheKey::new("chime", Tempo::from_ratio(1.15))
            .with_pitch(Pitch::from_semitones(-3.0));
        cache.get_or_create(&lowered, || pcm(87)).unwrap();

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&CacheKey::new("chime", Tempo::from_ratio(1.15))));
        assert!(cache.contains(&lowered));
        assert_eq!(device.creates().len(), 3);
    }

    #[test]
    fn test_sweep_removes_then_stops_and_releases_expired() {
        let device = MockDevice::new();
        let cache = cache_with(&device);
        let handle = cache.get_or_create(&CacheKey::identity("chime"), || pcm(16)).unwrap();
        handle.with_sink(|sink| sink.play()).unwrap();

        assert_eq!(cache.evict_expired_at(Instant::now()), 0);
        assert_eq!(cache.len(), 1);

        let later = Instant::now() + CACHE_EXPIRE_TIME + Duration::from_secs(1);
        assert_eq!(cache.evict_expired_at(later), 1);
        assert!(cache.is_empty());
        assert!(handle.is_released());

        // stopped before released
        let calls = device.calls();
        let stop = calls.iter().position(|c| matches!(c, SinkCall::Stop { .. }));
        let release = calls.iter().position(|c| matches!(c, SinkCall::Release { .. }));
        assert!(stop.unwrap() < release.unwrap());
    }

    #[test]
    fn test_failed_release_still_evicts() {
        let device = MockDevice::new();
        device.fail_releases(true);
        let cache = cache_with(&device);
        let handle = cache.get_or_create(&CacheKey::identity("chime"), || pcm(16)).unwrap();

        let later = Instant::now() + CACHE_EXPIRE_TIME + Duration::from_secs(1);
        assert_eq!(cache.evict_expired_at(later), 1);
        assert!(cache.is_empty());
        assert!(handle.is_released());
        assert_eq!(device.releases(), 1);

        // The key can be prepared again with a fresh sink
        device.fail_releases(false);
        let fresh = cache.get_or_create(&CacheKey::identity("chime"), || pcm(16)).unwrap();
        assert!(!Arc::ptr_eq(&handle, &fresh));
        assert_eq!(device.creates().len(), 2);
    }

    #[test]
    fn test_creation_failure_leaves_no_entry() {
        let device = MockDevice::new();
        device.fail_creates(true);
        let cache = cache_with(&device);

        assert!(cache.get_or_create(&CacheKey::identity("chime"), || pcm(16)).is_err());
        assert!(cache.is_empty());

        device.fail_creates(false);
        assert!(cache.get_or_create(&CacheKey::identity("chime"), || pcm(16)).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stop_by_name_covers_all_tempos() {
        let device = MockDevice::new();
        let cache = cache_with(&device);
        let plain = cache.get_or_create(&CacheKey::identity("chime"), || pcm(16)).unwrap();
        let fast = cache
            .get_or_create(&CacheKey::new("chime", Tempo::from_ratio(1.5)), || pcm(16))
            .unwrap();
        let other = cache.get_or_create(&CacheKey::identity("bell"), || pcm(16)).unwrap();
        for handle in [&plain, &fast, &other] {
            handle.with_sink(|sink| sink.play()).unwrap();
        }

        assert_eq!(cache.stop_by_name("chime"), 2);
        assert_eq!(plain.play_state(), PlayState::Stopped);
        assert_eq!(fast.play_state(), PlayState::Stopped);
        assert_eq!(other.play_state(), PlayState::Playing);

        cache.stop_all();
        assert_eq!(other.play_state(), PlayState::Stopped);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_play_never_succeeds_on_released_handle() {
        let device = MockDevice::new();
        let cache = Arc::new(cache_with(&device));
        let key = CacheKey::identity("chime");
        let handle = cache.get_or_create(&key, || pcm(16)).unwrap();

        let player = {
            let handle = handle.clone();
            thread::spawn(move || {
                (0..200)
                    .map(|_| {
                        handle.with_sink(|sink| {
                            sink.set_playback_head(0)?;
                            sink.play()
                        })
                    })
                    .collect::<Vec<_>>()
            })
        };
        let stopper = {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    cache.stop_by_name("chime");
                }
                cache.evict_expired_at(Instant::now() + Duration::from_secs(3600))
            })
        };

        let results = player.join().unwrap();
        assert_eq!(stopper.join().unwrap(), 1);
        assert!(handle.is_released());

        // Once a play failed with Released, no later play succeeded
        if let Some(first_released) = results
            .iter()
            .position(|r| matches!(r, Err(AudioError::Released)))
        {
            assert!(results[first_released..].iter().all(|r| r.is_err()));
        }
        let calls = device.calls();
        let release = calls
            .iter()
            .position(|c| matches!(c, SinkCall::Release { .. }))
            .unwrap();
        assert!(!calls[release..].iter().any(|c| matches!(c, SinkCall::Play { .. })));
    }
}
