//! Playback coordinator
//!
//! The public face of the engine. It preloads raw clip bytes from a
//! [`ByteSource`], turns play requests into cached output sinks (stretching
//! the clip first when a tempo or pitch shift is given) and reports
//! completion through a one-shot marker at the end of the clip.
//!
//! # Threads
//!
//! - a small rayon pool runs preload and fire-and-forget play requests
//! - a [`Sweeper`] thread evicts idle sinks
//! - completion callbacks run on whatever thread the output backend uses
//!   to deliver markers
//!
//! Fire-and-forget operations ([`play`](PlaybackCoordinator::play),
//! [`stop`](PlaybackCoordinator::stop)) log failures and never return them;
//! the `*_blocking` and awaitable forms return [`PlaybackResult`].

mod error;
mod request;

pub use error::{PlaybackError, PlaybackResult};
pub use request::{PlayRequest, StartListener};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crossbeam::channel;
use tokio::sync::oneshot;

use crate::audio::{OutputDevice, PlayState};
use crate::cache::{AudioCache, PreparedPcm, Sweeper};
use crate::config::EngineConfig;
use crate::source::ByteSource;
use crate::timestretch::{decode_pcm16, signalsmith_factory, stretch_wav};
use crate::types::{clip_filename, is_clip_filename, CacheKey};
use crate::wav;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    config: EngineConfig,
    cache: Arc<AudioCache>,
    /// Raw WAV bytes by filename, never evicted
    clips: RwLock<HashMap<String, Arc<[u8]>>>,
    source: Mutex<Option<Arc<dyn ByteSource>>>,
    initialized: AtomicBool,
    retries_left: AtomicU32,
    sweeper: Mutex<Option<Sweeper>>,
    pool: rayon::ThreadPool,
}

/// Clip playback engine
///
/// Cheap to clone; clones share the same caches and background threads,
/// which stop when the last clone is dropped.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    pub fn new(config: EngineConfig, device: Arc<dyn OutputDevice>) -> PlaybackResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("clipdeck-worker-{}", i))
            .build()
            .map_err(|e| PlaybackError::PoolUnavailable(e.to_string()))?;

        let cache = Arc::new(AudioCache::new(
            device,
            config.sample_rate,
            config.max_cache_entries,
            config.cache_expire_time(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                retries_left: AtomicU32::new(config.preload_retries),
                config,
                cache,
                clips: RwLock::new(HashMap::new()),
                source: Mutex::new(None),
                initialized: AtomicBool::new(false),
                sweeper: Mutex::new(None),
                pool,
            }),
        })
    }

    /// Attach a byte source, preload its clips in the background and start
    /// the idle sweep
    ///
    /// Only the first call has any effect.
    pub fn initialize(&self, source: Arc<dyn ByteSource>) {
        if !self.begin_initialize(source) {
            return;
        }
        let inner = self.inner.clone();
        self.inner.pool.spawn(move || {
            inner.preload();
        });
    }

    /// Like [`initialize`](Self::initialize) but preloads on the calling
    /// thread, returning the number of clips loaded (0 if already initialized)
    pub fn initialize_blocking(&self, source: Arc<dyn ByteSource>) -> usize {
        if !self.begin_initialize(source) {
            return 0;
        }
        self.inner.preload()
    }

    fn begin_initialize(&self, source: Arc<dyn ByteSource>) -> bool {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            log::debug!("[PLAYBACK] Already initialized");
            return false;
        }
        *lock(&self.inner.source) = Some(source);
        self.inner.start_sweeper();
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Play a clip in the background; failures are only logged
    pub fn play(&self, request: PlayRequest) {
        let inner = self.inner.clone();
        self.inner.pool.spawn(move || {
            let _ = inner.play(request);
        });
    }

    /// Play a clip on the calling thread
    ///
    /// Returns once playback has started, not when it finishes.
    pub fn play_blocking(&self, request: PlayRequest) -> PlaybackResult<()> {
        self.inner.play(request)
    }

    /// Play a clip and wait until it reaches its end
    ///
    /// Resolves to [`PlaybackError::Interrupted`] if playback is stopped,
    /// evicted or restarted before the end. Dropping the future only detaches
    /// the waiter: the clip keeps playing.
    pub async fn play_and_wait(&self, name: &str, volume: Option<f32>) -> PlaybackResult<()> {
        let mut request = PlayRequest::new(name);
        if let Some(volume) = volume {
            request = request.volume(volume);
        }
        self.play_request_and_wait(request).await
    }

    /// [`play_and_wait`](Self::play_and_wait) for a full request
    ///
    /// The request's own completion callback, if any, runs before the
    /// future resolves.
    pub async fn play_request_and_wait(&self, request: PlayRequest) -> PlaybackResult<()> {
        if request.name.is_empty() {
            self.stop_all();
            return Ok(());
        }

        let name = request.name.clone();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<PlaybackResult<()>>();
        let request = chain_completion(request, move || {
            let _ = done_tx.send(());
        });

        let inner = self.inner.clone();
        self.inner.pool.spawn(move || {
            let _ = started_tx.send(inner.play(request));
        });

        started_rx
            .await
            .map_err(|_| PlaybackError::PoolUnavailable("play request was dropped".into()))??;
        done_rx.await.map_err(|_| PlaybackError::Interrupted(name))
    }

    /// Blocking form of [`play_and_wait`](Self::play_and_wait); plays on the
    /// calling thread
    pub fn play_and_wait_blocking(&self, name: &str, volume: Option<f32>) -> PlaybackResult<()> {
        if name.is_empty() {
            self.stop_all();
            return Ok(());
        }

        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let mut request = PlayRequest::new(name).on_completed(move || {
            let _ = done_tx.send(());
        });
        if let Some(volume) = volume {
            request = request.volume(volume);
        }

        self.inner.play(request)?;
        done_rx
            .recv()
            .map_err(|_| PlaybackError::Interrupted(name.to_string()))
    }

    /// Stop every tempo variant of a clip
    pub fn stop(&self, name: &str) {
        let stopped = self.inner.cache.stop_by_name(name);
        log::debug!("[PLAYBACK] Stopped {} ({} sinks)", name, stopped);
    }

    /// Stop every clip
    pub fn stop_all(&self) {
        let stopped = self.inner.cache.stop_all();
        log::debug!("[PLAYBACK] Stopped all ({} sinks)", stopped);
    }

    /// Names of the clips loaded from the source, sorted
    pub fn loaded_clips(&self) -> Vec<String> {
        let clips = self
            .inner
            .clips
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = clips
            .keys()
            .map(|filename| {
                filename
                    .rsplit_once('.')
                    .map(|(stem, _)| stem)
                    .unwrap_or(filename)
                    .to_string()
            })
            .collect();
        names.sort();
        names
    }

    /// Keys of the prepared sinks, most recently used first
    pub fn cached_entries(&self) -> Vec<CacheKey> {
        self.inner.cache.keys()
    }

    /// Whether any prepared sink of `name` is currently playing
    pub fn is_playing(&self, name: &str) -> bool {
        self.inner.cache.is_playing(name)
    }
}

/// Run `then` after the request's own completion callback
fn chain_completion(mut request: PlayRequest, then: impl FnOnce() + Send + 'static) -> PlayRequest {
    let first = request.on_completed.take();
    request.on_completed = Some(Box::new(move || {
        if let Some(first) = first {
            first();
        }
        then();
    }));
    request
}

impl Inner {
    fn start_sweeper(&self) {
        let mut slot = lock(&self.sweeper);
        if let Some(previous) = slot.take() {
            previous.stop();
        }
        match Sweeper::start(self.cache.clone(), self.config.sweep_interval()) {
            Ok(sweeper) => *slot = Some(sweeper),
            Err(e) => log::error!("[PLAYBACK] Failed to start sweep thread: {}", e),
        }
    }

    /// Load every clip the source lists, returning how many were loaded
    fn preload(&self) -> usize {
        let Some(source) = lock(&self.source).clone() else {
            log::warn!("[PLAYBACK] Preload requested before initialize");
            return 0;
        };
        let namespace = &self.config.namespace;

        let filenames = match source.list(namespace) {
            Ok(names) => names,
            Err(e) => {
                log::warn!("[PLAYBACK] Failed to list clips in {:?}: {}", namespace, e);
                Vec::new()
            }
        };

        let mut loaded: HashMap<String, Arc<[u8]>> = HashMap::new();
        for filename in filenames.into_iter().filter(|f| is_clip_filename(f)) {
            match source.open(namespace, &filename) {
                Ok(bytes) => {
                    loaded.insert(filename, bytes.into());
                }
                Err(e) => log::warn!("[PLAYBACK] Skipping {}: {}", filename, e),
            }
        }

        let count = loaded.len();
        let mut clips = self.clips.write().unwrap_or_else(PoisonError::into_inner);
        clips.extend(loaded);
        log::info!(
            "[PLAYBACK] Preloaded {} clips from {:?} ({} total)",
            count,
            namespace,
            clips.len()
        );
        count
    }

    fn raw_clip(&self, filename: &str) -> Option<Arc<[u8]>> {
        self.clips
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .cloned()
    }

    fn has_clips(&self) -> bool {
        !self
            .clips
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Reload once more if nothing was loaded and a retry is left
    fn retry_preload(&self) -> bool {
        if self.has_clips() {
            return false;
        }
        let consumed = self
            .retries_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(before) => {
                log::info!(
                    "[PLAYBACK] No clips loaded, retrying preload ({} retries left)",
                    before - 1
                );
                self.preload();
                true
            }
            Err(_) => false,
        }
    }

    fn play(&self, request: PlayRequest) -> PlaybackResult<()> {
        let PlayRequest {
            name,
            volume,
            tempo,
            pitch,
            on_started,
            on_completed,
        } = request;

        if name.is_empty() {
            let stopped = self.cache.stop_all();
            log::debug!("[PLAYBACK] Empty clip name, stopped {} sinks", stopped);
            return Ok(());
        }

        let filename = clip_filename(&name);
        let raw = match self.raw_clip(&filename) {
            Some(raw) => Some(raw),
            None if self.retry_preload() => self.raw_clip(&filename),
            None => None,
        };
        let Some(raw) = raw else {
            log::warn!("[PLAYBACK] Clip not found: {}", filename);
            return Err(PlaybackError::NotFound(name));
        };

        let key = CacheKey::new(name, tempo).with_pitch(pitch);
        let handle = self
            .cache
            .get_or_create(&key, || self.prepare_pcm(&key, &raw))
            .map_err(|e| {
                log::warn!("[PLAYBACK] Failed to prepare {}: {}", key, e);
                PlaybackError::audio(key.to_string(), e)
            })?;

        let frame_count = handle.frame_count();
        handle
            .with_sink(|sink| {
                if sink.play_state() == PlayState::Playing {
                    sink.stop()?;
                }
                match on_completed {
                    Some(listener) => sink.set_marker(frame_count, listener)?,
                    None => sink.clear_marker(),
                }
                sink.set_playback_head(0)?;
                if let Some(volume) = volume {
                    // max/min rather than clamp: NaN becomes 0.0
                    sink.set_volume(volume.max(0.0).min(1.0))?;
                }
                if let Some(started) = on_started {
                    started();
                }
                sink.play()
            })
            .map_err(|e| {
                log::warn!("[PLAYBACK] Failed to play {}: {}", key, e);
                PlaybackError::audio(key.to_string(), e)
            })?;

        log::debug!("[PLAYBACK] Playing {} ({} frames)", key, frame_count);
        Ok(())
    }

    /// PCM payload for a new cache entry, stretched when the key asks for it
    fn prepare_pcm(&self, key: &CacheKey, raw: &[u8]) -> PreparedPcm {
        let fallback = self.config.default_header_size;
        let stretched;
        let bytes: &[u8] = if key.is_unprocessed() {
            raw
        } else {
            stretched = stretch_wav(
                raw,
                key.tempo,
                key.pitch,
                self.config.stretch_chunk_size,
                fallback,
                &signalsmith_factory,
            );
            &stretched
        };

        let header_size = wav::header_size_or(bytes, fallback, &key.to_string()).min(bytes.len());
        PreparedPcm {
            samples: decode_pcm16(&bytes[header_size..]),
            header_size,
        }
    }
}
