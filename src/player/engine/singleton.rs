//! Process-wide native engine.
//!
//! At most one native engine exists per process. Construction and one-time
//! initialization happen under a mutex with a re-check after the lock is taken;
//! every later call is a lock-free read of the cached handle.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::{EndReason, EngineEvent, EngineProperties, NativeEngine};
use crate::config::PlaybackConfig;
use crate::player::error::{PlayerError, PlayerResult};
use crate::player::surface::{self, InitOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineInitState {
    Uninitialized,
    Initializing,
    Initialized,
}

impl EngineInitState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => EngineInitState::Initializing,
            2 => EngineInitState::Initialized,
            _ => EngineInitState::Uninitialized,
        }
    }
}

/// Per-video readiness. Only `Ready` guarantees duration and track queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessState {
    pub generation: u64,
    pub readiness: Readiness,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSession {
    pub locator: Option<String>,
    pub resume_offset: Duration,
    /// Bumped on every swap and reset
    pub generation: u64,
}

struct SessionState {
    session: PlaybackSession,
    readiness: Readiness,
    /// Loads issued whose start-file event has not arrived yet. While non-zero,
    /// file-loaded events belong to an older, replaced file.
    pending_starts: u32,
    /// Playlist entry of the latest load. Its start-file settles every older
    /// load too, since the engine may never start a load replaced before it ran.
    newest_entry: Option<i64>,
}

type ErrorCallback = Arc<dyn Fn(PlayerError) + Send + Sync>;
type FrameCallback = Arc<dyn Fn() + Send + Sync>;

pub struct EngineHandle {
    engine: Arc<dyn NativeEngine>,
    state: Mutex<SessionState>,
    readiness_tx: watch::Sender<ReadinessState>,
    destroyed: AtomicBool,
    error_callback: Mutex<Option<ErrorCallback>>,
    frame_callback: Mutex<Option<FrameCallback>>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("readiness", &*self.readiness_tx.borrow())
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish()
    }
}

impl EngineHandle {
    /// Apply init-time options, initialize the engine, and start observing
    /// its events.
    pub fn create<F>(engine: Arc<dyn NativeEngine>, configure: F) -> PlayerResult<Arc<Self>>
    where
        F: FnOnce(&EngineProperties<'_>) -> PlayerResult<()>,
    {
        configure(&EngineProperties::new(engine.as_ref()))?;
        engine.initialize()?;

        let (readiness_tx, _) = watch::channel(ReadinessState {
            generation: 0,
            readiness: Readiness::NotReady,
        });

        let handle = Arc::new(Self {
            engine,
            state: Mutex::new(SessionState {
                session: PlaybackSession::default(),
                readiness: Readiness::NotReady,
                pending_starts: 0,
                newest_entry: None,
            }),
            readiness_tx,
            destroyed: AtomicBool::new(false),
            error_callback: Mutex::new(None),
            frame_callback: Mutex::new(None),
        });

        let weak: Weak<EngineHandle> = Arc::downgrade(&handle);
        handle.engine.set_event_handler(Arc::new(move |event| {
            if let Some(handle) = weak.upgrade() {
                handle.on_engine_event(event);
            }
        }));

        info!("Native engine initialized");
        Ok(handle)
    }

    pub fn properties(&self) -> PlayerResult<EngineProperties<'_>> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(PlayerError::EngineUnavailable(
                "engine instance destroyed".to_string(),
            ));
        }
        Ok(EngineProperties::new(self.engine.as_ref()))
    }

    pub(crate) fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Swap to a new video with an in-place replace load.
    ///
    /// Returns the generation of the new session. Readiness drops to
    /// `NotReady` and any waiter on the previous video is cancelled.
    pub fn load_new_video(&self, locator: &str, resume_offset: Duration) -> PlayerResult<u64> {
        let props = self.properties()?;

        // Held across the load so the start-file event of this load cannot
        // be handled before its playlist entry id is known
        let mut state = self.state.lock();
        state.session.generation += 1;
        state.session.locator = Some(locator.to_string());
        state.session.resume_offset = resume_offset;
        state.pending_starts += 1;
        state.newest_entry = None;
        state.readiness = Readiness::NotReady;
        self.publish(&state);
        let generation = state.session.generation;

        info!(
            "Loading video (generation {}, resume at {:?}): {}",
            generation, resume_offset, locator
        );

        if let Err(e) = props.load_replace(locator, resume_offset) {
            error!("Failed to issue replace load: {}", e);
            state.pending_starts = state.pending_starts.saturating_sub(1);
            return Err(e);
        }
        state.newest_entry = props.playlist_entry_id();
        trace!("Load queued as playlist entry {:?}", state.newest_entry);

        Ok(generation)
    }

    /// Generation of the current swap
    pub fn generation(&self) -> u64 {
        self.state.lock().session.generation
    }

    pub fn session(&self) -> PlaybackSession {
        self.state.lock().session.clone()
    }

    pub fn readiness(&self) -> Readiness {
        self.state.lock().readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Watch readiness changes (UI readiness signal)
    pub fn subscribe_readiness(&self) -> watch::Receiver<ReadinessState> {
        self.readiness_tx.subscribe()
    }

    /// Wait until the current video is ready
    pub async fn wait_until_ready(&self, timeout: Duration) -> PlayerResult<()> {
        let generation = self.readiness_tx.borrow().generation;
        self.wait_for_generation(generation, timeout).await
    }

    /// Wait until the given swap is ready. Fails with `Superseded` as soon as a
    /// newer swap or a reset replaces it.
    pub async fn wait_for_generation(&self, generation: u64, timeout: Duration) -> PlayerResult<()> {
        let mut rx = self.readiness_tx.subscribe();

        let wait = async {
            loop {
                {
                    let state = *rx.borrow_and_update();
                    if state.generation != generation {
                        return Err(PlayerError::Superseded);
                    }
                    if state.readiness == Readiness::Ready {
                        return Ok(());
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(PlayerError::EngineUnavailable(
                        "engine handle dropped".to_string(),
                    ));
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PlayerError::Timeout(format!("file-loaded (generation {})", generation)))?
    }

    /// Playback position; `None` until the current video is ready
    pub fn position(&self) -> Option<Duration> {
        if !self.is_ready() {
            return None;
        }
        self.properties().ok()?.time_pos()
    }

    /// Media duration; `None` until the current video is ready
    pub fn duration(&self) -> Option<Duration> {
        if !self.is_ready() {
            return None;
        }
        self.properties().ok()?.duration()
    }

    /// Clear the playback session. Idempotent; the engine itself stays alive.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.session.locator = None;
        state.session.resume_offset = Duration::ZERO;
        state.session.generation += 1;
        state.pending_starts = 0;
        state.newest_entry = None;
        state.readiness = Readiness::NotReady;
        self.publish(&state);
        debug!("Playback session reset (generation {})", state.session.generation);
    }

    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: Fn(PlayerError) + Send + Sync + 'static,
    {
        *self.error_callback.lock() = Some(Arc::new(callback));
    }

    /// Called from engine threads whenever a new decoded frame is available
    pub fn set_frame_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.frame_callback.lock() = Some(Arc::new(callback));
    }

    /// Terminate the native instance. The surface must already be detached.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Destroying native engine instance");
        self.engine.destroy();
        let mut state = self.state.lock();
        state.session.generation += 1;
        state.readiness = Readiness::NotReady;
        self.publish(&state);
    }

    fn publish(&self, state: &SessionState) {
        self.readiness_tx.send_replace(ReadinessState {
            generation: state.session.generation,
            readiness: state.readiness,
        });
    }

    fn on_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::StartFile(entry) => {
                let mut state = self.state.lock();
                if entry.is_some() && entry == state.newest_entry {
                    state.pending_starts = 0;
                } else {
                    state.pending_starts = state.pending_starts.saturating_sub(1);
                }
                if state.pending_starts == 0 {
                    state.readiness = Readiness::Loading;
                    self.publish(&state);
                }
            }
            EngineEvent::FileLoaded => {
                let mut state = self.state.lock();
                if state.pending_starts == 0 && state.readiness == Readiness::Loading {
                    state.readiness = Readiness::Ready;
                    self.publish(&state);
                    info!("Video ready (generation {})", state.session.generation);
                } else {
                    debug!("Ignoring file-loaded for a replaced video");
                }
            }
            EngineEvent::EndFile(reason) => {
                {
                    let mut state = self.state.lock();
                    if state.pending_starts == 0 && state.readiness == Readiness::Loading {
                        state.readiness = Readiness::NotReady;
                        self.publish(&state);
                    }
                }
                if let EndReason::Error(message) = reason {
                    error!("Playback ended with error: {}", message);
                    let callback = self.error_callback.lock().clone();
                    if let Some(callback) = callback {
                        callback(PlayerError::Engine(message));
                    }
                }
            }
            EngineEvent::FrameAvailable => {
                let callback = self.frame_callback.lock().clone();
                if let Some(callback) = callback {
                    callback();
                }
            }
            EngineEvent::VideoReconfig => debug!("Engine video reconfigured"),
            EngineEvent::Shutdown => {
                warn!("Native engine shut down");
                self.destroyed.store(true, Ordering::Release);
            }
        }
    }
}

/// Guarded lazy holder for the engine handle
pub struct EngineCell {
    state: AtomicU8,
    init_lock: Mutex<()>,
    handle: OnceCell<Arc<EngineHandle>>,
}

impl Default for EngineCell {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCell {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            init_lock: parking_lot::const_mutex(()),
            handle: OnceCell::new(),
        }
    }

    pub fn state(&self) -> EngineInitState {
        EngineInitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn get(&self) -> Option<Arc<EngineHandle>> {
        self.handle.get().cloned()
    }

    /// Return the cached handle, creating it on first use.
    ///
    /// Any creation failure is reported as `EngineUnavailable`; the cell goes
    /// back to `Uninitialized` so a later call may retry.
    pub fn get_or_create<F>(&self, create: F) -> PlayerResult<Arc<EngineHandle>>
    where
        F: FnOnce() -> PlayerResult<Arc<EngineHandle>>,
    {
        if let Some(handle) = self.handle.get() {
            return Ok(handle.clone());
        }

        let _guard = self.init_lock.lock();
        if let Some(handle) = self.handle.get() {
            return Ok(handle.clone());
        }

        self.state.store(1, Ordering::Release);
        match create() {
            Ok(handle) => {
                let handle = self.handle.get_or_init(|| handle).clone();
                self.state.store(2, Ordering::Release);
                Ok(handle)
            }
            Err(e) => {
                self.state.store(0, Ordering::Release);
                warn!("Native engine unavailable: {}", e);
                Err(match e {
                    PlayerError::EngineUnavailable(_) => e,
                    other => PlayerError::EngineUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Reset the playback session of the cached engine, if any
    pub fn reset(&self) {
        if let Some(handle) = self.handle.get() {
            handle.reset();
        }
    }
}

static ENGINE: EngineCell = EngineCell::new();

/// The process-wide engine holder
pub fn global() -> &'static EngineCell {
    &ENGINE
}

/// Get the process-wide engine, creating and initializing it on first use.
///
/// Fails with `EngineUnavailable` when the native library cannot be loaded;
/// callers should switch to their alternate playback path.
pub fn get_or_create(config: &PlaybackConfig) -> PlayerResult<Arc<EngineHandle>> {
    ENGINE.get_or_create(|| {
        let engine = native_engine(config)?;
        let options = InitOptions::from(config);
        EngineHandle::create(engine, |props| surface::apply_init_options(props, &options))
    })
}

/// Reset the process-wide playback session
pub fn reset() {
    ENGINE.reset();
}

#[cfg(feature = "mpv")]
fn native_engine(config: &PlaybackConfig) -> PlayerResult<Arc<dyn NativeEngine>> {
    let engine = super::mpv::MpvEngine::new(config)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "mpv"))]
fn native_engine(_config: &PlaybackConfig) -> PlayerResult<Arc<dyn NativeEngine>> {
    Err(PlayerError::EngineUnavailable(
        "built without the `mpv` feature".to_string(),
    ))
}
