//! Drawing surface lifecycle.
//!
//! The platform's surface callbacks reach the engine only through
//! [`SurfaceLifecycleManager`], which fixes the order in which the engine's
//! output is configured:
//!
//! 1. init-time options, applied before the engine initializes
//!    ([`apply_init_options`], called by the singleton)
//! 2. high bit-depth pixel format requested in [`SurfaceLifecycleManager::new`]
//! 3. surface attach
//! 4. render backend, color depth and tone mapping re-asserted as live properties

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engine::{EngineHandle, EngineProperties, Property, SurfaceHandle};
use super::error::PlayerResult;
use crate::config::PlaybackConfig;

/// Engine options that must be in place before initialization
#[derive(Debug, Clone, PartialEq)]
pub struct InitOptions {
    pub render_backend: String,
    pub gpu_api: String,
    pub hwdec: String,
    pub target_colorspace_hint: bool,
    pub tone_mapping: String,
    pub surface_bit_depth: u8,
    pub cache_secs: u32,
    pub verbose_logging: bool,
}

impl From<&PlaybackConfig> for InitOptions {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            render_backend: config.render_backend.clone(),
            gpu_api: config.gpu_api.clone(),
            hwdec: config.hwdec.clone(),
            target_colorspace_hint: config.target_colorspace_hint,
            tone_mapping: config.tone_mapping.clone(),
            surface_bit_depth: config.surface_bit_depth,
            cache_secs: config.cache_secs,
            verbose_logging: config.mpv_verbose_logging,
        }
    }
}

impl Default for InitOptions {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

/// Set every init-time option. Must run before the engine initializes.
pub fn apply_init_options(props: &EngineProperties<'_>, options: &InitOptions) -> PlayerResult<()> {
    props.set_option(Property::Vo, options.render_backend.as_str())?;
    props.set_option(Property::GpuApi, options.gpu_api.as_str())?;
    props.set_option(Property::Hwdec, options.hwdec.as_str())?;
    props.set_option(Property::TargetColorspaceHint, options.target_colorspace_hint)?;
    props.set_option(Property::ToneMapping, options.tone_mapping.as_str())?;
    props.set_option(Property::DitherDepth, options.surface_bit_depth as i64)?;
    props.set_option(Property::KeepOpen, "yes")?;
    props.set_option(Property::CacheSecs, options.cache_secs as i64)?;
    props.set_option(Property::SubAuto, "no")?;
    props.set_option(Property::Terminal, options.verbose_logging)?;
    props.set_option(
        Property::MsgLevel,
        if options.verbose_logging { "all=v" } else { "all=warn" },
    )?;
    Ok(())
}

/// Platform side of the surface (window system / view)
pub trait SurfacePlatform: Send + Sync {
    /// Ask for a surface with at least `bits_per_channel` color depth.
    /// Only meaningful before the surface is created.
    fn request_pixel_format(&self, bits_per_channel: u8);
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub locator: String,
    pub resume_offset: Duration,
}

impl PlayRequest {
    pub fn new(locator: impl Into<String>, resume_offset: Duration) -> Self {
        Self {
            locator: locator.into(),
            resume_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Load issued; carries the swap generation
    Started(u64),
    /// No surface yet; the request runs when one is created
    Queued,
}

#[derive(Debug, Default)]
struct SurfaceState {
    bound: Option<SurfaceHandle>,
    geometry: Option<(u32, u32)>,
    pending: Option<PlayRequest>,
    torn_down: bool,
}

pub struct SurfaceLifecycleManager {
    engine: Arc<EngineHandle>,
    options: InitOptions,
    state: Mutex<SurfaceState>,
}

impl SurfaceLifecycleManager {
    pub fn new(engine: Arc<EngineHandle>, options: InitOptions, platform: &dyn SurfacePlatform) -> Self {
        debug!(
            "Requesting {}-bit surface pixel format",
            options.surface_bit_depth
        );
        platform.request_pixel_format(options.surface_bit_depth);

        Self {
            engine,
            options,
            state: Mutex::new(SurfaceState::default()),
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().bound.is_some()
    }

    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.state.lock().geometry
    }

    /// Surface became available. Attaches it, re-asserts the output
    /// properties, and flushes a queued play request.
    ///
    /// Returns the swap generation when a queued request was started.
    pub fn on_surface_created(
        &self,
        surface: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> PlayerResult<Option<u64>> {
        let mut state = self.state.lock();
        let props = self.engine.properties()?;

        if state.bound.is_some() {
            warn!("Surface created while another is bound, detaching the old one");
            self.engine.engine().detach_surface()?;
            state.bound = None;
        }

        self.engine.engine().attach_surface(surface)?;
        state.bound = Some(surface);
        info!("Surface attached ({}x{})", width, height);

        props.set(Property::Vo, self.options.render_backend.as_str())?;
        props.set(Property::DitherDepth, self.options.surface_bit_depth as i64)?;
        props.set(Property::ToneMapping, self.options.tone_mapping.as_str())?;
        props.set_output_geometry(width, height)?;
        state.geometry = Some((width, height));

        match state.pending.take() {
            Some(request) => {
                debug!("Flushing queued play request: {}", request.locator);
                let generation = self
                    .engine
                    .load_new_video(&request.locator, request.resume_offset)?;
                Ok(Some(generation))
            }
            None => Ok(None),
        }
    }

    /// Surface size changed. Only the output geometry is touched.
    pub fn on_surface_changed(&self, width: u32, height: u32) -> PlayerResult<()> {
        let mut state = self.state.lock();
        if state.bound.is_none() {
            debug!("Ignoring resize to {}x{} while unbound", width, height);
            return Ok(());
        }
        self.engine.properties()?.set_output_geometry(width, height)?;
        state.geometry = Some((width, height));
        Ok(())
    }

    /// Surface is going away. Detaches synchronously before returning.
    pub fn on_surface_destroyed(&self) -> PlayerResult<()> {
        let mut state = self.state.lock();
        if state.bound.take().is_some() {
            info!("Surface destroyed, detaching video output");
            state.geometry = None;
            self.engine.engine().detach_surface()?;
        }
        Ok(())
    }

    /// Start playback now if a surface is bound, otherwise queue it.
    /// A newer queued request replaces an older one.
    pub fn play(&self, request: PlayRequest) -> PlayerResult<PlayOutcome> {
        let mut state = self.state.lock();
        // Surfaces only exist for a live engine
        self.engine.properties()?;

        if state.bound.is_some() {
            let generation = self
                .engine
                .load_new_video(&request.locator, request.resume_offset)?;
            Ok(PlayOutcome::Started(generation))
        } else {
            if let Some(old) = state.pending.replace(request) {
                debug!("Replacing queued play request: {}", old.locator);
            }
            Ok(PlayOutcome::Queued)
        }
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Pause, stop, detach, destroy. The engine is gone afterwards.
    pub fn teardown(&self) -> PlayerResult<()> {
        let mut state = self.state.lock();
        if state.torn_down {
            return Ok(());
        }
        state.torn_down = true;
        state.pending = None;

        if let Ok(props) = self.engine.properties() {
            if let Err(e) = props.set_paused(true) {
                warn!("Pause before teardown failed: {}", e);
            }
            if let Err(e) = props.stop() {
                warn!("Stop before teardown failed: {}", e);
            }
        }

        let detached = if state.bound.take().is_some() {
            state.geometry = None;
            self.engine.engine().detach_surface()
        } else {
            Ok(())
        };

        self.engine.destroy();
        info!("Surface lifecycle torn down");
        detached
    }
}

impl Drop for SurfaceLifecycleManager {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.bound.take().is_some() {
            if let Err(e) = self.engine.engine().detach_surface() {
                warn!("Failed to detach surface on drop: {}", e);
            }
        }
    }
}
