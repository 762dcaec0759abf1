//! libmpv backend for [`NativeEngine`].
//!
//! Options are buffered until `initialize`, which builds the mpv core with
//! them applied. A dedicated thread drains the mpv event queue and forwards
//! lifecycle events to the installed handler. Frames reach the compositor
//! through [`MpvFrameSource`], which renders with the mpv render API into a
//! texture owned by the render thread.

use glow::HasContext;
use libmpv2::Mpv;
use libmpv2_sys::*;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace, warn};

use super::{EndReason, EngineEvent, EngineHandle, EventHandler, NativeEngine, PropertyValue, SurfaceHandle};
use crate::config::PlaybackConfig;
use crate::player::compositor::frame::{ExternalFrame, FrameSource, IDENTITY};
use crate::player::compositor::shaders::FrameTextureKind;
use crate::player::error::{PlayerError, PlayerResult};

type SharedHandler = Arc<Mutex<Option<EventHandler>>>;

fn emit(handler: &SharedHandler, event: EngineEvent) {
    let handler = handler.lock().clone();
    if let Some(handler) = handler {
        handler(event);
    }
}

fn error_string(code: i32) -> String {
    unsafe {
        let message = mpv_error_string(code);
        if message.is_null() {
            return format!("mpv error {}", code);
        }
        CStr::from_ptr(message).to_string_lossy().into_owned()
    }
}

/// mpv client handle moved onto the event thread
struct RawHandle(*mut mpv_handle);

// mpv_wait_event may be called from any single thread
unsafe impl Send for RawHandle {}

pub struct MpvEngine {
    options: Mutex<Vec<(String, PropertyValue)>>,
    mpv: RwLock<Option<Mpv>>,
    handler: SharedHandler,
    events: Mutex<Option<thread::JoinHandle<()>>>,
    verbose: bool,
}

impl MpvEngine {
    pub fn new(config: &PlaybackConfig) -> PlayerResult<Self> {
        info!("Creating MPV engine");

        // MPV requires LC_NUMERIC to be set to "C"
        let c_locale = CString::new("C")
            .map_err(|e| PlayerError::EngineUnavailable(e.to_string()))?;
        unsafe {
            libc::setlocale(libc::LC_NUMERIC, c_locale.as_ptr());
        }

        Ok(Self {
            options: Mutex::new(Vec::new()),
            mpv: RwLock::new(None),
            handler: Arc::new(Mutex::new(None)),
            events: Mutex::new(None),
            verbose: config.mpv_verbose_logging,
        })
    }

    fn with_mpv<T>(&self, f: impl FnOnce(&Mpv) -> PlayerResult<T>) -> PlayerResult<T> {
        let guard = self.mpv.read();
        let mpv = guard
            .as_ref()
            .ok_or_else(|| PlayerError::EngineUnavailable("MPV not initialized".to_string()))?;
        f(mpv)
    }

    fn start_event_thread(&self, mpv: &Mpv) -> PlayerResult<()> {
        let raw = RawHandle(mpv.ctx.as_ptr());
        let handler = self.handler.clone();
        let thread = thread::Builder::new()
            .name("reel-mpv-events".to_string())
            .spawn(move || event_loop(raw, handler))?;
        *self.events.lock() = Some(thread);
        Ok(())
    }
}

fn event_loop(raw: RawHandle, handler: SharedHandler) {
    let RawHandle(ctx) = raw;
    debug!("MPV event thread started");

    loop {
        let event = unsafe { &*mpv_wait_event(ctx, -1.0) };
        match event.event_id {
            mpv_event_id_MPV_EVENT_NONE => continue,
            mpv_event_id_MPV_EVENT_START_FILE => {
                let entry = if event.data.is_null() {
                    None
                } else {
                    let start = unsafe { &*(event.data as *const mpv_event_start_file) };
                    Some(start.playlist_entry_id)
                };
                emit(&handler, EngineEvent::StartFile(entry));
            }
            mpv_event_id_MPV_EVENT_FILE_LOADED => emit(&handler, EngineEvent::FileLoaded),
            mpv_event_id_MPV_EVENT_VIDEO_RECONFIG => emit(&handler, EngineEvent::VideoReconfig),
            mpv_event_id_MPV_EVENT_END_FILE => {
                let reason = if event.data.is_null() {
                    EndReason::Stopped
                } else {
                    let end = unsafe { &*(event.data as *const mpv_event_end_file) };
                    match end.reason {
                        mpv_end_file_reason_MPV_END_FILE_REASON_EOF => EndReason::Eof,
                        mpv_end_file_reason_MPV_END_FILE_REASON_REDIRECT => EndReason::Replaced,
                        mpv_end_file_reason_MPV_END_FILE_REASON_ERROR => {
                            EndReason::Error(error_string(end.error))
                        }
                        _ => EndReason::Stopped,
                    }
                };
                emit(&handler, EngineEvent::EndFile(reason));
            }
            mpv_event_id_MPV_EVENT_SHUTDOWN => {
                emit(&handler, EngineEvent::Shutdown);
                break;
            }
            other => trace!("Ignoring MPV event {}", other),
        }
    }

    debug!("MPV event thread stopped");
}

impl NativeEngine for MpvEngine {
    fn set_option(&self, name: &str, value: PropertyValue) -> PlayerResult<()> {
        if self.mpv.read().is_some() {
            warn!("Option {} set after initialization is ignored", name);
            return Ok(());
        }
        self.options.lock().push((name.to_string(), value));
        Ok(())
    }

    fn initialize(&self) -> PlayerResult<()> {
        let mut guard = self.mpv.write();
        if guard.is_some() {
            return Ok(());
        }

        let options = std::mem::take(&mut *self.options.lock());
        let mpv = Mpv::with_initializer(|init| {
            for (name, value) in &options {
                match value {
                    PropertyValue::Flag(v) => init.set_property(name, *v)?,
                    PropertyValue::Int(v) => init.set_property(name, *v)?,
                    PropertyValue::Double(v) => init.set_property(name, *v)?,
                    PropertyValue::Str(v) => init.set_property(name, v.as_str())?,
                }
            }
            Ok(())
        })
        .map_err(|e| PlayerError::EngineUnavailable(format!("Failed to create MPV instance: {:?}", e)))?;

        // Always log MPV version as it's useful for debugging
        if let Ok(version) = mpv.get_property::<String>("mpv-version") {
            info!("MPV version: {}", version);
        }
        if self.verbose
            && let Ok(config) = mpv.get_property::<String>("mpv-configuration")
        {
            debug!("MPV configuration: {}", config);
        }

        self.start_event_thread(&mpv)?;
        *guard = Some(mpv);
        Ok(())
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PlayerResult<()> {
        self.with_mpv(|mpv| {
            let result = match &value {
                PropertyValue::Flag(v) => mpv.set_property(name, *v),
                PropertyValue::Int(v) => mpv.set_property(name, *v),
                PropertyValue::Double(v) => mpv.set_property(name, *v),
                PropertyValue::Str(v) => mpv.set_property(name, v.as_str()),
            };
            result.map_err(|e| PlayerError::Engine(format!("Failed to set {}: {:?}", name, e)))
        })
    }

    /// Values come back in mpv's string form; the typed accessors parse them
    fn get_property(&self, name: &str) -> PlayerResult<PropertyValue> {
        self.with_mpv(|mpv| {
            mpv.get_property::<String>(name)
                .map(PropertyValue::Str)
                .map_err(|e| PlayerError::Engine(format!("Failed to get {}: {:?}", name, e)))
        })
    }

    fn command(&self, name: &str, args: &[&str]) -> PlayerResult<()> {
        self.with_mpv(|mpv| {
            mpv.command(name, args)
                .map_err(|e| PlayerError::Engine(format!("Command {} failed: {:?}", name, e)))
        })
    }

    fn attach_surface(&self, surface: SurfaceHandle) -> PlayerResult<()> {
        debug!("Attaching surface {:?}", surface);
        self.set_property("wid", PropertyValue::Int(surface.0))
    }

    fn detach_surface(&self) -> PlayerResult<()> {
        debug!("Detaching surface");
        self.set_property("vo", PropertyValue::Str("null".to_string()))?;
        self.set_property("force-window", PropertyValue::Flag(false))?;
        self.set_property("wid", PropertyValue::Int(0))
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn destroy(&self) {
        let quit = self.with_mpv(|mpv| {
            mpv.command("quit", &[])
                .map_err(|e| PlayerError::Engine(format!("{:?}", e)))
        });

        let thread = self.events.lock().take();
        match (quit, thread) {
            (Ok(()), Some(thread)) => {
                if thread.join().is_err() {
                    error!("MPV event thread panicked");
                }
            }
            (Err(e), Some(_)) => warn!("MPV quit failed, leaving event thread detached: {}", e),
            _ => {}
        }

        // Dropping the core terminates it
        self.mpv.write().take();
        info!("MPV engine destroyed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// GL symbol loader handed to the mpv render API
pub type ProcLoader = Box<dyn Fn(&str) -> *const c_void>;

unsafe extern "C" fn get_proc_address(ctx: *mut c_void, name: *const c_char) -> *mut c_void {
    unsafe {
        if ctx.is_null() || name.is_null() {
            return ptr::null_mut();
        }
        let loader = &*(ctx as *const ProcLoader);
        match CStr::from_ptr(name).to_str() {
            Ok(name) => loader(name) as *mut c_void,
            Err(_) => ptr::null_mut(),
        }
    }
}

unsafe extern "C" fn on_render_update(ctx: *mut c_void) {
    unsafe {
        let handler = &*(ctx as *const SharedHandler);
        emit(handler, EngineEvent::FrameAvailable);
    }
}

/// Frame source backed by the mpv render API.
///
/// Lives on the compositor's render thread; mpv draws each new frame into a
/// texture of viewport size, which the compositor then samples.
pub struct MpvFrameSource {
    gl: Arc<glow::Context>,
    render: *mut mpv_render_context,
    loader: *mut ProcLoader,
    update_ctx: *mut SharedHandler,
    target: Option<(glow::Framebuffer, glow::Texture, (u32, u32))>,
}

impl MpvFrameSource {
    /// Create the render context. The GL context must be current.
    pub fn new(engine: &EngineHandle, gl: Arc<glow::Context>, loader: ProcLoader) -> PlayerResult<Self> {
        let mpv_engine = engine
            .engine()
            .as_any()
            .downcast_ref::<MpvEngine>()
            .ok_or_else(|| PlayerError::Gpu("engine is not backed by libmpv".to_string()))?;

        mpv_engine.with_mpv(|mpv| unsafe {
            let api_type = CString::new("opengl").map_err(|e| PlayerError::Gpu(e.to_string()))?;
            let loader = Box::into_raw(Box::new(loader));
            let opengl_params = mpv_opengl_init_params {
                get_proc_address: Some(get_proc_address),
                get_proc_address_ctx: loader as *mut c_void,
            };

            let mut params = vec![
                mpv_render_param {
                    type_: mpv_render_param_type_MPV_RENDER_PARAM_API_TYPE,
                    data: api_type.as_ptr() as *mut c_void,
                },
                mpv_render_param {
                    type_: mpv_render_param_type_MPV_RENDER_PARAM_OPENGL_INIT_PARAMS,
                    data: &opengl_params as *const _ as *mut c_void,
                },
                mpv_render_param {
                    type_: mpv_render_param_type_MPV_RENDER_PARAM_INVALID,
                    data: ptr::null_mut(),
                },
            ];

            let mut render: *mut mpv_render_context = ptr::null_mut();
            let result = mpv_render_context_create(&mut render, mpv.ctx.as_ptr(), params.as_mut_ptr());
            if result < 0 {
                drop(Box::from_raw(loader));
                return Err(PlayerError::Gpu(format!(
                    "Failed to create render context: {}",
                    error_string(result)
                )));
            }

            let update_ctx = Box::into_raw(Box::new(mpv_engine.handler.clone()));
            mpv_render_context_set_update_callback(render, Some(on_render_update), update_ctx as *mut c_void);

            info!("MPV render context initialized");
            Ok(Self {
                gl,
                render,
                loader,
                update_ctx,
                target: None,
            })
        })
    }

    fn ensure_target(&mut self, viewport: (u32, u32)) -> PlayerResult<(glow::Framebuffer, glow::Texture)> {
        if let Some((fbo, texture, size)) = self.target {
            if size == viewport {
                return Ok((fbo, texture));
            }
        }
        self.release_target();

        let gl = &self.gl;
        let (width, height) = (viewport.0.max(1) as i32, viewport.1.max(1) as i32);
        unsafe {
            let texture = gl.create_texture().map_err(PlayerError::Gpu)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width,
                height,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);

            let fbo = gl.create_framebuffer().map_err(PlayerError::Gpu)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.bind_texture(glow::TEXTURE_2D, None);

            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                gl.delete_texture(texture);
                return Err(PlayerError::Gpu(format!("Incomplete frame target: 0x{:x}", status)));
            }

            self.target = Some((fbo, texture, viewport));
            Ok((fbo, texture))
        }
    }

    fn release_target(&mut self) {
        if let Some((fbo, texture, _)) = self.target.take() {
            unsafe {
                self.gl.delete_framebuffer(fbo);
                self.gl.delete_texture(texture);
            }
        }
    }
}

impl FrameSource for MpvFrameSource {
    fn texture_kind(&self) -> FrameTextureKind {
        FrameTextureKind::Texture2D
    }

    fn latch(&mut self, viewport: (u32, u32)) -> PlayerResult<ExternalFrame> {
        if self.render.is_null() {
            return Err(PlayerError::Gpu("render context released".to_string()));
        }
        let (fbo, texture) = self.ensure_target(viewport)?;

        let opengl_fbo = mpv_opengl_fbo {
            fbo: fbo.0.get() as i32,
            w: viewport.0 as i32,
            h: viewport.1 as i32,
            internal_format: 0,
        };
        let flip_y = 0i32;

        unsafe {
            let mut params = vec![
                mpv_render_param {
                    type_: mpv_render_param_type_MPV_RENDER_PARAM_OPENGL_FBO,
                    data: &opengl_fbo as *const _ as *mut c_void,
                },
                mpv_render_param {
                    type_: mpv_render_param_type_MPV_RENDER_PARAM_FLIP_Y,
                    data: &flip_y as *const _ as *mut c_void,
                },
                mpv_render_param {
                    type_: mpv_render_param_type_MPV_RENDER_PARAM_INVALID,
                    data: ptr::null_mut(),
                },
            ];

            let result = mpv_render_context_render(self.render, params.as_mut_ptr());
            if result < 0 {
                return Err(PlayerError::Engine(format!(
                    "mpv_render_context_render failed: {}",
                    error_string(result)
                )));
            }
            mpv_render_context_report_swap(self.render);
        }

        Ok(ExternalFrame {
            texture: texture.0.get(),
            transform: IDENTITY,
        })
    }

    fn release(&mut self) {
        self.release_target();
        if !self.render.is_null() {
            unsafe {
                mpv_render_context_free(self.render);
                drop(Box::from_raw(self.update_ctx));
                drop(Box::from_raw(self.loader));
            }
            self.render = ptr::null_mut();
            debug!("MPV render context freed");
        }
    }
}

impl Drop for MpvFrameSource {
    fn drop(&mut self) {
        self.release();
    }
}
