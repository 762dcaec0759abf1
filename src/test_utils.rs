#![cfg(test)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::player::engine::{
    EngineEvent, EventHandler, NativeEngine, Property, PropertyValue, SurfaceHandle,
};
use crate::player::compositor::frame::{ExternalFrame, FrameSource, IDENTITY};
use crate::player::compositor::gl::{
    DrawPass, FramebufferId, GpuDevice, ProgramId, QuadId, RenderTarget, TextureId, Uniform,
};
use crate::player::compositor::shaders::FrameTextureKind;
use crate::player::error::{PlayerError, PlayerResult, ShaderStage};

/// Every call the playback core made on the engine, in order
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Option(String),
    Initialize,
    Set(String),
    Command(String),
    Attach(SurfaceHandle),
    Detach,
    Destroy,
}

/// In-memory engine that records calls and flags ordering violations
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    properties: Mutex<HashMap<String, PropertyValue>>,
    commands: Mutex<Vec<Vec<String>>>,
    violations: Mutex<Vec<String>>,
    handler: Mutex<Option<EventHandler>>,
    bound: AtomicBool,
    initialized: AtomicBool,
    fail_init: AtomicBool,
    track_count_reads: AtomicUsize,
    tracks: Mutex<usize>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init() -> Self {
        let engine = Self::default();
        engine.fail_init.store(true, Ordering::SeqCst);
        engine
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().clone()
    }

    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.properties.lock().get(name).cloned()
    }

    /// Video-output writes that happened while no surface was bound
    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    pub fn track_count_reads(&self) -> usize {
        self.track_count_reads.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: EngineEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn push_track(
        &self,
        kind: &str,
        id: i64,
        lang: Option<&str>,
        title: Option<&str>,
        external: bool,
    ) {
        let mut count = self.tracks.lock();
        let index = *count;
        let mut props = self.properties.lock();
        let key = |field: &str| format!("track-list/{}/{}", index, field);
        props.insert(key("type"), PropertyValue::Str(kind.to_string()));
        props.insert(key("id"), PropertyValue::Int(id));
        if let Some(lang) = lang {
            props.insert(key("lang"), PropertyValue::Str(lang.to_string()));
        }
        if let Some(title) = title {
            props.insert(key("title"), PropertyValue::Str(title.to_string()));
        }
        props.insert(key("external"), PropertyValue::Flag(external));
        *count += 1;
        props.insert(
            "track-list/count".to_string(),
            PropertyValue::Int(*count as i64),
        );
    }

    pub fn set_value(&self, name: &str, value: PropertyValue) {
        self.properties.lock().insert(name.to_string(), value);
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

impl NativeEngine for RecordingEngine {
    fn set_option(&self, name: &str, value: PropertyValue) -> PlayerResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            self.violations
                .lock()
                .push(format!("option {} set after init", name));
        }
        self.record(EngineCall::Option(name.to_string()));
        self.properties.lock().insert(name.to_string(), value);
        Ok(())
    }

    fn initialize(&self) -> PlayerResult<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(PlayerError::EngineUnavailable(
                "libmpv not found".to_string(),
            ));
        }
        self.initialized.store(true, Ordering::SeqCst);
        self.record(EngineCall::Initialize);
        Ok(())
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PlayerResult<()> {
        let touches_output = Property::from_name(name)
            .map(Property::touches_video_output)
            .unwrap_or(false);
        if touches_output && !self.is_bound() {
            self.violations
                .lock()
                .push(format!("{} written while unbound", name));
        }
        self.record(EngineCall::Set(name.to_string()));
        self.properties.lock().insert(name.to_string(), value);
        Ok(())
    }

    fn get_property(&self, name: &str) -> PlayerResult<PropertyValue> {
        if name == "track-list/count" {
            self.track_count_reads.fetch_add(1, Ordering::SeqCst);
        }
        self.properties
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| PlayerError::Engine(format!("property unavailable: {}", name)))
    }

    fn command(&self, name: &str, args: &[&str]) -> PlayerResult<()> {
        if name == "loadfile" && !self.is_bound() {
            self.violations
                .lock()
                .push("loadfile while unbound".to_string());
        }
        self.record(EngineCall::Command(name.to_string()));
        let mut full = vec![name.to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        self.commands.lock().push(full);

        if name == "loadfile" {
            // A replace load leaves one playlist entry with a fresh id
            let mut props = self.properties.lock();
            let next = props
                .get("playlist/0/id")
                .and_then(PropertyValue::as_i64)
                .unwrap_or(0)
                + 1;
            props.insert("playlist/0/id".to_string(), PropertyValue::Int(next));
        }

        if name == "sub-add" {
            let next_id = 100 + *self.tracks.lock() as i64;
            let lang = args.get(3).copied();
            self.push_track("sub", next_id, lang, args.get(2).copied(), true);
            self.properties
                .lock()
                .insert("sid".to_string(), PropertyValue::Int(next_id));
        }
        Ok(())
    }

    fn attach_surface(&self, surface: SurfaceHandle) -> PlayerResult<()> {
        self.bound.store(true, Ordering::SeqCst);
        self.record(EngineCall::Attach(surface));
        Ok(())
    }

    fn detach_surface(&self) -> PlayerResult<()> {
        self.bound.store(false, Ordering::SeqCst);
        self.record(EngineCall::Detach);
        Ok(())
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn destroy(&self) {
        if self.is_bound() {
            self.violations
                .lock()
                .push("destroyed while surface bound".to_string());
        }
        self.record(EngineCall::Destroy);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Shared constructor used by most tests
pub fn recording_engine() -> Arc<RecordingEngine> {
    Arc::new(RecordingEngine::new())
}

/// One draw issued through [`RecordingDevice`]
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub target: Option<RenderTarget>,
    pub flags: i32,
    pub blend_mix: Option<f32>,
    pub texture_units: usize,
}

/// Live GPU objects and draw history of a [`RecordingDevice`]
#[derive(Debug, Default)]
pub struct DeviceLog {
    next_id: u32,
    pub programs: HashSet<ProgramId>,
    pub quads: HashSet<QuadId>,
    pub targets: Vec<RenderTarget>,
    pub draws: Vec<DrawRecord>,
    pub presents: usize,
    pub output_released: bool,
}

impl DeviceLog {
    pub fn shared() -> Arc<Mutex<DeviceLog>> {
        Arc::new(Mutex::new(DeviceLog::default()))
    }

    /// No GPU object is alive
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty() && self.quads.is_empty() && self.targets.is_empty()
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// GPU device that keeps objects as integers and records every draw
pub struct RecordingDevice {
    log: Arc<Mutex<DeviceLog>>,
    fail_fragment: bool,
}

impl RecordingDevice {
    pub fn new(log: Arc<Mutex<DeviceLog>>) -> Self {
        Self {
            log,
            fail_fragment: false,
        }
    }

    pub fn failing_fragment(log: Arc<Mutex<DeviceLog>>) -> Self {
        Self {
            log,
            fail_fragment: true,
        }
    }
}

impl GpuDevice for RecordingDevice {
    fn compile_program(&mut self, _vertex: &str, _fragment: &str) -> PlayerResult<ProgramId> {
        if self.fail_fragment {
            return Err(PlayerError::ShaderCompileFailure {
                stage: ShaderStage::Fragment,
                log: "0:14: 'samplerExternalOES' : syntax error".to_string(),
            });
        }
        let mut log = self.log.lock();
        let id = ProgramId(log.next());
        log.programs.insert(id);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.log.lock().programs.remove(&program);
    }

    fn create_quad(&mut self) -> PlayerResult<QuadId> {
        let mut log = self.log.lock();
        let id = QuadId(log.next());
        log.quads.insert(id);
        Ok(id)
    }

    fn delete_quad(&mut self, quad: QuadId) {
        self.log.lock().quads.remove(&quad);
    }

    fn create_render_target(&mut self, width: u32, height: u32) -> PlayerResult<RenderTarget> {
        let mut log = self.log.lock();
        let target = RenderTarget {
            framebuffer: FramebufferId(log.next()),
            texture: TextureId(log.next()),
            width,
            height,
        };
        log.targets.push(target);
        Ok(target)
    }

    fn delete_render_target(&mut self, target: RenderTarget) {
        self.log.lock().targets.retain(|t| *t != target);
    }

    fn draw(&mut self, pass: &DrawPass<'_>) -> PlayerResult<()> {
        let uniform = |name: &str| {
            pass.uniforms
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| *v)
        };
        let flags = match uniform("u_flags") {
            Some(Uniform::Int(v)) => v,
            _ => 0,
        };
        let blend_mix = match uniform("u_blend_mix") {
            Some(Uniform::Float(v)) => Some(v),
            _ => None,
        };

        let mut log = self.log.lock();
        if log.output_released {
            return Err(PlayerError::Gpu("draw after release".to_string()));
        }
        log.draws.push(DrawRecord {
            program: pass.program,
            target: pass.target,
            flags,
            blend_mix,
            texture_units: pass.textures.len(),
        });
        Ok(())
    }

    fn present(&mut self) -> PlayerResult<()> {
        self.log.lock().presents += 1;
        Ok(())
    }

    fn release_output(&mut self) {
        self.log.lock().output_released = true;
    }
}

/// Frame source handing out a fixed 2D texture
pub struct TestFrameSource {
    pub latches: Arc<AtomicUsize>,
    pub released: Arc<AtomicBool>,
}

impl TestFrameSource {
    pub fn new() -> Self {
        Self {
            latches: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl FrameSource for TestFrameSource {
    fn texture_kind(&self) -> FrameTextureKind {
        FrameTextureKind::Texture2D
    }

    fn latch(&mut self, _viewport: (u32, u32)) -> PlayerResult<ExternalFrame> {
        self.latches.fetch_add(1, Ordering::SeqCst);
        Ok(ExternalFrame {
            texture: 42,
            transform: IDENTITY,
        })
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
