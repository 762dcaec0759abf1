use parking_lot::Mutex;
use reel_tv::player::engine::{
    EngineEvent, EventHandler, NativeEngine, Property, PropertyValue, SurfaceHandle,
};
use reel_tv::player::{PlayerError, PlayerResult};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Engine stand-in that logs every call and flags surface-ordering violations
#[derive(Default)]
pub struct MockEngine {
    log: Mutex<Vec<String>>,
    properties: Mutex<HashMap<String, PropertyValue>>,
    violations: Mutex<Vec<String>>,
    handler: Mutex<Option<EventHandler>>,
    initialized: AtomicBool,
    bound: AtomicBool,
    track_count: Mutex<i64>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    pub fn value(&self, name: &str) -> Option<PropertyValue> {
        self.properties.lock().get(name).cloned()
    }

    pub fn set_value(&self, name: &str, value: PropertyValue) {
        self.properties.lock().insert(name.to_string(), value);
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: EngineEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Deliver the start-file/file-loaded pair the engine sends after a load
    pub fn finish_loading(&self) {
        self.emit(EngineEvent::StartFile(None));
        self.emit(EngineEvent::FileLoaded);
    }

    pub fn add_subtitle_track(&self, id: i64, lang: &str) {
        let mut count = self.track_count.lock();
        let mut props = self.properties.lock();
        let key = |field: &str| format!("track-list/{}/{}", *count, field);
        props.insert(key("type"), PropertyValue::Str("sub".into()));
        props.insert(key("id"), PropertyValue::Int(id));
        props.insert(key("lang"), PropertyValue::Str(lang.into()));
        props.insert(key("external"), PropertyValue::Flag(false));
        *count += 1;
        props.insert("track-list/count".into(), PropertyValue::Int(*count));
    }

    fn push(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

impl NativeEngine for MockEngine {
    fn set_option(&self, name: &str, value: PropertyValue) -> PlayerResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            self.violations.lock().push(format!("option {} after init", name));
        }
        self.push(format!("option {}", name));
        self.properties.lock().insert(name.to_string(), value);
        Ok(())
    }

    fn initialize(&self) -> PlayerResult<()> {
        self.initialized.store(true, Ordering::SeqCst);
        self.push("initialize".into());
        Ok(())
    }

    fn set_property(&self, name: &str, value: PropertyValue) -> PlayerResult<()> {
        let touches_output = Property::from_name(name).is_some_and(Property::touches_video_output);
        if touches_output && !self.is_bound() {
            self.violations.lock().push(format!("{} while unbound", name));
        }
        self.push(format!("set {}", name));
        self.properties.lock().insert(name.to_string(), value);
        Ok(())
    }

    fn get_property(&self, name: &str) -> PlayerResult<PropertyValue> {
        self.properties
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| PlayerError::Engine(format!("property unavailable: {}", name)))
    }

    fn command(&self, name: &str, args: &[&str]) -> PlayerResult<()> {
        if name == "loadfile" && !self.is_bound() {
            self.violations.lock().push("loadfile while unbound".into());
        }
        self.push(format!("command {} {}", name, args.join(" ")));
        Ok(())
    }

    fn attach_surface(&self, surface: SurfaceHandle) -> PlayerResult<()> {
        self.bound.store(true, Ordering::SeqCst);
        self.push(format!("attach {}", surface.0));
        Ok(())
    }

    fn detach_surface(&self) -> PlayerResult<()> {
        self.bound.store(false, Ordering::SeqCst);
        self.push("detach".into());
        Ok(())
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn destroy(&self) {
        if self.is_bound() {
            self.violations.lock().push("destroy while bound".into());
        }
        self.push("destroy".into());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
