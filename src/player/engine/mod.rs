//! Native decode engine abstraction.
//!
//! The engine speaks a name-keyed property protocol (get/set by name plus
//! string commands). Call sites never use raw names; they go through
//! [`properties::EngineProperties`], which owns the name table.

pub mod properties;
pub mod singleton;

#[cfg(feature = "mpv")]
pub mod mpv;

use std::any::Any;
use std::sync::Arc;

use super::error::PlayerResult;

pub use properties::{EngineProperties, NativeTrack, Property, TrackKind};
pub use singleton::{EngineCell, EngineHandle, EngineInitState, PlaybackSession, Readiness, ReadinessState};

/// Value carried through the engine's property protocol
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Flag(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl PropertyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            PropertyValue::Double(v) => Some(*v as i64),
            PropertyValue::Str(s) => s.parse().ok(),
            PropertyValue::Flag(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Str(s) => s.parse().ok(),
            PropertyValue::Flag(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Flag(v) => Some(*v),
            PropertyValue::Str(s) => match s.as_str() {
                "yes" | "true" => Some(true),
                "no" | "false" => Some(false),
                _ => None,
            },
            PropertyValue::Int(v) => Some(*v != 0),
            PropertyValue::Double(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Flag(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

/// Why the engine finished a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    Stopped,
    Replaced,
    Error(String),
}

/// Events delivered from the engine's own threads
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A file started loading; carries its playlist entry id when the engine reports one
    StartFile(Option<i64>),
    FileLoaded,
    EndFile(EndReason),
    VideoReconfig,
    /// The engine has a new decoded frame for the compositor
    FrameAvailable,
    Shutdown,
}

pub type EventHandler = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Opaque platform drawing target (native window / surface pointer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub i64);

/// The native decode engine.
///
/// Implementations must be callable from any thread. Options set through
/// [`NativeEngine::set_option`] only take effect if issued before
/// [`NativeEngine::initialize`].
pub trait NativeEngine: Send + Sync {
    /// Set an init-time option. Only meaningful before `initialize`.
    fn set_option(&self, name: &str, value: PropertyValue) -> PlayerResult<()>;

    /// One-time native initialization
    fn initialize(&self) -> PlayerResult<()>;

    fn set_property(&self, name: &str, value: PropertyValue) -> PlayerResult<()>;

    fn get_property(&self, name: &str) -> PlayerResult<PropertyValue>;

    fn command(&self, name: &str, args: &[&str]) -> PlayerResult<()>;

    /// Bind the drawing target to the engine's video output
    fn attach_surface(&self, surface: SurfaceHandle) -> PlayerResult<()>;

    /// Unbind the drawing target. Must be synchronous.
    fn detach_surface(&self) -> PlayerResult<()>;

    /// Install the listener for engine events. Called once by the singleton.
    fn set_event_handler(&self, handler: EventHandler);

    /// Terminate the native instance
    fn destroy(&self);

    /// Concrete engine access for backend-specific wiring (render contexts)
    fn as_any(&self) -> &dyn Any;
}
