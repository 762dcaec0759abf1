pub mod compositor;
pub mod controller;
pub mod engine;
pub mod error;
pub mod subtitles;
pub mod surface;

pub use compositor::{CompositorHandle, EffectParameters};
pub use controller::{PlayerCommand, PlayerController, PlayerHandle};
pub use engine::{EngineHandle, Readiness};
pub use error::{PlayerError, PlayerResult};
pub use subtitles::{SubtitleDescriptor, SubtitleResolver};
pub use surface::{PlayOutcome, PlayRequest, SurfaceLifecycleManager, SurfacePlatform};
