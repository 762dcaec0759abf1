use super::gl::RenderTarget;
use super::shaders::FrameTextureKind;
use crate::player::error::PlayerResult;

pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Engine-owned decoded frame as seen by the compositor. Read-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalFrame {
    /// Raw GL texture name
    pub texture: u32,
    /// Texture coordinate transform supplied with the frame
    pub transform: [f32; 16],
}

/// Producer of decoded frames.
///
/// All methods run on the compositor's render thread with its GL context
/// current.
pub trait FrameSource {
    fn texture_kind(&self) -> FrameTextureKind;

    /// Make the newest decoded frame current and return it
    fn latch(&mut self, viewport: (u32, u32)) -> PlayerResult<ExternalFrame>;

    /// Drop GL objects owned by the source
    fn release(&mut self) {}
}

/// Current frame plus the compositor-owned previous-frame target
#[derive(Debug, Default)]
pub struct FrameResources {
    pub current: Option<ExternalFrame>,
    pub previous: Option<RenderTarget>,
    pub has_previous: bool,
}

impl FrameResources {
    /// Swap in a new previous-frame target; the old one is returned for release
    pub fn replace_previous(&mut self, target: RenderTarget) -> Option<RenderTarget> {
        self.has_previous = false;
        self.previous.replace(target)
    }

    pub fn take_previous(&mut self) -> Option<RenderTarget> {
        self.has_previous = false;
        self.previous.take()
    }

    /// Previous frame usable for blending
    pub fn blend_source(&self) -> Option<RenderTarget> {
        self.previous.filter(|_| self.has_previous)
    }
}
