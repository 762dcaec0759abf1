//! On-demand video compositor.
//!
//! Draws only when something changed: a new decoded frame arrived or an effect
//! parameter was modified. Each redraw is a single effects pass to the output
//! surface, followed (when frame blending is on) by a copy of the current
//! frame into the previous-frame target.

pub mod effects;
pub mod frame;
pub mod gl;
pub mod render_thread;
pub mod shaders;

use tracing::{debug, trace, warn};

pub use effects::EffectParameters;
pub use frame::{ExternalFrame, FrameResources, FrameSource};
pub use gl::{GlowDevice, GpuDevice, OutputSurface};
pub use render_thread::{CompositorHandle, FrameNotifier};
pub use shaders::FrameTextureKind;

use crate::player::error::{PlayerError, PlayerResult};
use gl::{DrawPass, ProgramId, QuadId, TextureBinding, Uniform};

const FRAME_UNIT: u32 = 0;
const PREVIOUS_UNIT: u32 = 1;
const BLEND_FLAG: i32 = 4;

pub struct Compositor<D: GpuDevice> {
    device: D,
    source: Box<dyn FrameSource>,
    kind: FrameTextureKind,
    effects_program: Option<ProgramId>,
    copy_program: Option<ProgramId>,
    quad: Option<QuadId>,
    frames: FrameResources,
    effects: EffectParameters,
    viewport: (u32, u32),
    frame_pending: bool,
    released: bool,
}

impl<D: GpuDevice> Compositor<D> {
    /// Compile shaders and create GPU resources.
    ///
    /// Shader failures come back as `ShaderCompileFailure`; anything created
    /// before the failure is released.
    pub fn setup(
        device: D,
        source: Box<dyn FrameSource>,
        viewport: (u32, u32),
        effects: EffectParameters,
    ) -> PlayerResult<Self> {
        let kind = source.texture_kind();
        let mut compositor = Self {
            device,
            source,
            kind,
            effects_program: None,
            copy_program: None,
            quad: None,
            frames: FrameResources::default(),
            effects,
            viewport,
            frame_pending: false,
            released: false,
        };

        if let Err(e) = compositor.create_resources() {
            warn!("Compositor setup failed: {}", e);
            compositor.teardown();
            return Err(e);
        }

        debug!("Compositor ready at {}x{}", viewport.0, viewport.1);
        Ok(compositor)
    }

    fn create_resources(&mut self) -> PlayerResult<()> {
        self.effects_program = Some(
            self.device
                .compile_program(shaders::VERTEX, &shaders::effects_fragment(self.kind))?,
        );
        self.copy_program = Some(
            self.device
                .compile_program(shaders::VERTEX, &shaders::copy_fragment(self.kind))?,
        );
        self.quad = Some(self.device.create_quad()?);
        let target = self.device.create_render_target(self.viewport.0, self.viewport.1)?;
        self.frames.replace_previous(target);
        Ok(())
    }

    pub fn effects(&self) -> &EffectParameters {
        &self.effects
    }

    pub fn set_effects(&mut self, effects: EffectParameters) {
        self.effects = effects;
    }

    pub fn frames(&self) -> &FrameResources {
        &self.frames
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// A new decoded frame is waiting to be latched
    pub fn mark_frame_pending(&mut self) {
        self.frame_pending = true;
    }

    /// Draw once. Returns `false` when there is no frame to draw yet.
    pub fn redraw(&mut self) -> PlayerResult<bool> {
        if self.released {
            return Err(PlayerError::Gpu("Compositor already torn down".to_string()));
        }

        if self.frame_pending {
            let frame = self.source.latch(self.viewport)?;
            self.frames.current = Some(frame);
            self.frame_pending = false;
        }

        let Some(frame) = self.frames.current else {
            trace!("Redraw skipped, no frame latched yet");
            return Ok(false);
        };
        let (Some(effects_program), Some(copy_program), Some(quad)) =
            (self.effects_program, self.copy_program, self.quad)
        else {
            return Err(PlayerError::Gpu("Compositor resources missing".to_string()));
        };

        let frame_binding = TextureBinding::Frame {
            name: frame.texture,
            kind: self.kind,
        };
        let blend_from = if self.effects.blend_enabled() {
            self.frames.blend_source()
        } else {
            self.frames.has_previous = false;
            None
        };

        let mut flags = self.effects.shader_flags();
        let mut textures = vec![(FRAME_UNIT, frame_binding)];
        match blend_from {
            Some(previous) => textures.push((PREVIOUS_UNIT, TextureBinding::Owned(previous.texture))),
            None => flags &= !BLEND_FLAG,
        }

        let (width, height) = self.viewport;
        let uniforms = [
            ("u_transform", Uniform::Mat4(frame.transform)),
            ("u_frame", Uniform::Int(FRAME_UNIT as i32)),
            ("u_previous", Uniform::Int(PREVIOUS_UNIT as i32)),
            ("u_texel", Uniform::Vec2([1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32])),
            ("u_sharpen", Uniform::Float(self.effects.sharpen())),
            ("u_tone", Uniform::Float(self.effects.tone())),
            ("u_blend_mix", Uniform::Float(self.effects.blend_mix_factor())),
            ("u_flags", Uniform::Int(flags)),
        ];

        self.device.draw(&DrawPass {
            program: effects_program,
            quad,
            target: None,
            viewport: self.viewport,
            textures: &textures,
            uniforms: &uniforms,
        })?;
        self.device.present()?;

        if self.effects.blend_enabled() {
            if let Some(previous) = self.frames.previous {
                self.device.draw(&DrawPass {
                    program: copy_program,
                    quad,
                    target: Some(previous),
                    viewport: (previous.width, previous.height),
                    textures: &[(FRAME_UNIT, frame_binding)],
                    uniforms: &[
                        ("u_transform", Uniform::Mat4(frame.transform)),
                        ("u_frame", Uniform::Int(FRAME_UNIT as i32)),
                    ],
                })?;
                self.frames.has_previous = true;
            }
        }

        Ok(true)
    }

    /// Recreate the previous-frame target at the new size. No previous frame
    /// exists afterwards.
    pub fn resize(&mut self, width: u32, height: u32) -> PlayerResult<()> {
        if self.released {
            return Err(PlayerError::Gpu("Compositor already torn down".to_string()));
        }
        if let Some(old) = self.frames.take_previous() {
            self.device.delete_render_target(old);
        }
        self.viewport = (width, height);
        let target = self.device.create_render_target(width, height)?;
        self.frames.replace_previous(target);
        debug!("Compositor resized to {}x{}", width, height);
        Ok(())
    }

    /// Release every GPU resource and the output surface. Idempotent.
    pub fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(program) = self.effects_program.take() {
            self.device.delete_program(program);
        }
        if let Some(program) = self.copy_program.take() {
            self.device.delete_program(program);
        }
        if let Some(quad) = self.quad.take() {
            self.device.delete_quad(quad);
        }
        if let Some(target) = self.frames.take_previous() {
            self.device.delete_render_target(target);
        }
        self.frames.current = None;
        self.source.release();
        self.device.release_output();
        debug!("Compositor torn down");
    }
}

impl<D: GpuDevice> Drop for Compositor<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
