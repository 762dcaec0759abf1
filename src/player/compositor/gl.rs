//! GPU device seam.
//!
//! The compositor talks to the GPU through [`GpuDevice`], which deals in
//! small integer handles. [`GlowDevice`] is the OpenGL ES implementation.

use glow::HasContext;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{trace, warn};

use super::shaders::FrameTextureKind;
use crate::player::error::{PlayerError, PlayerResult, ShaderStage};

const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuadId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Off-screen color target: FBO plus its texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub framebuffer: FramebufferId,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureBinding {
    /// Engine-owned frame texture, identified by its raw GL name
    Frame { name: u32, kind: FrameTextureKind },
    Owned(TextureId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Mat4([f32; 16]),
}

/// One fullscreen-quad draw
#[derive(Debug, Clone)]
pub struct DrawPass<'a> {
    pub program: ProgramId,
    pub quad: QuadId,
    /// `None` draws to the output surface
    pub target: Option<RenderTarget>,
    pub viewport: (u32, u32),
    pub textures: &'a [(u32, TextureBinding)],
    pub uniforms: &'a [(&'static str, Uniform)],
}

pub trait GpuDevice {
    /// Compile and link a program. Failures carry the stage and info log.
    fn compile_program(&mut self, vertex: &str, fragment: &str) -> PlayerResult<ProgramId>;
    fn delete_program(&mut self, program: ProgramId);

    fn create_quad(&mut self) -> PlayerResult<QuadId>;
    fn delete_quad(&mut self, quad: QuadId);

    fn create_render_target(&mut self, width: u32, height: u32) -> PlayerResult<RenderTarget>;
    fn delete_render_target(&mut self, target: RenderTarget);

    fn draw(&mut self, pass: &DrawPass<'_>) -> PlayerResult<()>;

    /// Show the output surface's back buffer
    fn present(&mut self) -> PlayerResult<()>;

    /// Release the output surface. Nothing may be drawn afterwards.
    fn release_output(&mut self);
}

/// Window-system side of the output surface (EGL surface, GL area, ...)
pub trait OutputSurface {
    fn swap_buffers(&mut self) -> PlayerResult<()>;
    fn release(&mut self);
}

pub struct GlowDevice<S: OutputSurface> {
    gl: Arc<glow::Context>,
    surface: Option<S>,
    next_id: u32,
    programs: HashMap<ProgramId, glow::Program>,
    quads: HashMap<QuadId, (glow::VertexArray, glow::Buffer)>,
    textures: HashMap<TextureId, glow::Texture>,
    framebuffers: HashMap<FramebufferId, glow::Framebuffer>,
}

impl<S: OutputSurface> GlowDevice<S> {
    /// The context must be current on the calling thread for the lifetime of the device
    pub fn new(gl: Arc<glow::Context>, surface: S) -> Self {
        Self {
            gl,
            surface: Some(surface),
            next_id: 1,
            programs: HashMap::new(),
            quads: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    unsafe fn compile_stage(&self, kind: u32, source: &str, stage: ShaderStage) -> PlayerResult<glow::Shader> {
        let gl = &self.gl;
        unsafe {
            let shader = gl
                .create_shader(kind)
                .map_err(|e| PlayerError::Gpu(format!("Failed to create {} shader: {}", stage, e)))?;
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                return Err(PlayerError::ShaderCompileFailure { stage, log });
            }
            Ok(shader)
        }
    }

    fn frame_texture(name: u32) -> PlayerResult<glow::Texture> {
        NonZeroU32::new(name)
            .map(glow::NativeTexture)
            .ok_or_else(|| PlayerError::Gpu("frame texture has no GL name".to_string()))
    }
}

impl<S: OutputSurface> GpuDevice for GlowDevice<S> {
    fn compile_program(&mut self, vertex: &str, fragment: &str) -> PlayerResult<ProgramId> {
        unsafe {
            let vs = self.compile_stage(glow::VERTEX_SHADER, vertex, ShaderStage::Vertex)?;
            let fs = match self.compile_stage(glow::FRAGMENT_SHADER, fragment, ShaderStage::Fragment) {
                Ok(fs) => fs,
                Err(e) => {
                    self.gl.delete_shader(vs);
                    return Err(e);
                }
            };

            let gl = &self.gl;
            let program = match gl.create_program() {
                Ok(program) => program,
                Err(e) => {
                    gl.delete_shader(vs);
                    gl.delete_shader(fs);
                    return Err(PlayerError::Gpu(format!("Failed to create program: {}", e)));
                }
            };
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.link_program(program);

            let linked = gl.get_program_link_status(program);
            let log = if linked { String::new() } else { gl.get_program_info_log(program) };
            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);

            if !linked {
                gl.delete_program(program);
                return Err(PlayerError::ShaderCompileFailure {
                    stage: ShaderStage::Link,
                    log,
                });
            }

            let id = ProgramId(self.next());
            self.programs.insert(id, program);
            trace!("Compiled shader program {:?}", id);
            Ok(id)
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(p) = self.programs.remove(&program) {
            unsafe { self.gl.delete_program(p) };
        }
    }

    fn create_quad(&mut self) -> PlayerResult<QuadId> {
        let gl = &self.gl;
        unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|e| PlayerError::Gpu(format!("Failed to create VAO: {}", e)))?;
            gl.bind_vertex_array(Some(vao));

            let vbo = match gl.create_buffer() {
                Ok(vbo) => vbo,
                Err(e) => {
                    gl.delete_vertex_array(vao);
                    return Err(PlayerError::Gpu(format!("Failed to create VBO: {}", e)));
                }
            };
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));

            #[rustfmt::skip]
            let vertices: [f32; 16] = [
                // pos      // tex
                -1.0, -1.0,  0.0, 0.0,
                 1.0, -1.0,  1.0, 0.0,
                 1.0,  1.0,  1.0, 1.0,
                -1.0,  1.0,  0.0, 1.0,
            ];
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&vertices), glow::STATIC_DRAW);

            let float = std::mem::size_of::<f32>() as i32;
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * float, 0);
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * float, 2 * float);
            gl.enable_vertex_attrib_array(1);

            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            let id = QuadId(self.next());
            self.quads.insert(id, (vao, vbo));
            Ok(id)
        }
    }

    fn delete_quad(&mut self, quad: QuadId) {
        if let Some((vao, vbo)) = self.quads.remove(&quad) {
            unsafe {
                self.gl.delete_vertex_array(vao);
                self.gl.delete_buffer(vbo);
            }
        }
    }

    fn create_render_target(&mut self, width: u32, height: u32) -> PlayerResult<RenderTarget> {
        let gl = &self.gl;
        unsafe {
            let texture = gl
                .create_texture()
                .map_err(|e| PlayerError::Gpu(format!("Failed to create texture: {}", e)))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );

            let fbo = match gl.create_framebuffer() {
                Ok(fbo) => fbo,
                Err(e) => {
                    gl.delete_texture(texture);
                    return Err(PlayerError::Gpu(format!("Failed to create FBO: {}", e)));
                }
            };
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
                return Err(PlayerError::Gpu(format!("Framebuffer incomplete: 0x{:x}", status)));
            }

            let texture_id = TextureId(self.next());
            let framebuffer_id = FramebufferId(self.next());
            self.textures.insert(texture_id, texture);
            self.framebuffers.insert(framebuffer_id, fbo);

            Ok(RenderTarget {
                framebuffer: framebuffer_id,
                texture: texture_id,
                width,
                height,
            })
        }
    }

    fn delete_render_target(&mut self, target: RenderTarget) {
        unsafe {
            if let Some(fbo) = self.framebuffers.remove(&target.framebuffer) {
                self.gl.delete_framebuffer(fbo);
            }
            if let Some(texture) = self.textures.remove(&target.texture) {
                self.gl.delete_texture(texture);
            }
        }
    }

    fn draw(&mut self, pass: &DrawPass<'_>) -> PlayerResult<()> {
        let program = *self
            .programs
            .get(&pass.program)
            .ok_or_else(|| PlayerError::Gpu(format!("Unknown program {:?}", pass.program)))?;
        let (vao, _) = *self
            .quads
            .get(&pass.quad)
            .ok_or_else(|| PlayerError::Gpu(format!("Unknown quad {:?}", pass.quad)))?;
        let fbo = match pass.target {
            Some(target) => Some(
                *self
                    .framebuffers
                    .get(&target.framebuffer)
                    .ok_or_else(|| PlayerError::Gpu("Unknown render target".to_string()))?,
            ),
            None => None,
        };

        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, fbo);
            gl.viewport(0, 0, pass.viewport.0 as i32, pass.viewport.1 as i32);
            gl.use_program(Some(program));

            for (unit, binding) in pass.textures {
                gl.active_texture(glow::TEXTURE0 + unit);
                match binding {
                    TextureBinding::Frame { name, kind } => {
                        let target = match kind {
                            FrameTextureKind::External => TEXTURE_EXTERNAL_OES,
                            FrameTextureKind::Texture2D => glow::TEXTURE_2D,
                        };
                        gl.bind_texture(target, Some(Self::frame_texture(*name)?));
                    }
                    TextureBinding::Owned(id) => {
                        let texture = self.textures.get(id).copied();
                        gl.bind_texture(glow::TEXTURE_2D, texture);
                    }
                }
            }

            for (name, value) in pass.uniforms {
                let location = gl.get_uniform_location(program, name);
                match value {
                    Uniform::Int(v) => gl.uniform_1_i32(location.as_ref(), *v),
                    Uniform::Float(v) => gl.uniform_1_f32(location.as_ref(), *v),
                    Uniform::Vec2([x, y]) => gl.uniform_2_f32(location.as_ref(), *x, *y),
                    Uniform::Mat4(m) => gl.uniform_matrix_4_f32_slice(location.as_ref(), false, m),
                }
            }

            gl.bind_vertex_array(Some(vao));
            gl.draw_arrays(glow::TRIANGLE_FAN, 0, 4);
            gl.bind_vertex_array(None);
            gl.use_program(None);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);

            let error = gl.get_error();
            if error != glow::NO_ERROR {
                return Err(PlayerError::Gpu(format!("Draw failed: GL error 0x{:x}", error)));
            }
        }
        Ok(())
    }

    fn present(&mut self) -> PlayerResult<()> {
        match self.surface.as_mut() {
            Some(surface) => surface.swap_buffers(),
            None => Err(PlayerError::Gpu("Output surface released".to_string())),
        }
    }

    fn release_output(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
    }
}

impl<S: OutputSurface> Drop for GlowDevice<S> {
    fn drop(&mut self) {
        let leaked = self.programs.len() + self.quads.len() + self.framebuffers.len();
        if leaked > 0 {
            warn!("GlowDevice dropped with {} live GL objects", leaked);
        }
        unsafe {
            for (_, program) in self.programs.drain() {
                self.gl.delete_program(program);
            }
            for (_, (vao, vbo)) in self.quads.drain() {
                self.gl.delete_vertex_array(vao);
                self.gl.delete_buffer(vbo);
            }
            for (_, fbo) in self.framebuffers.drain() {
                self.gl.delete_framebuffer(fbo);
            }
            for (_, texture) in self.textures.drain() {
                self.gl.delete_texture(texture);
            }
        }
        self.release_output();
    }
}
