// GLSL ES 3.00 sources for the compositor passes.
// Both programs share one vertex stage; the frame sampler type depends on
// where decoded frames come from.

/// How the decoded frame texture must be sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTextureKind {
    /// `GL_TEXTURE_EXTERNAL_OES`, fed by a platform surface texture
    External,
    /// Plain `GL_TEXTURE_2D`, e.g. an engine-rendered FBO texture
    Texture2D,
}

pub const VERTEX: &str = r#"#version 300 es
layout(location = 0) in vec2 a_pos;
layout(location = 1) in vec2 a_texcoord;

uniform mat4 u_transform;

out vec2 v_texcoord;
out vec2 v_screen;

void main() {
    gl_Position = vec4(a_pos, 0.0, 1.0);
    v_texcoord = (u_transform * vec4(a_texcoord, 0.0, 1.0)).xy;
    v_screen = a_texcoord;
}
"#;

const HEADER_EXTERNAL: &str = r#"#version 300 es
#extension GL_OES_EGL_image_external_essl3 : require
precision highp float;
uniform samplerExternalOES u_frame;
"#;

const HEADER_2D: &str = r#"#version 300 es
precision highp float;
uniform sampler2D u_frame;
"#;

const EFFECTS_BODY: &str = r#"
uniform sampler2D u_previous;
uniform vec2 u_texel;
uniform float u_sharpen;
uniform float u_tone;
uniform float u_blend_mix;
uniform int u_flags;

in vec2 v_texcoord;
in vec2 v_screen;
out vec4 frag_color;

const vec3 LUMA = vec3(0.2126, 0.7152, 0.0722);

void main() {
    vec3 center = texture(u_frame, v_texcoord).rgb;
    vec3 color = center;

    if ((u_flags & 4) != 0) {
        vec3 previous = texture(u_previous, v_screen).rgb;
        color = mix(color, previous, u_blend_mix);
    }

    if ((u_flags & 1) != 0) {
        vec3 n = texture(u_frame, v_texcoord + vec2(0.0, u_texel.y)).rgb;
        vec3 s = texture(u_frame, v_texcoord - vec2(0.0, u_texel.y)).rgb;
        vec3 e = texture(u_frame, v_texcoord + vec2(u_texel.x, 0.0)).rgb;
        vec3 w = texture(u_frame, v_texcoord - vec2(u_texel.x, 0.0)).rgb;
        vec3 edge = -4.0 * center + n + s + e + w;
        color -= edge * u_sharpen * 0.3;
    }

    if ((u_flags & 2) != 0) {
        color = pow(max(color, vec3(0.0)), vec3(0.9)) * u_tone;
        color = color / (1.0 + color);
        float l = dot(color, LUMA);
        color = mix(vec3(l), color, 1.15);
    }

    frag_color = vec4(clamp(color, 0.0, 1.0), 1.0);
}
"#;

const COPY_BODY: &str = r#"
in vec2 v_texcoord;
in vec2 v_screen;
out vec4 frag_color;

void main() {
    frag_color = vec4(texture(u_frame, v_texcoord).rgb, 1.0);
}
"#;

fn header(kind: FrameTextureKind) -> &'static str {
    match kind {
        FrameTextureKind::External => HEADER_EXTERNAL,
        FrameTextureKind::Texture2D => HEADER_2D,
    }
}

/// Single pass applying blend, sharpen and tone boost in that order
pub fn effects_fragment(kind: FrameTextureKind) -> String {
    format!("{}{}", header(kind), EFFECTS_BODY)
}

/// Pass-through copy of the current frame into the previous-frame target
pub fn copy_fragment(kind: FrameTextureKind) -> String {
    format!("{}{}", header(kind), COPY_BODY)
}
