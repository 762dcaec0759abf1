//! Effect parameters and a CPU reference of the effects shader.

use serde::{Deserialize, Serialize};

use crate::config::EffectsConfig;

pub const SHARPEN_RANGE: (f32, f32) = (0.0, 1.0);
pub const TONE_RANGE: (f32, f32) = (1.0, 2.0);
pub const BLEND_RANGE: (f32, f32) = (0.0, 1.0);

/// Weight of the previous frame at full blend strength
pub const BLEND_MIX_SCALE: f32 = 0.5;
/// Unsharp mask gain applied to the Laplacian
pub const SHARPEN_GAIN: f32 = 0.3;
pub const TONE_GAMMA: f32 = 0.9;
/// How much further from luma the tone boost pushes saturation
pub const TONE_SATURATION: f32 = 1.15;

const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

fn clamp_strength(value: f32, (lo, hi): (f32, f32)) -> f32 {
    if value.is_nan() { lo } else { value.clamp(lo, hi) }
}

/// Toggle and strength for sharpen, tone boost and frame blending.
///
/// Setters clamp silently. Changing a value has no effect beyond the next
/// redraw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectParameters {
    sharpen_enabled: bool,
    sharpen: f32,
    tone_enabled: bool,
    tone: f32,
    blend_enabled: bool,
    blend: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self::from(&EffectsConfig::default())
    }
}

impl From<&EffectsConfig> for EffectParameters {
    fn from(config: &EffectsConfig) -> Self {
        let mut params = Self {
            sharpen_enabled: config.sharpen_enabled,
            sharpen: 0.0,
            tone_enabled: config.tone_boost_enabled,
            tone: 1.0,
            blend_enabled: config.frame_blend_enabled,
            blend: 0.0,
        };
        params.set_sharpen(config.sharpen_strength);
        params.set_tone(config.tone_boost_strength);
        params.set_blend(config.frame_blend_strength);
        params
    }
}

impl EffectParameters {
    pub fn set_sharpen(&mut self, strength: f32) {
        self.sharpen = clamp_strength(strength, SHARPEN_RANGE);
    }

    pub fn set_tone(&mut self, strength: f32) {
        self.tone = clamp_strength(strength, TONE_RANGE);
    }

    pub fn set_blend(&mut self, strength: f32) {
        self.blend = clamp_strength(strength, BLEND_RANGE);
    }

    pub fn set_sharpen_enabled(&mut self, enabled: bool) {
        self.sharpen_enabled = enabled;
    }

    pub fn set_tone_enabled(&mut self, enabled: bool) {
        self.tone_enabled = enabled;
    }

    pub fn set_blend_enabled(&mut self, enabled: bool) {
        self.blend_enabled = enabled;
    }

    pub fn sharpen(&self) -> f32 {
        self.sharpen
    }

    pub fn tone(&self) -> f32 {
        self.tone
    }

    pub fn blend(&self) -> f32 {
        self.blend
    }

    pub fn sharpen_enabled(&self) -> bool {
        self.sharpen_enabled
    }

    pub fn tone_enabled(&self) -> bool {
        self.tone_enabled
    }

    pub fn blend_enabled(&self) -> bool {
        self.blend_enabled
    }

    /// Weight given to the previous frame. Never exceeds 0.5.
    pub fn blend_mix_factor(&self) -> f32 {
        if self.blend_enabled {
            self.blend * BLEND_MIX_SCALE
        } else {
            0.0
        }
    }

    /// Bit set read by the effects shader (`u_flags`)
    pub fn shader_flags(&self) -> i32 {
        (self.sharpen_enabled as i32) | ((self.tone_enabled as i32) << 1) | ((self.blend_enabled as i32) << 2)
    }
}

pub type Rgb = [f32; 3];

/// Samples around one pixel of the current frame
#[derive(Debug, Clone, Copy)]
pub struct Neighbourhood {
    pub center: Rgb,
    pub north: Rgb,
    pub south: Rgb,
    pub east: Rgb,
    pub west: Rgb,
}

impl Neighbourhood {
    pub fn flat(color: Rgb) -> Self {
        Self {
            center: color,
            north: color,
            south: color,
            east: color,
            west: color,
        }
    }
}

fn map3(c: Rgb, f: impl Fn(f32) -> f32) -> Rgb {
    [f(c[0]), f(c[1]), f(c[2])]
}

fn mix3(a: Rgb, b: Rgb, t: f32) -> Rgb {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t, a[2] + (b[2] - a[2]) * t]
}

pub fn luma(c: Rgb) -> f32 {
    c[0] * LUMA[0] + c[1] * LUMA[1] + c[2] * LUMA[2]
}

/// CPU mirror of the effects fragment shader for one pixel.
///
/// `previous` is the previous-frame sample, `None` when no previous frame
/// exists yet (first frame, or right after a resize).
pub fn shade(pixel: &Neighbourhood, previous: Option<Rgb>, params: &EffectParameters) -> Rgb {
    let mut color = pixel.center;

    if let Some(previous) = previous.filter(|_| params.blend_enabled) {
        color = mix3(color, previous, params.blend_mix_factor());
    }

    if params.sharpen_enabled {
        let n = pixel;
        for i in 0..3 {
            let edge = -4.0 * n.center[i] + n.north[i] + n.south[i] + n.east[i] + n.west[i];
            color[i] -= edge * params.sharpen * SHARPEN_GAIN;
        }
    }

    if params.tone_enabled {
        color = map3(color, |x| x.max(0.0).powf(TONE_GAMMA) * params.tone);
        color = map3(color, |x| x / (1.0 + x));
        let l = luma(color);
        color = mix3([l, l, l], color, TONE_SATURATION);
    }

    map3(color, |x| x.clamp(0.0, 1.0))
}
