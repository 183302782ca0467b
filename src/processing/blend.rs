//! Blend modes and source-over compositing on straight (non-premultiplied)
//! RGBA8 pixels, following the W3C compositing formulas.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    pub const ALL: [BlendMode; 16] = [
        BlendMode::Normal,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::ColorDodge,
        BlendMode::ColorBurn,
        BlendMode::HardLight,
        BlendMode::SoftLight,
        BlendMode::Difference,
        BlendMode::Exclusion,
        BlendMode::Hue,
        BlendMode::Saturation,
        BlendMode::Color,
        BlendMode::Luminosity,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Luminosity => "Luminosity",
        }
    }

    /// Mixes backdrop `cb` with source `cs`, both in `[0, 1]`.
    pub fn mix(self, cb: [f32; 3], cs: [f32; 3]) -> [f32; 3] {
        match self {
            BlendMode::Normal => cs,
            BlendMode::Multiply => per_channel(cb, cs, |b, s| b * s),
            BlendMode::Screen => per_channel(cb, cs, screen),
            BlendMode::Overlay => per_channel(cb, cs, |b, s| hard_light(s, b)),
            BlendMode::Darken => per_channel(cb, cs, f32::min),
            BlendMode::Lighten => per_channel(cb, cs, f32::max),
            BlendMode::ColorDodge => per_channel(cb, cs, color_dodge),
            BlendMode::ColorBurn => per_channel(cb, cs, color_burn),
            BlendMode::HardLight => per_channel(cb, cs, hard_light),
            BlendMode::SoftLight => per_channel(cb, cs, soft_light),
            BlendMode::Difference => per_channel(cb, cs, |b, s| (b - s).abs()),
            BlendMode::Exclusion => per_channel(cb, cs, |b, s| b + s - 2.0 * b * s),
            BlendMode::Hue => set_lum(set_sat(cs, sat(cb)), lum(cb)),
            BlendMode::Saturation => set_lum(set_sat(cb, sat(cs)), lum(cb)),
            BlendMode::Color => set_lum(cs, lum(cb)),
            BlendMode::Luminosity => set_lum(cb, lum(cs)),
        }
    }
}

fn per_channel(cb: [f32; 3], cs: [f32; 3], f: impl Fn(f32, f32) -> f32) -> [f32; 3] {
    [f(cb[0], cs[0]), f(cb[1], cs[1]), f(cb[2], cs[2])]
}

fn screen(b: f32, s: f32) -> f32 {
    b + s - b * s
}

fn hard_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        b * 2.0 * s
    } else {
        screen(b, 2.0 * s - 1.0)
    }
}

fn color_dodge(b: f32, s: f32) -> f32 {
    if b == 0.0 {
        0.0
    } else if s >= 1.0 {
        1.0
    } else {
        (b / (1.0 - s)).min(1.0)
    }
}

fn color_burn(b: f32, s: f32) -> f32 {
    if b >= 1.0 {
        1.0
    } else if s <= 0.0 {
        0.0
    } else {
        1.0 - ((1.0 - b) / s).min(1.0)
    }
}

fn soft_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        b - (1.0 - 2.0 * s) * b * (1.0 - b)
    } else {
        let d = if b <= 0.25 {
            ((16.0 * b - 12.0) * b + 4.0) * b
        } else {
            b.sqrt()
        };
        b + (2.0 * s - 1.0) * (d - b)
    }
}

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 && l - n > f32::EPSILON {
        out = out.map(|v| l + (v - l) * l / (l - n));
    }
    if x > 1.0 && x - l > f32::EPSILON {
        out = out.map(|v| l + (v - l) * (1.0 - l) / (x - l));
    }
    out
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color(c.map(|v| v + d))
}

fn sat(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_sat(c: [f32; 3], s: f32) -> [f32; 3] {
    let mut idx = [0usize, 1, 2];
    idx.sort_by(|a, b| c[*a].total_cmp(&c[*b]));
    let (min, mid, max) = (idx[0], idx[1], idx[2]);
    let mut out = [0.0; 3];
    if c[max] > c[min] {
        out[mid] = (c[mid] - c[min]) * s / (c[max] - c[min]);
        out[max] = s;
    }
    out
}

fn unit(v: u8) -> f32 {
    v as f32 / 255.0
}

fn byte(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Composites `top` over `base` with the given mode and opacity in `[0, 1]`.
pub fn blend_pixel(base: [u8; 4], top: [u8; 4], mode: BlendMode, opacity: f32) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    if top[3] == 0 || opacity == 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let ab = unit(base[3]);
    let as_ = unit(top[3]) * opacity;
    let cb = [unit(base[0]), unit(base[1]), unit(base[2])];
    let cs = [unit(top[0]), unit(top[1]), unit(top[2])];

    let mixed = mode.mix(cb, cs);
    let ao = as_ + ab * (1.0 - as_);
    if ao <= 0.0 {
        return [0, 0, 0, 0];
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let src = (1.0 - ab) * cs[i] + ab * mixed[i].clamp(0.0, 1.0);
        out[i] = byte((as_ * src + ab * cb[i] * (1.0 - as_)) / ao);
    }
    out[3] = byte(ao);
    out
}

/// Blends an adjustment result over the pixel it was derived from.
///
/// Both pixels describe the same content, so instead of stacking alpha the
/// color and alpha are interpolated by `opacity`.
pub fn mix_adjusted(base: [u8; 4], adjusted: [u8; 4], mode: BlendMode, opacity: f32) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity == 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 {
        return adjusted;
    }

    let cb = [unit(base[0]), unit(base[1]), unit(base[2])];
    let cs = [unit(adjusted[0]), unit(adjusted[1]), unit(adjusted[2])];
    let mixed = mode.mix(cb, cs);

    let mut out = [0u8; 4];
    for i in 0..3 {
        out[i] = byte(cb[i] + (mixed[i].clamp(0.0, 1.0) - cb[i]) * opacity);
    }
    let ab = unit(base[3]);
    out[3] = byte(ab + (unit(adjusted[3]) - ab) * opacity);
    out
}

/// Linear blend of two pixels by a mask weight, 0 = `original`, 255 = `filtered`.
#[inline]
pub fn lerp_masked(original: [u8; 4], filtered: [u8; 4], weight: u8) -> [u8; 4] {
    match weight {
        0 => original,
        255 => filtered,
        w => {
            let w = w as u32;
            let mut out = [0u8; 4];
            for i in 0..4 {
                let v = original[i] as u32 * (255 - w) + filtered[i] as u32 * w;
                out[i] = ((v + 127) / 255) as u8;
            }
            out
        }
    }
}
