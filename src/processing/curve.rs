//! Tone curve: a cubic Bézier from (0,1) to (1,0) in curve space, resampled
//! into a 256-level lookup table.
//!
//! Curve space has y pointing down (1 = darkest output). The Bézier is
//! parametrized by `t`, not by `x`, so the table is built by dense sampling
//! followed by linear interpolation between the samples bracketing each level.

use serde::{Deserialize, Serialize};

/// Number of parametric steps taken along the curve. The LUT is only as
/// accurate as this sampling; keep it at or above 1000.
pub const CURVE_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Normalized control point in curve space, both axes in `[0, 1]`.
pub struct CurvePoint {
    pub x: f32,
    pub y: f32,
}

impl CurvePoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn clamped(self) -> Self {
        Self {
            x: clamp_unit(self.x),
            y: clamp_unit(self.y),
        }
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.5 }
}

/// Control points that produce a straight identity curve.
pub const IDENTITY_POINTS: [CurvePoint; 2] = [CurvePoint::new(0.5, 0.5), CurvePoint::new(0.5, 0.5)];

/// Builds the 256-entry table for the curve with interior points `p1`, `p2`.
///
/// Levels covered by several sample pairs (non-monotonic `x`) take the value
/// from the pair with the highest sample index.
pub fn build_lut(p1: CurvePoint, p2: CurvePoint) -> [u8; 256] {
    let samples = sample_brightness_space(p1.clamped(), p2.clamped());

    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = i as u8;
    }

    for pair in samples.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let lo = a.0.min(b.0);
        let hi = a.0.max(b.0);
        let first = lo.ceil().max(0.0) as i32;
        let last = hi.floor().min(255.0) as i32;
        for level in first..=last {
            let x = level as f64;
            let y = if (b.0 - a.0).abs() < f64::EPSILON {
                b.1
            } else {
                a.1 + (b.1 - a.1) * (x - a.0) / (b.0 - a.0)
            };
            lut[level as usize] = y.round().clamp(0.0, 255.0) as u8;
        }
    }
    lut
}

/// Samples the curve and maps each point to `(input, output)` levels in `[0, 255]`.
fn sample_brightness_space(p1: CurvePoint, p2: CurvePoint) -> Vec<(f64, f64)> {
    let p0 = (0.0_f64, 1.0_f64);
    let p3 = (1.0_f64, 0.0_f64);
    let c1 = (p1.x as f64, p1.y as f64);
    let c2 = (p2.x as f64, p2.y as f64);

    (0..=CURVE_SAMPLES)
        .map(|i| {
            let t = i as f64 / CURVE_SAMPLES as f64;
            let mt = 1.0 - t;
            let w0 = mt * mt * mt;
            let w1 = 3.0 * mt * mt * t;
            let w2 = 3.0 * mt * t * t;
            let w3 = t * t * t;
            let x = w0 * p0.0 + w1 * c1.0 + w2 * c2.0 + w3 * p3.0;
            let y = w0 * p0.1 + w1 * c1.1 + w2 * c2.1 + w3 * p3.1;
            (x * 255.0, (1.0 - y) * 255.0)
        })
        .collect()
}
