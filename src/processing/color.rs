use crate::state::ResolvedFilters;

type Matrix = [[f32; 3]; 3];

/// Per-pixel color stages, precomputed once per pipeline run.
///
/// Stage order: brightness, contrast, saturation, sepia, grayscale, invert,
/// hue-rotate. Neutral stages are dropped entirely so they cannot introduce
/// rounding drift.
pub struct ColorStages {
    brightness: Option<f32>,
    contrast: Option<f32>,
    saturation: Option<Matrix>,
    sepia: Option<Matrix>,
    grayscale: Option<Matrix>,
    invert: Option<f32>,
    hue_rotate: Option<Matrix>,
}

impl ColorStages {
    pub fn new(f: &ResolvedFilters<'_>) -> Self {
        Self {
            brightness: (f.brightness != 1.0).then_some(f.brightness),
            contrast: (f.contrast != 1.0).then_some(f.contrast),
            saturation: (f.saturation != 1.0).then(|| saturate_matrix(f.saturation)),
            sepia: (f.sepia != 0.0).then(|| sepia_matrix(f.sepia)),
            grayscale: (f.grayscale != 0.0).then(|| grayscale_matrix(f.grayscale)),
            invert: (f.invert != 0.0).then_some(f.invert),
            hue_rotate: (f.hue_rotate != 0.0).then(|| hue_rotate_matrix(f.hue_rotate)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.brightness.is_none()
            && self.contrast.is_none()
            && self.saturation.is_none()
            && self.sepia.is_none()
            && self.grayscale.is_none()
            && self.invert.is_none()
            && self.hue_rotate.is_none()
    }

    /// Runs every active stage on one RGB pixel, leaving alpha to the caller.
    pub fn apply(&self, px: &mut [u8]) {
        let mut c = [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
        ];

        if let Some(b) = self.brightness {
            c = c.map(|v| (v * b).clamp(0.0, 1.0));
        }
        if let Some(k) = self.contrast {
            c = c.map(|v| ((v - 0.5) * k + 0.5).clamp(0.0, 1.0));
        }
        if let Some(m) = &self.saturation {
            c = mul(m, c);
        }
        if let Some(m) = &self.sepia {
            c = mul(m, c);
        }
        if let Some(m) = &self.grayscale {
            c = mul(m, c);
        }
        if let Some(a) = self.invert {
            c = c.map(|v| (v * (1.0 - a) + (1.0 - v) * a).clamp(0.0, 1.0));
        }
        if let Some(m) = &self.hue_rotate {
            c = mul(m, c);
        }

        px[0] = (c[0] * 255.0).round() as u8;
        px[1] = (c[1] * 255.0).round() as u8;
        px[2] = (c[2] * 255.0).round() as u8;
    }
}

fn mul(m: &Matrix, c: [f32; 3]) -> [f32; 3] {
    let mut out = [0.0; 3];
    for (row, o) in m.iter().zip(out.iter_mut()) {
        *o = (row[0] * c[0] + row[1] * c[1] + row[2] * c[2]).clamp(0.0, 1.0);
    }
    out
}

fn saturate_matrix(s: f32) -> Matrix {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

fn sepia_matrix(amount: f32) -> Matrix {
    let k = 1.0 - amount;
    [
        [0.393 + 0.607 * k, 0.769 - 0.769 * k, 0.189 - 0.189 * k],
        [0.349 - 0.349 * k, 0.686 + 0.314 * k, 0.168 - 0.168 * k],
        [0.272 - 0.272 * k, 0.534 - 0.534 * k, 0.131 + 0.869 * k],
    ]
}

fn grayscale_matrix(amount: f32) -> Matrix {
    let k = 1.0 - amount;
    [
        [0.2126 + 0.7874 * k, 0.7152 - 0.7152 * k, 0.0722 - 0.0722 * k],
        [0.2126 - 0.2126 * k, 0.7152 + 0.2848 * k, 0.0722 - 0.0722 * k],
        [0.2126 - 0.2126 * k, 0.7152 - 0.7152 * k, 0.0722 + 0.9278 * k],
    ]
}

fn hue_rotate_matrix(degrees: f32) -> Matrix {
    let (sin, cos) = degrees.to_radians().sin_cos();
    [
        [
            0.213 + cos * 0.787 - sin * 0.213,
            0.715 - cos * 0.715 - sin * 0.715,
            0.072 - cos * 0.072 + sin * 0.928,
        ],
        [
            0.213 - cos * 0.213 + sin * 0.143,
            0.715 + cos * 0.285 + sin * 0.140,
            0.072 - cos * 0.072 - sin * 0.283,
        ],
        [
            0.213 - cos * 0.213 - sin * 0.787,
            0.715 - cos * 0.715 + sin * 0.715,
            0.072 + cos * 0.928 + sin * 0.072,
        ],
    ]
}
