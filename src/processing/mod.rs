pub mod blend;
pub mod blur;
pub mod color;
pub mod curve;

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

use crate::error::{Result, ensure_dimensions};
use crate::state::{FilterParameters, ResolvedFilters, ToneLut};

use self::color::ColorStages;

/// Runs the full filter pipeline and returns a freshly allocated buffer.
///
/// Order: brightness → contrast → saturation → sepia → grayscale → invert →
/// hue-rotate → blur → tone curve. With neutral parameters the output is a
/// byte-exact copy of the input.
pub fn apply_filters(pixels: &RgbaImage, params: &FilterParameters) -> RgbaImage {
    apply_resolved(pixels, &params.resolve())
}

pub fn apply_resolved(pixels: &RgbaImage, filters: &ResolvedFilters<'_>) -> RgbaImage {
    let mut out = pixels.clone();
    if filters.is_neutral() || out.width() == 0 || out.height() == 0 {
        return out;
    }

    let stages = ColorStages::new(filters);
    let row_len = out.width() as usize * 4;
    if !stages.is_empty() {
        out.par_chunks_mut(row_len).for_each(|row| {
            for px in row.chunks_exact_mut(4) {
                stages.apply(px);
            }
        });
    }

    out = blur::apply(out, filters.blur);

    if let Some(lut) = filters.tone_curve {
        apply_lut(&mut out, lut);
    }
    out
}

/// Remaps R, G and B through `lut`; alpha is untouched.
pub fn apply_lut(img: &mut RgbaImage, lut: &ToneLut) {
    if img.width() == 0 {
        return;
    }
    let row_len = img.width() as usize * 4;
    img.par_chunks_mut(row_len).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            px[0] = lut.lookup(px[0]);
            px[1] = lut.lookup(px[1]);
            px[2] = lut.lookup(px[2]);
        }
    });
}

/// Filters the whole buffer, then blends original and filtered per pixel with
/// the mask value as weight (0 keeps the original, 255 takes the filtered).
pub fn apply_filters_masked(
    pixels: &RgbaImage,
    mask: &GrayImage,
    params: &FilterParameters,
) -> Result<RgbaImage> {
    ensure_dimensions(pixels.dimensions(), mask.dimensions())?;

    let filtered = apply_filters(pixels, params);
    let mut out = pixels.clone();
    if out.width() == 0 || out.height() == 0 {
        return Ok(out);
    }

    let width = out.width() as usize;
    let mask_raw = mask.as_raw();
    let filtered_raw = filtered.as_raw();
    out.par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let mask_row = &mask_raw[y * width..(y + 1) * width];
            let filtered_row = &filtered_raw[y * width * 4..(y + 1) * width * 4];
            for ((px, f), w) in row
                .chunks_exact_mut(4)
                .zip(filtered_row.chunks_exact(4))
                .zip(mask_row)
            {
                let mixed = blend::lerp_masked(
                    [px[0], px[1], px[2], px[3]],
                    [f[0], f[1], f[2], f[3]],
                    *w,
                );
                px.copy_from_slice(&mixed);
            }
        });
    Ok(out)
}
