use image::{GrayImage, Luma, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, ensure_dimensions};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }
}

#[derive(Debug, Clone)]
/// Single-channel paint surface marking where a local edit applies.
///
/// Strokes only ever add coverage: each sample keeps the maximum of what was
/// there and what the brush deposits.
pub struct MaskSurface {
    alpha: GrayImage,
    brush_radius: f32,
    last_point: Option<Point>,
}

impl MaskSurface {
    pub fn new(width: u32, height: u32, brush_radius: f32) -> Self {
        Self {
            alpha: GrayImage::new(width, height),
            brush_radius: brush_radius.max(0.5),
            last_point: None,
        }
    }

    /// Uses the alpha channel of an RGBA image as the mask.
    pub fn from_rgba(img: &RgbaImage, brush_radius: f32) -> Self {
        let mut mask = Self::new(img.width(), img.height(), brush_radius);
        for (dst, src) in mask.alpha.pixels_mut().zip(img.pixels()) {
            dst[0] = src[3];
        }
        mask
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.alpha.dimensions()
    }

    pub fn alpha(&self) -> &GrayImage {
        &self.alpha
    }

    pub fn brush_radius(&self) -> f32 {
        self.brush_radius
    }

    pub fn set_brush_radius(&mut self, radius: f32) {
        if radius.is_finite() {
            self.brush_radius = radius.max(0.5);
        }
    }

    /// `true` iff no sample has been painted.
    pub fn is_empty(&self) -> bool {
        self.alpha.as_raw().iter().all(|v| *v == 0)
    }

    /// The painted mask, or `None` when nothing is painted.
    pub fn selection(&self) -> Option<&GrayImage> {
        (!self.is_empty()).then_some(&self.alpha)
    }

    /// Like [`selection`](Self::selection), but an empty mask is an error.
    pub fn require_selection(&self) -> Result<&GrayImage> {
        self.selection().ok_or(EngineError::EmptyMaskOperation)
    }

    pub fn ensure_matches(&self, dimensions: (u32, u32)) -> Result<()> {
        ensure_dimensions(dimensions, self.dimensions())
    }

    pub fn clear(&mut self) {
        let (w, h) = self.dimensions();
        self.alpha = GrayImage::new(w, h);
        self.last_point = None;
    }

    /// Replaces the surface with a blank one of a new size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.alpha = GrayImage::new(width, height);
        self.last_point = None;
    }

    pub fn start_stroke(&mut self, point: Point) {
        self.stamp_segment(point, point);
        self.last_point = Some(point);
    }

    pub fn continue_stroke(&mut self, point: Point) {
        let from = self.last_point.unwrap_or(point);
        self.stamp_segment(from, point);
        self.last_point = Some(point);
    }

    pub fn end_stroke(&mut self) {
        self.last_point = None;
    }

    pub fn is_stroking(&self) -> bool {
        self.last_point.is_some()
    }

    /// White RGB with the mask as alpha, the shape generative services expect.
    pub fn to_rgba(&self) -> RgbaImage {
        let (w, h) = self.dimensions();
        RgbaImage::from_fn(w, h, |x, y| Rgba([255, 255, 255, self.alpha.get_pixel(x, y)[0]]))
    }

    /// Fills the capsule around segment `a`→`b` with an antialiased edge.
    fn stamp_segment(&mut self, a: Point, b: Point) {
        let (w, h) = self.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let r = self.brush_radius;
        let reach = r + 1.0;
        let x0 = (a.x.min(b.x) - reach).floor().max(0.0) as u32;
        let y0 = (a.y.min(b.y) - reach).floor().max(0.0) as u32;
        let x1 = ((a.x.max(b.x) + reach).ceil().max(0.0) as u32).min(w);
        let y1 = ((a.y.max(b.y) + reach).ceil().max(0.0) as u32).min(h);

        for y in y0..y1 {
            for x in x0..x1 {
                let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                let coverage = (r + 0.5 - distance_to_segment(center, a, b)).clamp(0.0, 1.0);
                if coverage <= 0.0 {
                    continue;
                }
                let value = (coverage * 255.0).round() as u8;
                let px = self.alpha.get_pixel_mut(x, y);
                if value > px[0] {
                    *px = Luma([value]);
                }
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(Point::new(a.x + t * dx, a.y + t * dy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_mask_is_empty_selection() {
        let mask = MaskSurface::new(8, 8, 2.0);
        assert!(mask.is_empty());
        assert!(mask.selection().is_none());
        assert!(matches!(
            mask.require_selection(),
            Err(EngineError::EmptyMaskOperation)
        ));
    }

    #[test]
    fn single_dab_paints_a_disc() {
        let mut mask = MaskSurface::new(20, 20, 3.0);
        mask.start_stroke(Point::new(10.0, 10.0));
        mask.end_stroke();
        assert_eq!(mask.alpha().get_pixel(10, 10)[0], 255);
        assert_eq!(mask.alpha().get_pixel(0, 0)[0], 0);
        assert!(!mask.is_empty());
    }

    #[test]
    fn stroke_has_no_gaps_between_samples() {
        let mut mask = MaskSurface::new(40, 10, 2.0);
        mask.start_stroke(Point::new(2.0, 5.0));
        mask.continue_stroke(Point::new(38.0, 5.0));
        mask.end_stroke();
        for x in 2..38 {
            assert_eq!(mask.alpha().get_pixel(x, 5)[0], 255, "gap at x={x}");
        }
    }

    #[test]
    fn edges_are_antialiased() {
        let mut mask = MaskSurface::new(20, 20, 4.0);
        mask.start_stroke(Point::new(10.0, 10.0));
        let partial = mask
            .alpha()
            .pixels()
            .any(|p| p[0] > 0 && p[0] < 255);
        assert!(partial);
    }

    #[test]
    fn strokes_never_erase() {
        let mut mask = MaskSurface::new(20, 20, 4.0);
        mask.start_stroke(Point::new(10.0, 10.0));
        mask.end_stroke();
        let before = mask.alpha().clone();
        mask.start_stroke(Point::new(13.0, 10.0));
        mask.end_stroke();
        for (a, b) in before.pixels().zip(mask.alpha().pixels()) {
            assert!(b[0] >= a[0]);
        }
    }

    #[test]
    fn clear_resets_to_transparent() {
        let mut mask = MaskSurface::new(10, 10, 2.0);
        mask.start_stroke(Point::new(5.0, 5.0));
        mask.clear();
        assert!(mask.is_empty());
        assert!(!mask.is_stroking());
    }

    #[test]
    fn strokes_off_canvas_are_clipped() {
        let mut mask = MaskSurface::new(4, 4, 2.0);
        mask.start_stroke(Point::new(-10.0, -10.0));
        mask.continue_stroke(Point::new(50.0, 50.0));
        assert_eq!(mask.alpha().get_pixel(2, 2)[0], 255);
    }

    #[test]
    fn rgba_round_trip_uses_alpha_channel() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(1, 0, Rgba([0, 0, 0, 77]));
        let mask = MaskSurface::from_rgba(&img, 1.0);
        assert_eq!(mask.alpha().get_pixel(1, 0)[0], 77);
        assert_eq!(mask.to_rgba().get_pixel(1, 0).0, [255, 255, 255, 77]);
    }
}
