use serde::{Deserialize, Serialize};

use crate::processing::curve::{self, CurvePoint};

pub const NEUTRAL_BRIGHTNESS: f32 = 100.0;
pub const NEUTRAL_CONTRAST: f32 = 100.0;
pub const NEUTRAL_SATURATION: f32 = 100.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
/// 256-entry brightness remapping table applied per color channel.
pub struct ToneLut(Box<[u8; 256]>);

impl ToneLut {
    pub fn new(table: [u8; 256]) -> Self {
        Self(Box::new(table))
    }

    pub fn identity() -> Self {
        let mut table = [0u8; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = i as u8;
        }
        Self::new(table)
    }

    /// Builds the table from the two interior Bézier control points.
    pub fn from_curve(p1: CurvePoint, p2: CurvePoint) -> Self {
        Self::new(curve::build_lut(p1, p2))
    }

    #[inline]
    pub fn lookup(&self, level: u8) -> u8 {
        self.0[level as usize]
    }

    pub fn as_array(&self) -> &[u8; 256] {
        &self.0
    }

    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, v)| *v as usize == i)
    }
}

impl TryFrom<Vec<u8>> for ToneLut {
    type Error = String;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let table: [u8; 256] = value
            .try_into()
            .map_err(|v: Vec<u8>| format!("tone LUT needs 256 entries, got {}", v.len()))?;
        Ok(Self::new(table))
    }
}

impl From<ToneLut> for Vec<u8> {
    fn from(value: ToneLut) -> Self {
        value.0.to_vec()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Sparse filter adjustments carried by a layer. Absent fields are no-ops.
///
/// Percentages follow the CSS filter conventions: brightness, contrast and
/// saturation are neutral at 100, sepia, grayscale and invert at 0.
pub struct FilterParameters {
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub hue_rotate: Option<f32>,
    pub sepia: Option<f32>,
    pub invert: Option<f32>,
    pub grayscale: Option<f32>,
    pub blur: Option<f32>,
    pub tone_curve: Option<ToneLut>,
}

impl FilterParameters {
    pub fn with_brightness(mut self, percent: f32) -> Self {
        self.brightness = Some(percent);
        self
    }

    pub fn with_contrast(mut self, percent: f32) -> Self {
        self.contrast = Some(percent);
        self
    }

    pub fn with_saturation(mut self, percent: f32) -> Self {
        self.saturation = Some(percent);
        self
    }

    pub fn with_hue_rotate(mut self, degrees: f32) -> Self {
        self.hue_rotate = Some(degrees);
        self
    }

    pub fn with_sepia(mut self, percent: f32) -> Self {
        self.sepia = Some(percent);
        self
    }

    pub fn with_invert(mut self, percent: f32) -> Self {
        self.invert = Some(percent);
        self
    }

    pub fn with_grayscale(mut self, percent: f32) -> Self {
        self.grayscale = Some(percent);
        self
    }

    pub fn with_blur(mut self, radius: f32) -> Self {
        self.blur = Some(radius);
        self
    }

    pub fn with_tone_curve(mut self, lut: ToneLut) -> Self {
        self.tone_curve = Some(lut);
        self
    }

    /// Returns a copy where every field set in `overrides` replaces ours.
    pub fn merged(&self, overrides: &FilterParameters) -> Self {
        Self {
            brightness: overrides.brightness.or(self.brightness),
            contrast: overrides.contrast.or(self.contrast),
            saturation: overrides.saturation.or(self.saturation),
            hue_rotate: overrides.hue_rotate.or(self.hue_rotate),
            sepia: overrides.sepia.or(self.sepia),
            invert: overrides.invert.or(self.invert),
            grayscale: overrides.grayscale.or(self.grayscale),
            blur: overrides.blur.or(self.blur),
            tone_curve: overrides
                .tone_curve
                .clone()
                .or_else(|| self.tone_curve.clone()),
        }
    }

    /// Fills absent fields with neutral values and clamps the rest.
    pub fn resolve(&self) -> ResolvedFilters<'_> {
        ResolvedFilters {
            brightness: finite_or(self.brightness, NEUTRAL_BRIGHTNESS).max(0.0) / 100.0,
            contrast: finite_or(self.contrast, NEUTRAL_CONTRAST).max(0.0) / 100.0,
            saturation: finite_or(self.saturation, NEUTRAL_SATURATION).max(0.0) / 100.0,
            hue_rotate: finite_or(self.hue_rotate, 0.0).rem_euclid(360.0),
            sepia: finite_or(self.sepia, 0.0).clamp(0.0, 100.0) / 100.0,
            invert: finite_or(self.invert, 0.0).clamp(0.0, 100.0) / 100.0,
            grayscale: finite_or(self.grayscale, 0.0).clamp(0.0, 100.0) / 100.0,
            blur: finite_or(self.blur, 0.0).max(0.0),
            tone_curve: self.tone_curve.as_ref().filter(|lut| !lut.is_identity()),
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.resolve().is_neutral()
    }
}

fn finite_or(value: Option<f32>, neutral: f32) -> f32 {
    value.filter(|v| v.is_finite()).unwrap_or(neutral)
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Dense filter values as consumed by the pipeline. Ratios, not percentages.
pub struct ResolvedFilters<'a> {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue_rotate: f32,
    pub sepia: f32,
    pub invert: f32,
    pub grayscale: f32,
    pub blur: f32,
    pub tone_curve: Option<&'a ToneLut>,
}

impl ResolvedFilters<'_> {
    pub fn has_color_ops(&self) -> bool {
        self.brightness != 1.0
            || self.contrast != 1.0
            || self.saturation != 1.0
            || self.sepia != 0.0
            || self.grayscale != 0.0
            || self.invert != 0.0
            || self.hue_rotate != 0.0
    }

    pub fn is_neutral(&self) -> bool {
        !self.has_color_ops() && self.blur == 0.0 && self.tone_curve.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parameters_are_neutral() {
        assert!(FilterParameters::default().is_neutral());
        assert!(
            FilterParameters::default()
                .with_brightness(100.0)
                .with_hue_rotate(360.0)
                .with_tone_curve(ToneLut::identity())
                .is_neutral()
        );
    }

    #[test]
    fn resolve_clamps_percentages() {
        let params = FilterParameters::default()
            .with_sepia(250.0)
            .with_brightness(-20.0)
            .with_blur(f32::NAN);
        let r = params.resolve();
        assert_eq!(r.sepia, 1.0);
        assert_eq!(r.brightness, 0.0);
        assert_eq!(r.blur, 0.0);
    }

    #[test]
    fn merged_prefers_overrides() {
        let base = FilterParameters::default()
            .with_brightness(120.0)
            .with_contrast(80.0);
        let over = FilterParameters::default().with_brightness(150.0);
        let merged = base.merged(&over);
        assert_eq!(merged.brightness, Some(150.0));
        assert_eq!(merged.contrast, Some(80.0));
    }

    #[test]
    fn tone_lut_serializes_as_plain_list() {
        let params = FilterParameters::default().with_tone_curve(ToneLut::identity());
        let json = serde_json::to_string(&params).unwrap();
        let back: FilterParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);

        let short: Result<FilterParameters, _> =
            serde_json::from_str(r#"{"tone_curve":[0,1,2]}"#);
        assert!(short.is_err());
    }
}
