use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::processing::{self, blend};
use crate::state::FilterParameters;

pub use crate::processing::blend::BlendMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
/// What a layer contributes: its own pixels, or only a filter over the layers beneath.
pub enum LayerContent {
    Image(Arc<RgbaImage>),
    Adjustment,
}

#[derive(Debug, Clone)]
/// One entry of the compositing stack. Pixel buffers are shared between
/// snapshots and replaced, never mutated in place.
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    opacity: u8,
    pub blend_mode: BlendMode,
    pub filters: FilterParameters,
    pub content: LayerContent,
}

impl Layer {
    pub fn image(id: LayerId, name: impl Into<String>, pixels: RgbaImage) -> Self {
        Self::image_shared(id, name, Arc::new(pixels))
    }

    pub fn image_shared(id: LayerId, name: impl Into<String>, pixels: Arc<RgbaImage>) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            opacity: 100,
            blend_mode: BlendMode::Normal,
            filters: FilterParameters::default(),
            content: LayerContent::Image(pixels),
        }
    }

    pub fn adjustment(id: LayerId, name: impl Into<String>, filters: FilterParameters) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            opacity: 100,
            blend_mode: BlendMode::Normal,
            filters,
            content: LayerContent::Adjustment,
        }
    }

    /// Opacity in percent, `0..=100`.
    pub fn opacity(&self) -> u8 {
        self.opacity
    }

    pub fn set_opacity(&mut self, percent: f32) {
        self.opacity = clamp_opacity(percent);
    }

    pub fn with_opacity(mut self, percent: f32) -> Self {
        self.set_opacity(percent);
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_filters(mut self, filters: FilterParameters) -> Self {
        self.filters = filters;
        self
    }

    pub fn pixels(&self) -> Option<&Arc<RgbaImage>> {
        match &self.content {
            LayerContent::Image(p) => Some(p),
            LayerContent::Adjustment => None,
        }
    }

    pub fn is_adjustment(&self) -> bool {
        matches!(self.content, LayerContent::Adjustment)
    }

    /// Own pixels with own filters applied. `None` for adjustment layers.
    pub fn rendered_pixels(&self) -> Option<RgbaImage> {
        let pixels = self.pixels()?;
        Some(processing::apply_filters(pixels, &self.filters))
    }

    fn contributes(&self) -> bool {
        self.visible && self.opacity > 0
    }
}

fn clamp_opacity(percent: f32) -> u8 {
    if percent.is_nan() {
        return 100;
    }
    percent.round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Default)]
/// Partial update applied by [`LayerStack::update_layer`]. Unset fields are kept.
pub struct LayerUpdate {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub opacity: Option<f32>,
    pub blend_mode: Option<BlendMode>,
    pub filters: Option<FilterParameters>,
    pub pixels: Option<Arc<RgbaImage>>,
}

impl LayerUpdate {
    fn apply(self, layer: &mut Layer) -> Result<()> {
        if let Some(pixels) = self.pixels {
            if layer.is_adjustment() {
                return Err(EngineError::invalid(format!(
                    "layer {} has no pixels to replace",
                    layer.id
                )));
            }
            layer.content = LayerContent::Image(pixels);
        }
        if let Some(name) = self.name {
            layer.name = name;
        }
        if let Some(visible) = self.visible {
            layer.visible = visible;
        }
        if let Some(opacity) = self.opacity {
            layer.set_opacity(opacity);
        }
        if let Some(mode) = self.blend_mode {
            layer.blend_mode = mode;
        }
        if let Some(filters) = self.filters {
            layer.filters = filters;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Ordered layers, index 0 at the bottom. Never empty; ids are unique.
///
/// Every mutation returns a new stack and leaves `self` untouched so the
/// caller can commit the result to history.
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn new(layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(EngineError::invalid("a layer stack needs at least one layer"));
        }
        for (i, layer) in layers.iter().enumerate() {
            if layers[..i].iter().any(|l| l.id == layer.id) {
                return Err(EngineError::invalid(format!("duplicate layer id {}", layer.id)));
            }
        }
        Ok(Self { layers })
    }

    pub fn single(layer: Layer) -> Self {
        Self {
            layers: vec![layer],
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Result<usize> {
        self.layers
            .iter()
            .position(|l| l.id == id)
            .ok_or(EngineError::InvalidLayerReference(id))
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.get(id).is_some()
    }

    pub fn top(&self) -> &Layer {
        &self.layers[self.layers.len() - 1]
    }

    pub fn max_id(&self) -> u64 {
        self.layers.iter().map(|l| l.id.0).max().unwrap_or(0)
    }

    /// Inserts `layer` directly above `above`, or on top when `above` is `None`.
    pub fn insert_above(&self, layer: Layer, above: Option<LayerId>) -> Result<Self> {
        if self.contains(layer.id) {
            return Err(EngineError::invalid(format!("duplicate layer id {}", layer.id)));
        }
        let index = match above {
            Some(id) => self.index_of(id)? + 1,
            None => self.layers.len(),
        };
        let mut layers = self.layers.clone();
        layers.insert(index, layer);
        Ok(Self { layers })
    }

    pub fn update_layer(&self, id: LayerId, update: LayerUpdate) -> Result<Self> {
        let index = self.index_of(id)?;
        let mut layers = self.layers.clone();
        update.apply(&mut layers[index])?;
        Ok(Self { layers })
    }

    pub fn toggle_visibility(&self, id: LayerId) -> Result<Self> {
        let index = self.index_of(id)?;
        let mut layers = self.layers.clone();
        layers[index].visible = !layers[index].visible;
        Ok(Self { layers })
    }

    pub fn delete_layer(&self, id: LayerId) -> Result<Self> {
        let index = self.index_of(id)?;
        if self.layers.len() == 1 {
            return Err(EngineError::LastLayerDeletion);
        }
        let mut layers = self.layers.clone();
        layers.remove(index);
        Ok(Self { layers })
    }

    /// Moves a layer one slot toward the top. Already on top is a no-op.
    pub fn move_up(&self, id: LayerId) -> Result<Self> {
        let index = self.index_of(id)?;
        self.reorder(index, index + 1)
    }

    /// Moves a layer one slot toward the bottom. Already at the bottom is a no-op.
    pub fn move_down(&self, id: LayerId) -> Result<Self> {
        let index = self.index_of(id)?;
        self.reorder(index, index.saturating_sub(1))
    }

    /// Swaps the layers at `from` and `to`; both indices clamp to the stack.
    /// Layers in between keep their places.
    pub fn reorder(&self, from: usize, to: usize) -> Result<Self> {
        let last = self.layers.len() - 1;
        let mut layers = self.layers.clone();
        layers.swap(from.min(last), to.min(last));
        Ok(Self { layers })
    }

    /// Bakes the layer into the image layer below it. The result keeps the
    /// lower layer's id, name and placement; both layers' filter state is
    /// flattened into the new pixels.
    pub fn merge_down(&self, id: LayerId) -> Result<Self> {
        let index = self.index_of(id)?;
        if index == 0 {
            return Err(EngineError::invalid("the bottom layer has nothing to merge into"));
        }
        let below = &self.layers[index - 1];
        let Some(below_pixels) = below.pixels() else {
            return Err(EngineError::invalid(format!(
                "cannot merge into adjustment layer {}",
                below.id
            )));
        };

        let merged_pixels = merge_pair(below, below_pixels, &self.layers[index]);

        let mut merged = below.clone();
        merged.filters = FilterParameters::default();
        merged.content = LayerContent::Image(Arc::new(merged_pixels));

        let mut layers = self.layers.clone();
        layers[index - 1] = merged;
        layers.remove(index);
        Ok(Self { layers })
    }
}

/// Flattens `upper` onto `lower` (drawn with `lower_pixels` as its source)
/// at the lower layer's resolution.
pub fn merge_pair(lower: &Layer, lower_pixels: &Arc<RgbaImage>, upper: &Layer) -> RgbaImage {
    let mut base = lower.clone();
    base.visible = true;
    base.set_opacity(100.0);
    base.blend_mode = BlendMode::Normal;
    base.content = LayerContent::Image(lower_pixels.clone());
    composite(&[base, upper.clone()], lower_pixels)
}

/// Composites `layers` bottom-to-top at the resolution of `frame`.
///
/// When the bottom layer is an image layer compositing starts from a
/// transparent backdrop; otherwise `frame` itself is the backdrop, so an
/// adjustment at the bottom still has something to filter. Invisible and
/// zero-opacity layers are skipped.
pub fn composite(layers: &[Layer], frame: &RgbaImage) -> RgbaImage {
    let (width, height) = frame.dimensions();
    let mut acc = match layers.first().map(|l| &l.content) {
        Some(LayerContent::Image(_)) => RgbaImage::new(width, height),
        _ => frame.clone(),
    };
    if width == 0 || height == 0 {
        return acc;
    }

    for layer in layers.iter().filter(|l| l.contributes()) {
        let opacity = layer.opacity as f32 / 100.0;
        match &layer.content {
            LayerContent::Adjustment => {
                if layer.filters.is_neutral() {
                    continue;
                }
                let adjusted = processing::apply_filters(&acc, &layer.filters);
                blend_rows(&mut acc, &adjusted, |base, top| {
                    blend::mix_adjusted(base, top, layer.blend_mode, opacity)
                });
            }
            LayerContent::Image(pixels) => {
                if layer.filters.is_neutral() {
                    blend_rows(&mut acc, pixels, |base, top| {
                        blend::blend_pixel(base, top, layer.blend_mode, opacity)
                    });
                } else {
                    let filtered = processing::apply_filters(pixels, &layer.filters);
                    blend_rows(&mut acc, &filtered, |base, top| {
                        blend::blend_pixel(base, top, layer.blend_mode, opacity)
                    });
                }
            }
        }
    }
    acc
}

/// Applies `f` to every pixel where `top` overlaps `acc`, anchored at the origin.
fn blend_rows<F>(acc: &mut RgbaImage, top: &RgbaImage, f: F)
where
    F: Fn([u8; 4], [u8; 4]) -> [u8; 4] + Sync,
{
    let acc_w = acc.width() as usize;
    let top_w = top.width() as usize;
    let top_h = top.height() as usize;
    let cols = acc_w.min(top_w);
    if cols == 0 {
        return;
    }
    let top_raw = top.as_raw();

    acc.par_chunks_mut(acc_w * 4)
        .enumerate()
        .for_each(|(y, row)| {
            if y >= top_h {
                return;
            }
            let top_row = &top_raw[y * top_w * 4..y * top_w * 4 + cols * 4];
            for (px, t) in row[..cols * 4]
                .chunks_exact_mut(4)
                .zip(top_row.chunks_exact(4))
            {
                let out = f([px[0], px[1], px[2], px[3]], [t[0], t[1], t[2], t[3]]);
                px.copy_from_slice(&out);
            }
        });
}
