use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::history::Snapshot;
use crate::layer::{BlendMode, Layer, LayerContent, LayerId, LayerStack};
use crate::state::FilterParameters;

/// Opaque persistence for editor sessions.
pub trait SessionStore {
    fn save(&mut self, data: &SessionData) -> anyhow::Result<()>;
    fn load(&mut self) -> anyhow::Result<Option<SessionData>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Named sequence of tool ids replayable as a preset.
pub struct Workflow {
    pub name: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionData {
    /// Every distinct pixel buffer, referenced by index from the snapshots.
    pub pixels: Vec<StoredPixels>,
    pub snapshots: Vec<StoredSnapshot>,
    pub cursor: usize,
    pub tool_history: Vec<String>,
    pub recent_tools: Vec<String>,
    pub workflows: Vec<Workflow>,
}

impl SessionData {
    /// Replaces the stored snapshots. Buffers shared between snapshots are
    /// encoded once.
    pub fn store_snapshots<'a>(
        &mut self,
        snapshots: impl IntoIterator<Item = &'a Snapshot>,
    ) -> anyhow::Result<()> {
        let mut pool = PixelPool::default();
        self.snapshots = snapshots
            .into_iter()
            .map(|s| StoredSnapshot::from_snapshot(s, &mut pool))
            .collect::<anyhow::Result<_>>()?;
        self.pixels = pool.entries;
        Ok(())
    }

    /// Decodes the stored snapshots. Buffers stored once come back shared.
    pub fn restore_snapshots(&self) -> Result<Vec<Snapshot>> {
        let pixels = self
            .pixels
            .iter()
            .map(|p| p.to_image().map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        self.snapshots
            .iter()
            .map(|s| s.to_snapshot(&pixels))
            .collect()
    }
}

#[derive(Default)]
struct PixelPool {
    seen: HashMap<*const RgbaImage, usize>,
    entries: Vec<StoredPixels>,
}

impl PixelPool {
    fn intern(&mut self, img: &Arc<RgbaImage>) -> anyhow::Result<usize> {
        let key = Arc::as_ptr(img);
        if let Some(&index) = self.seen.get(&key) {
            return Ok(index);
        }
        let index = self.entries.len();
        self.entries.push(StoredPixels::from_image(img)?);
        self.seen.insert(key, index);
        Ok(index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One pixel buffer, PNG-encoded.
pub struct StoredPixels {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl StoredPixels {
    fn from_image(img: &RgbaImage) -> anyhow::Result<Self> {
        let mut png = Vec::new();
        PngEncoder::new_with_quality(&mut png, CompressionType::Fast, PngFilter::Adaptive)
            .write_image(
                img.as_raw(),
                img.width(),
                img.height(),
                ExtendedColorType::Rgba8,
            )?;
        Ok(Self {
            width: img.width(),
            height: img.height(),
            png,
        })
    }

    fn to_image(&self) -> Result<RgbaImage> {
        let img = image::load_from_memory_with_format(&self.png, ImageFormat::Png)
            .map_err(EngineError::decode)?
            .to_rgba8();
        if img.dimensions() != (self.width, self.height) {
            return Err(EngineError::decode(
                "stored pixel buffer does not match its size",
            ));
        }
        Ok(img)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLayer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: u8,
    pub blend_mode: BlendMode,
    pub filters: FilterParameters,
    /// Index into [`SessionData::pixels`]; `None` for adjustment layers.
    pub pixels: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub layers: Vec<StoredLayer>,
    pub active_layer_id: Option<LayerId>,
    pub frame_override: Option<Vec<usize>>,
}

impl StoredSnapshot {
    fn from_snapshot(snapshot: &Snapshot, pool: &mut PixelPool) -> anyhow::Result<Self> {
        let layers = snapshot
            .layers
            .layers()
            .iter()
            .map(|layer| {
                Ok(StoredLayer {
                    id: layer.id,
                    name: layer.name.clone(),
                    visible: layer.visible,
                    opacity: layer.opacity(),
                    blend_mode: layer.blend_mode,
                    filters: layer.filters.clone(),
                    pixels: layer.pixels().map(|p| pool.intern(p)).transpose()?,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        let frame_override = snapshot
            .frame_override
            .as_ref()
            .map(|frames| {
                frames
                    .iter()
                    .map(|p| pool.intern(p))
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()?;
        Ok(Self {
            layers,
            active_layer_id: snapshot.active_layer_id,
            frame_override,
        })
    }

    fn to_snapshot(&self, pixels: &[Arc<RgbaImage>]) -> Result<Snapshot> {
        let lookup = |index: usize| {
            pixels.get(index).cloned().ok_or_else(|| {
                EngineError::decode(format!("snapshot refers to missing pixel buffer {index}"))
            })
        };
        let layers = self
            .layers
            .iter()
            .map(|stored| {
                let content = match stored.pixels {
                    Some(index) => LayerContent::Image(lookup(index)?),
                    None => LayerContent::Adjustment,
                };
                let mut layer =
                    Layer::adjustment(stored.id, stored.name.clone(), stored.filters.clone())
                        .with_opacity(stored.opacity as f32)
                        .with_blend_mode(stored.blend_mode);
                layer.visible = stored.visible;
                layer.content = content;
                Ok(layer)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut snapshot = Snapshot::new(LayerStack::new(layers)?, self.active_layer_id);
        if let Some(frames) = &self.frame_override {
            let frames = frames
                .iter()
                .map(|&index| lookup(index))
                .collect::<Result<Vec<_>>>()?;
            snapshot = snapshot.with_frame_override(frames);
        }
        Ok(snapshot)
    }
}

/// Stores the session as pretty JSON in a single file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Uses the configured session path, else `<data_dir>/stratum/session.json`.
    pub fn default_location(config: &EngineConfig) -> Option<Self> {
        config
            .session_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("stratum").join("session.json")))
            .map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonFileStore {
    fn save(&mut self, data: &SessionData) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn load(&mut self) -> anyhow::Result<Option<SessionData>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

#[derive(Debug, Default)]
/// In-process store holding the last saved session as serialized JSON.
pub struct MemoryStore {
    json: Option<String>,
}

impl SessionStore for MemoryStore {
    fn save(&mut self, data: &SessionData) -> anyhow::Result<()> {
        self.json = Some(serde_json::to_string(data)?);
        Ok(())
    }

    fn load(&mut self) -> anyhow::Result<Option<SessionData>> {
        match &self.json {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }
}
