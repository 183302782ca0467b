use std::sync::Arc;

use anyhow::anyhow;
use image::RgbaImage;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::decode;
use crate::error::{EngineError, Result, ensure_dimensions};
use crate::frames::{Frame, FrameScope, MultiFrameSource};
use crate::generative::{EditTarget, GenerativeEditService, GenerativeRequest};
use crate::history::{HistoryStack, Snapshot};
use crate::layer::{self, BlendMode, Layer, LayerContent, LayerId, LayerStack, LayerUpdate};
use crate::mask::{MaskSurface, Point};
use crate::processing;
use crate::session::{SessionData, SessionStore, Workflow};
use crate::state::FilterParameters;
use crate::viewport::ViewTransform;

const BASE_LAYER_NAME: &str = "Background";
const BASE_LAYER_ID: LayerId = LayerId(1);

/// Owns one loaded asset and every piece of editing state built on it.
///
/// Methods are the only way to mutate anything. Each successful edit commits
/// exactly one history entry; a rejected edit leaves history, layers and
/// frames untouched.
///
/// For animated sources the bottom layer created at load is frame-bound: its
/// pixels come from the current frame (or that frame's edited override), so
/// the same layer stack renders every frame.
pub struct EditorEngine {
    config: EngineConfig,
    frames: MultiFrameSource,
    frame_layer: Option<LayerId>,
    history: HistoryStack,
    active_layer: Option<LayerId>,
    next_layer_id: u64,
    mask: MaskSurface,
    view: ViewTransform,
    recent_tools: Vec<String>,
    workflows: Vec<Workflow>,
    session: Option<Box<dyn SessionStore>>,
}

struct Loaded {
    frames: MultiFrameSource,
    frame_layer: Option<LayerId>,
    history: HistoryStack,
}

impl Loaded {
    fn build(config: &EngineConfig, frames: Vec<Frame>) -> Result<Self> {
        if frames.iter().any(|f| f.width() == 0 || f.height() == 0) {
            return Err(EngineError::decode("image has no pixels"));
        }
        let frames = MultiFrameSource::new(frames, config.default_frame_delay_ms())?;
        let base = Layer::image_shared(
            BASE_LAYER_ID,
            BASE_LAYER_NAME,
            frames.frames()[0].pixels.clone(),
        );
        let frame_layer = (frames.len() > 1).then_some(BASE_LAYER_ID);
        let history = HistoryStack::new(Snapshot::new(
            LayerStack::single(base),
            Some(BASE_LAYER_ID),
        ));
        Ok(Self {
            frames,
            frame_layer,
            history,
        })
    }
}

impl EditorEngine {
    pub fn new(config: EngineConfig, image: RgbaImage) -> Result<Self> {
        Self::from_frames(config, vec![Frame::new(image, 0)])
    }

    pub fn from_frames(config: EngineConfig, frames: Vec<Frame>) -> Result<Self> {
        let loaded = Loaded::build(&config, frames)?;
        let (width, height) = loaded.frames.dimensions();
        info!(width, height, frames = loaded.frames.len(), "asset loaded");
        Ok(Self {
            mask: MaskSurface::new(width, height, config.brush_radius()),
            view: ViewTransform::from_config(&config),
            frames: loaded.frames,
            frame_layer: loaded.frame_layer,
            history: loaded.history,
            active_layer: Some(BASE_LAYER_ID),
            next_layer_id: BASE_LAYER_ID.0 + 1,
            recent_tools: Vec::new(),
            workflows: Vec::new(),
            session: None,
            config,
        })
    }

    /// Decodes `bytes` as an animation or a still image, whichever they hold.
    pub fn from_bytes(config: EngineConfig, bytes: &[u8]) -> Result<Self> {
        Self::from_frames(config, decode::decode_any(bytes)?)
    }

    /// Replaces the asset. History, mask, view and layers start over; recent
    /// tools, workflows and the attached session store are kept.
    pub fn load_frames(&mut self, frames: Vec<Frame>) -> Result<()> {
        let loaded = Loaded::build(&self.config, frames)?;
        let (width, height) = loaded.frames.dimensions();
        info!(width, height, frames = loaded.frames.len(), "asset replaced");
        self.frames = loaded.frames;
        self.frame_layer = loaded.frame_layer;
        self.history = loaded.history;
        self.active_layer = Some(BASE_LAYER_ID);
        self.next_layer_id = BASE_LAYER_ID.0 + 1;
        self.mask.resize(width, height);
        self.view.reset();
        Ok(())
    }

    pub fn load_image(&mut self, image: RgbaImage) -> Result<()> {
        self.load_frames(vec![Frame::new(image, 0)])
    }

    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.load_frames(decode::decode_any(bytes)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.frames.dimensions()
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn current_snapshot(&self) -> &Arc<Snapshot> {
        self.history.current()
    }

    pub fn layers(&self) -> &LayerStack {
        &self.history.current().layers
    }

    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.active_layer
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active_layer.and_then(|id| self.layers().get(id))
    }

    /// Layer whose pixels follow the animation frames, if the asset is animated
    /// and that layer still exists.
    pub fn frame_layer_id(&self) -> Option<LayerId> {
        self.frame_layer.filter(|id| self.layers().contains(*id))
    }

    pub fn frames(&self) -> &MultiFrameSource {
        &self.frames
    }

    pub fn mask(&self) -> &MaskSurface {
        &self.mask
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ViewTransform {
        &mut self.view
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn tool_history(&self) -> &[String] {
        self.history.tool_history()
    }

    /// Most recently used tool ids, newest first.
    pub fn recent_tools(&self) -> &[String] {
        &self.recent_tools
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    // -- rendering --

    /// Composites the current snapshot at the current frame.
    pub fn composite(&self) -> RgbaImage {
        self.composite_at(self.history.current(), self.frames.current_index())
    }

    pub fn composite_frame(&self, index: usize) -> Result<RgbaImage> {
        self.check_frame_index(index)?;
        Ok(self.composite_at(self.history.current(), index))
    }

    /// One composited image per frame, in order.
    pub fn composite_all_frames(&self) -> Vec<RgbaImage> {
        let snapshot = self.history.current();
        (0..self.frames.len())
            .map(|i| self.composite_at(snapshot, i))
            .collect()
    }

    fn composite_at(&self, snapshot: &Snapshot, index: usize) -> RgbaImage {
        let layers = self.layers_for_frame(snapshot, index);
        let backdrop = self.frame_pixels(snapshot, index);
        layer::composite(&layers, &backdrop)
    }

    fn frame_pixels(&self, snapshot: &Snapshot, index: usize) -> Arc<RgbaImage> {
        let decoded = &self.frames.frames()[index].pixels;
        snapshot
            .frame_override
            .as_ref()
            .and_then(|frames| frames.get(index))
            .unwrap_or(decoded)
            .clone()
    }

    fn all_frame_pixels(&self, snapshot: &Snapshot) -> Vec<Arc<RgbaImage>> {
        (0..self.frames.len())
            .map(|i| self.frame_pixels(snapshot, i))
            .collect()
    }

    fn layers_for_frame(&self, snapshot: &Snapshot, index: usize) -> Vec<Layer> {
        let mut layers = snapshot.layers.layers().to_vec();
        let bound = self.frame_layer;
        if let Some(layer) = layers.iter_mut().find(|l| Some(l.id) == bound) {
            layer.content = LayerContent::Image(self.frame_pixels(snapshot, index));
        }
        layers
    }

    fn check_frame_index(&self, index: usize) -> Result<()> {
        if index < self.frames.len() {
            Ok(())
        } else {
            Err(EngineError::invalid(format!(
                "frame {index} out of range ({} frames)",
                self.frames.len()
            )))
        }
    }

    // -- commits --

    fn commit(&mut self, snapshot: Snapshot, tool: &str) {
        self.frames.pause();
        self.active_layer = snapshot.active_layer_id;
        self.history.commit(snapshot, Some(tool));
        self.note_recent_tool(tool);
        info!(
            tool,
            cursor = self.history.cursor(),
            snapshots = self.history.len(),
            "edit committed"
        );
        self.persist();
    }

    /// Commits a new layer list, carrying the current frame state forward.
    fn commit_layers(&mut self, layers: LayerStack, active: Option<LayerId>, tool: &str) {
        let mut snapshot = Snapshot::new(layers, active);
        snapshot.frame_override = self.history.current().frame_override.clone();
        self.commit(snapshot, tool);
    }

    /// The current active id if it survives in `layers`.
    fn surviving_active(&self, layers: &LayerStack) -> Option<LayerId> {
        self.active_layer.filter(|id| layers.contains(*id))
    }

    fn note_recent_tool(&mut self, tool: &str) {
        self.recent_tools.retain(|t| t != tool);
        self.recent_tools.insert(0, tool.to_string());
        self.recent_tools.truncate(self.config.recent_tools_limit());
    }

    // -- layers --

    /// Adds an image layer above the active layer and makes it active.
    pub fn add_image_layer(
        &mut self,
        name: impl Into<String>,
        pixels: RgbaImage,
    ) -> Result<LayerId> {
        ensure_dimensions(self.dimensions(), pixels.dimensions())?;
        let id = LayerId(self.next_layer_id);
        let layers = self
            .layers()
            .insert_above(Layer::image(id, name, pixels), self.active_layer)?;
        self.next_layer_id += 1;
        self.commit_layers(layers, Some(id), "add-layer");
        Ok(id)
    }

    /// Adds an adjustment layer above the active layer and makes it active.
    pub fn add_adjustment_layer(
        &mut self,
        name: impl Into<String>,
        filters: FilterParameters,
    ) -> Result<LayerId> {
        let id = LayerId(self.next_layer_id);
        let layers = self
            .layers()
            .insert_above(Layer::adjustment(id, name, filters), self.active_layer)?;
        self.next_layer_id += 1;
        self.commit_layers(layers, Some(id), "add-adjustment-layer");
        Ok(id)
    }

    pub fn update_layer(&mut self, id: LayerId, update: LayerUpdate) -> Result<()> {
        self.apply_update(id, update, "update-layer")
    }

    pub fn rename_layer(&mut self, id: LayerId, name: impl Into<String>) -> Result<()> {
        let update = LayerUpdate {
            name: Some(name.into()),
            ..Default::default()
        };
        self.apply_update(id, update, "rename-layer")
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, percent: f32) -> Result<()> {
        let update = LayerUpdate {
            opacity: Some(percent),
            ..Default::default()
        };
        self.apply_update(id, update, "layer-opacity")
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<()> {
        let update = LayerUpdate {
            blend_mode: Some(mode),
            ..Default::default()
        };
        self.apply_update(id, update, "blend-mode")
    }

    /// Replaces a layer's non-destructive filters.
    pub fn set_layer_filters(&mut self, id: LayerId, filters: FilterParameters) -> Result<()> {
        let update = LayerUpdate {
            filters: Some(filters),
            ..Default::default()
        };
        self.apply_update(id, update, "adjust-layer")
    }

    fn apply_update(&mut self, id: LayerId, update: LayerUpdate, tool: &str) -> Result<()> {
        if let Some(pixels) = &update.pixels {
            ensure_dimensions(self.dimensions(), pixels.dimensions())?;
            if self.frame_layer == Some(id) {
                return Err(EngineError::invalid(format!(
                    "layer {id} takes its pixels from the animation frames"
                )));
            }
        }
        let layers = self.layers().update_layer(id, update)?;
        let active = self.surviving_active(&layers);
        self.commit_layers(layers, active, tool);
        Ok(())
    }

    pub fn toggle_visibility(&mut self, id: LayerId) -> Result<()> {
        let layers = self.layers().toggle_visibility(id)?;
        let active = self.surviving_active(&layers);
        self.commit_layers(layers, active, "toggle-visibility");
        Ok(())
    }

    /// Removes a layer. Deleting the active layer activates the one below it
    /// (or the new bottom layer).
    pub fn delete_layer(&mut self, id: LayerId) -> Result<()> {
        let index = self.layers().index_of(id)?;
        let layers = self.layers().delete_layer(id)?;
        let active = self
            .surviving_active(&layers)
            .or_else(|| layers.layers().get(index.saturating_sub(1)).map(|l| l.id));
        self.commit_layers(layers, active, "delete-layer");
        Ok(())
    }

    pub fn move_layer_up(&mut self, id: LayerId) -> Result<()> {
        let layers = self.layers().move_up(id)?;
        let active = self.surviving_active(&layers);
        self.commit_layers(layers, active, "move-layer");
        Ok(())
    }

    pub fn move_layer_down(&mut self, id: LayerId) -> Result<()> {
        let layers = self.layers().move_down(id)?;
        let active = self.surviving_active(&layers);
        self.commit_layers(layers, active, "move-layer");
        Ok(())
    }

    pub fn reorder_layer(&mut self, from: usize, to: usize) -> Result<()> {
        let layers = self.layers().reorder(from, to)?;
        let active = self.surviving_active(&layers);
        self.commit_layers(layers, active, "reorder-layers");
        Ok(())
    }

    /// Bakes a layer into the image layer below it. Merging into the
    /// frame-bound layer bakes into every frame.
    pub fn merge_down(&mut self, id: LayerId) -> Result<()> {
        let snapshot = self.history.current().clone();
        let index = snapshot.layers.index_of(id)?;
        if index == 0 {
            return Err(EngineError::invalid("the bottom layer has nothing to merge into"));
        }
        let lower = &snapshot.layers.layers()[index - 1];
        let upper = &snapshot.layers.layers()[index];

        if self.frame_layer == Some(lower.id) {
            let frames: Vec<Arc<RgbaImage>> = self
                .all_frame_pixels(&snapshot)
                .par_iter()
                .map(|pixels| Arc::new(layer::merge_pair(lower, pixels, upper)))
                .collect();

            let mut merged = lower.clone();
            merged.filters = FilterParameters::default();
            let mut layers = snapshot.layers.layers().to_vec();
            layers[index - 1] = merged;
            layers.remove(index);
            let layers = LayerStack::new(layers)?;

            let active = self.surviving_active(&layers).or(Some(lower.id));
            self.commit(Snapshot::new(layers, active).with_frame_override(frames), "merge-down");
            return Ok(());
        }

        let current_frame = self.frames.current_index();
        let current = LayerStack::new(self.layers_for_frame(&snapshot, current_frame))?;
        let layers = current.merge_down(id)?;
        let active = self.surviving_active(&layers).or(Some(lower.id));
        self.commit_layers(layers, active, "merge-down");
        Ok(())
    }

    /// Selects the layer later edits target. Not a history entry.
    pub fn set_active_layer(&mut self, id: Option<LayerId>) -> Result<()> {
        if let Some(id) = id {
            self.layers().index_of(id)?;
        }
        debug!(layer = ?id, "active layer changed");
        self.active_layer = id;
        Ok(())
    }

    // -- destructive pixel edits --

    /// Bakes `params` into the active image layer's pixels.
    pub fn apply_filters(&mut self, params: &FilterParameters, scope: FrameScope) -> Result<()> {
        self.edit_active_pixels(scope, "apply-filters", |pixels| {
            Ok(processing::apply_filters(pixels, params))
        })
    }

    /// Bakes `params` into the active image layer, weighted by the mask.
    pub fn apply_filters_masked(
        &mut self,
        params: &FilterParameters,
        scope: FrameScope,
    ) -> Result<()> {
        let mask = self.mask.require_selection()?.clone();
        ensure_dimensions(self.dimensions(), mask.dimensions())?;
        self.edit_active_pixels(scope, "masked-filters", |pixels| {
            processing::apply_filters_masked(pixels, &mask, params)
        })
    }

    /// Runs `edit` over the active layer's pixels. On the frame-bound layer
    /// `scope` picks the current frame or every frame; either way the result
    /// is one history entry.
    fn edit_active_pixels<F>(&mut self, scope: FrameScope, tool: &str, edit: F) -> Result<()>
    where
        F: Fn(&RgbaImage) -> Result<RgbaImage> + Sync,
    {
        let id = self
            .active_layer
            .ok_or_else(|| EngineError::invalid("no active layer"))?;
        let snapshot = self.history.current().clone();
        let target = snapshot
            .layers
            .get(id)
            .ok_or(EngineError::InvalidLayerReference(id))?;

        if self.frame_layer == Some(id) {
            let mut frames = self.all_frame_pixels(&snapshot);
            match scope {
                FrameScope::Current => {
                    let i = self.frames.current_index();
                    let edited = edit(frames[i].as_ref())?;
                    frames[i] = Arc::new(edited);
                }
                FrameScope::All => {
                    frames = frames
                        .par_iter()
                        .map(|pixels| edit(pixels.as_ref()).map(Arc::new))
                        .collect::<Result<Vec<_>>>()?;
                }
            }
            let next = Snapshot::new(snapshot.layers.clone(), Some(id)).with_frame_override(frames);
            self.commit(next, tool);
            return Ok(());
        }

        let Some(pixels) = target.pixels() else {
            return Err(EngineError::invalid(format!(
                "layer {id} is an adjustment layer and has no pixels"
            )));
        };
        let edited = edit(pixels.as_ref())?;
        let update = LayerUpdate {
            pixels: Some(Arc::new(edited)),
            ..Default::default()
        };
        let layers = snapshot.layers.update_layer(id, update)?;
        self.commit_layers(layers, Some(id), tool);
        Ok(())
    }

    // -- generative edits --

    /// Captures the active layer's pixels and the painted mask for a
    /// generative backend. Nothing is committed.
    pub fn prepare_generative_edit(&self, prompt: &str) -> Result<GenerativeRequest> {
        let mask = self.mask.require_selection()?;
        ensure_dimensions(self.dimensions(), mask.dimensions())?;
        let id = self
            .active_layer
            .ok_or_else(|| EngineError::invalid("no active layer"))?;
        let snapshot = self.history.current();
        let target = snapshot
            .layers
            .get(id)
            .ok_or(EngineError::InvalidLayerReference(id))?;

        let (base, frame_index) = if self.frame_layer == Some(id) {
            let i = self.frames.current_index();
            (self.frame_pixels(snapshot, i), Some(i))
        } else {
            let pixels = target.pixels().ok_or_else(|| {
                EngineError::invalid(format!("layer {id} is an adjustment layer and has no pixels"))
            })?;
            (pixels.clone(), None)
        };

        Ok(GenerativeRequest {
            base: base.as_ref().clone(),
            mask: mask.clone(),
            prompt: prompt.to_string(),
            target: EditTarget {
                layer_id: id,
                frame_index,
            },
        })
    }

    /// Commits an externally generated image as the target's new pixels.
    pub fn commit_generated_image(
        &mut self,
        request: &GenerativeRequest,
        image: RgbaImage,
    ) -> Result<()> {
        ensure_dimensions(self.dimensions(), image.dimensions())?;
        let EditTarget {
            layer_id,
            frame_index,
        } = request.target;
        let snapshot = self.history.current().clone();
        let target = snapshot
            .layers
            .get(layer_id)
            .ok_or(EngineError::InvalidLayerReference(layer_id))?;

        if self.frame_layer == Some(layer_id) {
            let i = frame_index.unwrap_or(self.frames.current_index());
            self.check_frame_index(i)?;
            let mut frames = self.all_frame_pixels(&snapshot);
            frames[i] = Arc::new(image);
            let active = self.surviving_active(&snapshot.layers);
            let next = Snapshot::new(snapshot.layers.clone(), active).with_frame_override(frames);
            self.commit(next, "generative-edit");
            return Ok(());
        }

        if target.is_adjustment() {
            return Err(EngineError::invalid(format!(
                "layer {layer_id} is an adjustment layer and has no pixels"
            )));
        }
        let update = LayerUpdate {
            pixels: Some(Arc::new(image)),
            ..Default::default()
        };
        let layers = snapshot.layers.update_layer(layer_id, update)?;
        let active = self.surviving_active(&layers);
        self.commit_layers(layers, active, "generative-edit");
        Ok(())
    }

    /// Prepares a request, calls `service` and commits the result. A service
    /// failure leaves history untouched.
    pub fn run_generative_edit<S>(&mut self, service: &S, prompt: &str) -> Result<()>
    where
        S: GenerativeEditService + ?Sized,
    {
        let request = self.prepare_generative_edit(prompt)?;
        let image = service
            .generate_edit(&request.base, &request.mask, &request.prompt)
            .map_err(|err| {
                warn!("generative edit failed: {err:#}");
                EngineError::ExternalServiceFailure {
                    message: format!("{err:#}"),
                }
            })?;
        self.commit_generated_image(&request, image)
    }

    // -- history --

    pub fn undo(&mut self) -> bool {
        let moved = self.history.undo();
        if moved {
            self.sync_to_cursor("undo");
        }
        moved
    }

    pub fn redo(&mut self) -> bool {
        let moved = self.history.redo();
        if moved {
            self.sync_to_cursor("redo");
        }
        moved
    }

    pub fn jump_to(&mut self, index: usize) -> Result<()> {
        self.history.jump_to(index)?;
        self.sync_to_cursor("jump");
        Ok(())
    }

    /// Drops every edit and returns to the state at load time.
    pub fn reset_history(&mut self) {
        self.history.reset();
        self.sync_to_cursor("reset");
    }

    fn sync_to_cursor(&mut self, action: &str) {
        self.frames.pause();
        self.active_layer = self.history.current().active_layer_id;
        debug!(action, cursor = self.history.cursor(), "history cursor moved");
    }

    // -- frames --

    pub fn current_frame_index(&self) -> usize {
        self.frames.current_index()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_playing(&self) -> bool {
        self.frames.is_playing()
    }

    pub fn select_frame(&mut self, index: usize) -> Result<()> {
        self.frames.select(index)
    }

    pub fn next_frame(&mut self) {
        self.frames.next();
    }

    pub fn previous_frame(&mut self) {
        self.frames.previous();
    }

    pub fn play(&mut self) {
        self.frames.play();
    }

    pub fn pause(&mut self) {
        self.frames.pause();
    }

    /// Advances playback; returns whether the displayed frame changed.
    pub fn tick(&mut self, elapsed_ms: u32) -> bool {
        self.frames.tick(elapsed_ms)
    }

    // -- mask --

    pub fn start_mask_stroke(&mut self, point: Point) {
        self.mask.start_stroke(point);
    }

    pub fn continue_mask_stroke(&mut self, point: Point) {
        self.mask.continue_stroke(point);
    }

    pub fn end_mask_stroke(&mut self) {
        self.mask.end_stroke();
    }

    pub fn clear_mask(&mut self) {
        self.mask.clear();
    }

    pub fn set_brush_radius(&mut self, radius: f32) {
        self.mask.set_brush_radius(radius);
    }

    /// Replaces the mask, e.g. with one built by [`MaskSurface::from_rgba`].
    pub fn set_mask(&mut self, mask: MaskSurface) -> Result<()> {
        mask.ensure_matches(self.dimensions())?;
        self.mask = mask;
        Ok(())
    }

    // -- workflows --

    /// Saves the last `steps` tool ids as a named workflow, replacing any
    /// workflow with the same name.
    pub fn save_workflow(&mut self, name: impl Into<String>, steps: usize) -> Result<&Workflow> {
        let log = self.history.tool_history();
        if steps == 0 || steps > log.len() {
            return Err(EngineError::invalid(format!(
                "cannot take {steps} steps from a tool history of {}",
                log.len()
            )));
        }
        let workflow = Workflow {
            name: name.into(),
            steps: log[log.len() - steps..].to_vec(),
        };
        let index = match self.workflows.iter().position(|w| w.name == workflow.name) {
            Some(i) => {
                self.workflows[i] = workflow;
                i
            }
            None => {
                self.workflows.push(workflow);
                self.workflows.len() - 1
            }
        };
        self.persist();
        Ok(&self.workflows[index])
    }

    pub fn delete_workflow(&mut self, name: &str) -> bool {
        let before = self.workflows.len();
        self.workflows.retain(|w| w.name != name);
        let removed = self.workflows.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    // -- session --

    /// Saves the session to `store` after every commit from now on.
    pub fn attach_session_store(&mut self, store: Box<dyn SessionStore>) {
        self.session = Some(store);
    }

    pub fn detach_session_store(&mut self) -> Option<Box<dyn SessionStore>> {
        self.session.take()
    }

    pub fn session_data(&self) -> anyhow::Result<SessionData> {
        let mut data = SessionData {
            cursor: self.history.cursor(),
            tool_history: self.history.tool_history().to_vec(),
            recent_tools: self.recent_tools.clone(),
            workflows: self.workflows.clone(),
            ..Default::default()
        };
        data.store_snapshots(self.history.snapshots().iter().map(|s| s.as_ref()))?;
        Ok(data)
    }

    pub fn save_session(&self, store: &mut dyn SessionStore) -> anyhow::Result<()> {
        store.save(&self.session_data()?)
    }

    /// Loads a saved session for the current asset. Returns `false` when the
    /// store holds nothing; a session that does not fit the asset is an error
    /// and leaves the engine unchanged.
    pub fn restore_session(&mut self, store: &mut dyn SessionStore) -> anyhow::Result<bool> {
        let Some(data) = store.load()? else {
            return Ok(false);
        };
        let snapshots: Vec<Arc<Snapshot>> = data
            .restore_snapshots()?
            .into_iter()
            .map(Arc::new)
            .collect();
        for snapshot in &snapshots {
            self.check_restored(snapshot)?;
        }
        let next_layer_id = snapshots
            .iter()
            .map(|s| s.layers.max_id())
            .max()
            .unwrap_or(0)
            + 1;
        let history = HistoryStack::from_parts(snapshots, data.cursor, data.tool_history)
            .ok_or_else(|| anyhow!("session contains no snapshots"))?;

        self.history = history;
        self.next_layer_id = next_layer_id.max(BASE_LAYER_ID.0 + 1);
        self.recent_tools = data.recent_tools;
        self.recent_tools.truncate(self.config.recent_tools_limit());
        self.workflows = data.workflows;
        self.sync_to_cursor("restore");
        info!(snapshots = self.history.len(), "session restored");
        Ok(true)
    }

    fn check_restored(&self, snapshot: &Snapshot) -> Result<()> {
        let dims = self.dimensions();
        for layer in snapshot.layers.layers() {
            if let Some(pixels) = layer.pixels() {
                ensure_dimensions(dims, pixels.dimensions())?;
            }
        }
        if let Some(id) = snapshot.active_layer_id {
            snapshot.layers.index_of(id)?;
        }
        if let Some(frames) = &snapshot.frame_override {
            if frames.len() != self.frames.len() {
                return Err(EngineError::invalid(format!(
                    "session has {} frames, asset has {}",
                    frames.len(),
                    self.frames.len()
                )));
            }
            for pixels in frames.iter() {
                ensure_dimensions(dims, pixels.dimensions())?;
            }
        }
        Ok(())
    }

    fn persist(&mut self) {
        if self.session.is_none() {
            return;
        }
        let saved = self.session_data().and_then(|data| match self.session.as_mut() {
            Some(store) => store.save(&data),
            None => Ok(()),
        });
        if let Err(err) = saved {
            warn!("failed to save session: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use image::{GrayImage, ImageBuffer, Rgba};

    use super::*;
    use crate::session::MemoryStore;

    const GRAY: [u8; 4] = [100, 100, 100, 255];
    const RED: [u8; 4] = [200, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 200, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 200, 255];

    fn solid(w: u32, h: u32, c: [u8; 4]) -> RgbaImage {
        ImageBuffer::from_pixel(w, h, Rgba(c))
    }

    fn still() -> EditorEngine {
        EditorEngine::new(EngineConfig::default(), solid(4, 4, GRAY)).unwrap()
    }

    fn animated() -> EditorEngine {
        let frames = [RED, GREEN, BLUE]
            .into_iter()
            .map(|c| Frame::new(solid(2, 2, c), 40))
            .collect();
        EditorEngine::from_frames(EngineConfig::default(), frames).unwrap()
    }

    fn invert() -> FilterParameters {
        FilterParameters::default().with_invert(100.0)
    }

    struct Fill([u8; 4]);

    impl GenerativeEditService for Fill {
        fn generate_edit(
            &self,
            base: &RgbaImage,
            _mask: &GrayImage,
            _prompt: &str,
        ) -> anyhow::Result<RgbaImage> {
            Ok(solid(base.width(), base.height(), self.0))
        }
    }

    struct Unavailable;

    impl GenerativeEditService for Unavailable {
        fn generate_edit(
            &self,
            _base: &RgbaImage,
            _mask: &GrayImage,
            _prompt: &str,
        ) -> anyhow::Result<RgbaImage> {
            Err(anyhow!("service timed out"))
        }
    }

    struct CountingStore {
        saves: Rc<Cell<usize>>,
        fail: bool,
    }

    impl SessionStore for CountingStore {
        fn save(&mut self, _data: &SessionData) -> anyhow::Result<()> {
            self.saves.set(self.saves.get() + 1);
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            Ok(())
        }

        fn load(&mut self) -> anyhow::Result<Option<SessionData>> {
            Ok(None)
        }
    }

    fn paint_dot(engine: &mut EditorEngine, at: Point) {
        engine.start_mask_stroke(at);
        engine.end_mask_stroke();
    }

    #[test]
    fn adjustment_layer_edit_undo_redo() {
        let mut engine = still();
        let original = engine.composite();
        assert_eq!(original.get_pixel(0, 0).0, GRAY);

        engine
            .add_adjustment_layer("brighten", FilterParameters::default().with_brightness(150.0))
            .unwrap();
        let brightened = engine.composite();
        assert_eq!(brightened.get_pixel(0, 0).0, [150, 150, 150, 255]);
        let edited = engine.current_snapshot().clone();

        assert!(engine.undo());
        assert_eq!(engine.composite(), original);
        assert!(engine.redo());
        assert!(Arc::ptr_eq(&edited, engine.current_snapshot()));
        assert_eq!(engine.composite(), brightened);
    }

    #[test]
    fn new_layers_go_above_active_and_become_active() {
        let mut engine = still();
        let adj = engine
            .add_adjustment_layer("a", FilterParameters::default())
            .unwrap();
        engine.set_active_layer(Some(BASE_LAYER_ID)).unwrap();
        let img = engine.add_image_layer("paint", solid(4, 4, RED)).unwrap();
        let ids: Vec<_> = engine.layers().layers().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![BASE_LAYER_ID, img, adj]);
        assert_eq!(engine.active_layer_id(), Some(img));
    }

    #[test]
    fn rejected_edits_leave_history_untouched() {
        let mut engine = still();
        assert!(matches!(
            engine.delete_layer(BASE_LAYER_ID),
            Err(EngineError::LastLayerDeletion)
        ));
        assert!(matches!(
            engine.toggle_visibility(LayerId(99)),
            Err(EngineError::InvalidLayerReference(LayerId(99)))
        ));
        assert!(matches!(
            engine.add_image_layer("small", solid(2, 2, RED)),
            Err(EngineError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            engine.apply_filters_masked(&invert(), FrameScope::Current),
            Err(EngineError::EmptyMaskOperation)
        ));
        assert_eq!(engine.history().len(), 1);
        assert!(engine.tool_history().is_empty());
    }

    #[test]
    fn deleting_active_layer_activates_the_one_below() {
        let mut engine = still();
        let top = engine.add_image_layer("top", solid(4, 4, RED)).unwrap();
        engine.delete_layer(top).unwrap();
        assert_eq!(engine.active_layer_id(), Some(BASE_LAYER_ID));
    }

    #[test]
    fn undo_restores_active_layer() {
        let mut engine = still();
        let adj = engine
            .add_adjustment_layer("a", FilterParameters::default())
            .unwrap();
        assert_eq!(engine.active_layer_id(), Some(adj));
        engine.undo();
        assert_eq!(engine.active_layer_id(), Some(BASE_LAYER_ID));
    }

    #[test]
    fn apply_to_all_frames_is_one_commit() {
        let mut engine = animated();
        engine.apply_filters(&invert(), FrameScope::All).unwrap();

        assert_eq!(engine.history().len(), 2);
        let overrides = engine.current_snapshot().frame_override.clone().unwrap();
        assert_eq!(overrides.len(), engine.frame_count());

        let mut single = animated();
        single.apply_filters(&invert(), FrameScope::Current).unwrap();
        assert_eq!(
            engine.composite_frame(0).unwrap(),
            single.composite_frame(0).unwrap()
        );
        assert_eq!(
            engine.composite_frame(2).unwrap().get_pixel(0, 0).0,
            [255, 255, 55, 255]
        );
    }

    #[test]
    fn apply_to_current_frame_leaves_others() {
        let mut engine = animated();
        engine.select_frame(1).unwrap();
        engine.apply_filters(&invert(), FrameScope::Current).unwrap();

        assert_eq!(engine.composite_frame(0).unwrap().get_pixel(0, 0).0, RED);
        assert_eq!(
            engine.composite_frame(1).unwrap().get_pixel(0, 0).0,
            [255, 55, 255, 255]
        );
        assert_eq!(engine.composite_frame(2).unwrap().get_pixel(0, 0).0, BLUE);

        engine.undo();
        assert_eq!(engine.composite_frame(1).unwrap().get_pixel(0, 0).0, GREEN);
    }

    #[test]
    fn adjustment_layers_apply_to_every_frame() {
        let mut engine = animated();
        engine.add_adjustment_layer("inv", invert()).unwrap();
        let frames = engine.composite_all_frames();
        assert_eq!(frames[0].get_pixel(0, 0).0, [55, 255, 255, 255]);
        assert_eq!(frames[1].get_pixel(0, 0).0, [255, 55, 255, 255]);
    }

    #[test]
    fn merge_into_frame_layer_bakes_every_frame() {
        let mut engine = animated();
        let adj = engine.add_adjustment_layer("inv", invert()).unwrap();
        let before = engine.composite_all_frames();

        engine.merge_down(adj).unwrap();
        assert_eq!(engine.layers().len(), 1);
        assert_eq!(engine.active_layer_id(), Some(BASE_LAYER_ID));
        assert_eq!(
            engine.current_snapshot().frame_override.as_ref().unwrap().len(),
            3
        );
        assert_eq!(engine.composite_all_frames(), before);
    }

    #[test]
    fn editing_stops_playback() {
        let mut engine = animated();
        engine.play();
        assert!(engine.is_playing());
        assert!(engine.tick(40));
        assert_eq!(engine.current_frame_index(), 1);

        engine.add_adjustment_layer("a", FilterParameters::default()).unwrap();
        assert!(!engine.is_playing());
        assert!(!engine.tick(1000));
    }

    #[test]
    fn frame_layer_pixels_cannot_be_replaced_directly() {
        let mut engine = animated();
        let update = LayerUpdate {
            pixels: Some(Arc::new(solid(2, 2, GRAY))),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_layer(BASE_LAYER_ID, update),
            Err(EngineError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn masked_filters_only_touch_painted_area() {
        let config = EngineConfig {
            brush_radius: Some(2.0),
            ..Default::default()
        };
        let mut engine = EditorEngine::new(config, solid(20, 20, GRAY)).unwrap();
        paint_dot(&mut engine, Point::new(10.0, 10.0));
        engine
            .apply_filters_masked(&invert(), FrameScope::Current)
            .unwrap();

        let out = engine.composite();
        assert_eq!(out.get_pixel(10, 10).0, [155, 155, 155, 255]);
        assert_eq!(out.get_pixel(0, 0).0, GRAY);
        assert_eq!(engine.tool_history(), &["masked-filters"]);
    }

    #[test]
    fn generative_edit_commits_result() {
        let mut engine = still();
        paint_dot(&mut engine, Point::new(2.0, 2.0));
        engine.run_generative_edit(&Fill(RED), "make it red").unwrap();
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.composite().get_pixel(3, 3).0, RED);
    }

    #[test]
    fn generative_failure_leaves_history_untouched() {
        let mut engine = still();
        paint_dot(&mut engine, Point::new(2.0, 2.0));
        let err = engine.run_generative_edit(&Unavailable, "anything").unwrap_err();
        assert!(matches!(err, EngineError::ExternalServiceFailure { .. }));
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn generative_edit_needs_mask() {
        let engine = still();
        assert!(matches!(
            engine.prepare_generative_edit("x"),
            Err(EngineError::EmptyMaskOperation)
        ));
    }

    #[test]
    fn generated_image_lands_on_requested_frame() {
        let mut engine = animated();
        paint_dot(&mut engine, Point::new(1.0, 1.0));
        let request = engine.prepare_generative_edit("x").unwrap();
        assert_eq!(request.target.frame_index, Some(0));

        engine.next_frame();
        assert!(matches!(
            engine.commit_generated_image(&request, solid(3, 3, GRAY)),
            Err(EngineError::DimensionMismatch { .. })
        ));
        engine.commit_generated_image(&request, solid(2, 2, GRAY)).unwrap();
        assert_eq!(engine.composite_frame(0).unwrap().get_pixel(0, 0).0, GRAY);
        assert_eq!(engine.composite_frame(1).unwrap().get_pixel(0, 0).0, GREEN);
    }

    #[test]
    fn recent_tools_are_bounded_and_deduplicated() {
        let config = EngineConfig {
            recent_tools_limit: Some(2),
            ..Default::default()
        };
        let mut engine = EditorEngine::new(config, solid(2, 2, GRAY)).unwrap();
        engine
            .add_adjustment_layer("a", FilterParameters::default())
            .unwrap();
        engine.rename_layer(BASE_LAYER_ID, "bg").unwrap();
        engine.toggle_visibility(BASE_LAYER_ID).unwrap();
        engine.rename_layer(BASE_LAYER_ID, "base").unwrap();
        assert_eq!(engine.recent_tools(), &["rename-layer", "toggle-visibility"]);
        assert_eq!(engine.tool_history().len(), 4);
    }

    #[test]
    fn workflow_takes_tail_of_tool_history() {
        let mut engine = still();
        assert!(engine.save_workflow("empty", 1).is_err());
        engine
            .add_adjustment_layer("a", FilterParameters::default())
            .unwrap();
        engine.toggle_visibility(BASE_LAYER_ID).unwrap();
        engine.set_blend_mode(BASE_LAYER_ID, BlendMode::Multiply).unwrap();

        let workflow = engine.save_workflow("look", 2).unwrap();
        assert_eq!(workflow.steps, vec!["toggle-visibility", "blend-mode"]);
        engine.save_workflow("look", 1).unwrap();
        assert_eq!(engine.workflows().len(), 1);
        assert!(engine.delete_workflow("look"));
    }

    #[test]
    fn session_restores_history_on_a_fresh_engine() {
        let mut engine = still();
        engine
            .add_adjustment_layer("inv", invert())
            .unwrap();
        engine.set_layer_opacity(LayerId(2), 50.0).unwrap();
        engine.undo();
        let mut store = MemoryStore::default();
        engine.save_session(&mut store).unwrap();

        let mut fresh = still();
        assert!(fresh.restore_session(&mut store).unwrap());
        assert_eq!(fresh.history().len(), 3);
        assert_eq!(fresh.history().cursor(), 1);
        assert_eq!(fresh.composite(), engine.composite());
        assert_eq!(fresh.tool_history(), engine.tool_history());
        assert_eq!(fresh.active_layer_id(), Some(LayerId(2)));

        let next = fresh
            .add_adjustment_layer("b", FilterParameters::default())
            .unwrap();
        assert_eq!(next, LayerId(3));
    }

    #[test]
    fn session_keeps_one_copy_of_unchanged_pixels() {
        let mut engine = still();
        engine.add_image_layer("top", solid(4, 4, RED)).unwrap();
        engine.toggle_visibility(BASE_LAYER_ID).unwrap();
        engine.add_adjustment_layer("inv", invert()).unwrap();
        engine.set_layer_opacity(LayerId(2), 30.0).unwrap();

        let data = engine.session_data().unwrap();
        assert_eq!(data.snapshots.len(), 5);
        assert_eq!(data.pixels.len(), 2);
    }

    #[test]
    fn session_for_other_asset_is_rejected() {
        let mut engine = still();
        engine.toggle_visibility(BASE_LAYER_ID).unwrap();
        let mut store = MemoryStore::default();
        engine.save_session(&mut store).unwrap();

        let mut other = EditorEngine::new(EngineConfig::default(), solid(3, 3, GRAY)).unwrap();
        assert!(other.restore_session(&mut store).is_err());
        assert_eq!(other.history().len(), 1);
    }

    #[test]
    fn attached_store_is_saved_on_commit_and_failures_are_ignored() {
        let saves = Rc::new(Cell::new(0));
        let mut engine = still();
        engine.attach_session_store(Box::new(CountingStore {
            saves: saves.clone(),
            fail: true,
        }));
        engine.toggle_visibility(BASE_LAYER_ID).unwrap();
        engine.toggle_visibility(BASE_LAYER_ID).unwrap();
        assert_eq!(saves.get(), 2);
        assert_eq!(engine.history().len(), 3);

        engine.undo();
        assert_eq!(saves.get(), 2);
    }

    #[test]
    fn loading_a_new_image_resets_state() {
        let mut engine = still();
        paint_dot(&mut engine, Point::new(1.0, 1.0));
        engine.toggle_visibility(BASE_LAYER_ID).unwrap();
        engine.load_image(solid(6, 5, RED)).unwrap();

        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.dimensions(), (6, 5));
        assert!(engine.mask().is_empty());
        assert_eq!(engine.mask().dimensions(), (6, 5));
        assert_eq!(engine.tool_history().len(), 0);
        assert_eq!(engine.recent_tools(), &["toggle-visibility"]);
    }

    #[test]
    fn failed_load_keeps_current_asset() {
        let mut engine = still();
        assert!(matches!(
            engine.load_bytes(b"definitely not an image"),
            Err(EngineError::DecodeFailure { .. })
        ));
        assert_eq!(engine.dimensions(), (4, 4));
    }
}
