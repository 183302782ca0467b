use std::sync::Arc;

use image::RgbaImage;

use crate::error::{EngineError, Result};
use crate::layer::{LayerId, LayerStack};

#[derive(Debug, Clone)]
/// Immutable editor state recorded by one history entry.
pub struct Snapshot {
    pub layers: LayerStack,
    pub active_layer_id: Option<LayerId>,
    /// Edited pixels for every frame of an animated source, indexed by frame.
    /// `None` means the decoded frames are still untouched.
    pub frame_override: Option<Arc<Vec<Arc<RgbaImage>>>>,
}

impl Snapshot {
    pub fn new(layers: LayerStack, active_layer_id: Option<LayerId>) -> Self {
        Self {
            layers,
            active_layer_id,
            frame_override: None,
        }
    }

    pub fn with_frame_override(mut self, frames: Vec<Arc<RgbaImage>>) -> Self {
        self.frame_override = Some(Arc::new(frames));
        self
    }
}

#[derive(Debug)]
/// Linear undo/redo over shared snapshots.
///
/// `snapshots[0]` is the state at load time and `cursor` always indexes a
/// valid entry. Committing from a non-tip cursor discards the redo tail.
pub struct HistoryStack {
    snapshots: Vec<Arc<Snapshot>>,
    cursor: usize,
    tool_history: Vec<String>,
}

impl HistoryStack {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            snapshots: vec![Arc::new(initial)],
            cursor: 0,
            tool_history: Vec::new(),
        }
    }

    /// Rebuilds a stack from persisted parts, clamping the cursor.
    pub fn from_parts(
        snapshots: Vec<Arc<Snapshot>>,
        cursor: usize,
        tool_history: Vec<String>,
    ) -> Option<Self> {
        if snapshots.is_empty() {
            return None;
        }
        let cursor = cursor.min(snapshots.len() - 1);
        Some(Self {
            snapshots,
            cursor,
            tool_history,
        })
    }

    pub fn current(&self) -> &Arc<Snapshot> {
        &self.snapshots[self.cursor]
    }

    pub fn original(&self) -> &Arc<Snapshot> {
        &self.snapshots[0]
    }

    pub fn snapshots(&self) -> &[Arc<Snapshot>] {
        &self.snapshots
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    /// Tool ids of every commit in order. Undo never shortens this log.
    pub fn tool_history(&self) -> &[String] {
        &self.tool_history
    }

    pub fn commit(&mut self, snapshot: Snapshot, tool_id: Option<&str>) -> &Arc<Snapshot> {
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(Arc::new(snapshot));
        self.cursor = self.snapshots.len() - 1;
        if let Some(tool) = tool_id {
            self.tool_history.push(tool.to_string());
        }
        self.current()
    }

    /// Steps back one entry. Returns `false` when already at the original.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn jump_to(&mut self, index: usize) -> Result<()> {
        if index >= self.snapshots.len() {
            return Err(EngineError::HistoryIndexOutOfRange {
                index,
                len: self.snapshots.len(),
            });
        }
        self.cursor = index;
        Ok(())
    }

    /// Drops every entry except the original.
    pub fn reset(&mut self) {
        self.snapshots.truncate(1);
        self.cursor = 0;
    }
}
