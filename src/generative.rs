use image::{GrayImage, RgbaImage};

use crate::layer::LayerId;

/// Backend that paints new content into the masked area of an image.
///
/// Calls may be slow or remote; the engine never calls one on its own.
/// Hosts either use [`EditorEngine::run_generative_edit`] with a blocking
/// service or drive the request themselves and hand the result to
/// [`EditorEngine::commit_generated_image`].
///
/// [`EditorEngine::run_generative_edit`]: crate::editor::EditorEngine::run_generative_edit
/// [`EditorEngine::commit_generated_image`]: crate::editor::EditorEngine::commit_generated_image
pub trait GenerativeEditService {
    fn generate_edit(
        &self,
        base: &RgbaImage,
        mask: &GrayImage,
        prompt: &str,
    ) -> anyhow::Result<RgbaImage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Where a generated image lands once it comes back.
pub struct EditTarget {
    pub layer_id: LayerId,
    /// Frame to replace when the layer is bound to an animated source.
    pub frame_index: Option<usize>,
}

#[derive(Debug, Clone)]
/// Everything a generative backend needs, captured at request time.
pub struct GenerativeRequest {
    pub base: RgbaImage,
    pub mask: GrayImage,
    pub prompt: String,
    pub target: EditTarget,
}
