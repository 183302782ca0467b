use std::sync::Arc;

use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::error::{EngineError, Result, ensure_dimensions};

#[derive(Debug, Clone)]
/// One fully composed bitmap of an animated source.
pub struct Frame {
    pub pixels: Arc<RgbaImage>,
    /// Declared display time; zero means "use the configured default".
    pub delay_ms: u32,
}

impl Frame {
    pub fn new(pixels: RgbaImage, delay_ms: u32) -> Self {
        Self {
            pixels: Arc::new(pixels),
            delay_ms,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// What happens to a patch's area after its frame has been captured.
pub enum Disposal {
    /// Leave the canvas as drawn.
    #[default]
    Keep,
    /// Clear the patch rectangle to transparent.
    Background,
    /// Restore the canvas as it was before the patch. Not implemented yet:
    /// treated exactly like `Keep`.
    Previous,
}

#[derive(Debug, Clone)]
/// A partial image drawn onto the running canvas to produce the next frame.
pub struct FramePatch {
    pub left: u32,
    pub top: u32,
    pub pixels: RgbaImage,
    pub delay_ms: u32,
    pub disposal: Disposal,
}

/// Replays `patches` onto a `width`×`height` canvas, capturing one frame per
/// patch. Patch pixels with zero alpha leave the canvas underneath visible.
pub fn compose_patches(width: u32, height: u32, patches: &[FramePatch]) -> Result<Vec<Frame>> {
    if patches.is_empty() {
        return Err(EngineError::decode("animation contains no frames"));
    }
    if width == 0 || height == 0 {
        return Err(EngineError::decode("animation has an empty canvas"));
    }

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let mut frames = Vec::with_capacity(patches.len());

    for patch in patches {
        let (pw, ph) = patch.pixels.dimensions();
        for (px, py, p) in patch.pixels.enumerate_pixels() {
            let cx = patch.left + px;
            let cy = patch.top + py;
            if cx < width && cy < height && p[3] > 0 {
                canvas.put_pixel(cx, cy, *p);
            }
        }

        frames.push(Frame::new(canvas.clone(), patch.delay_ms));

        match patch.disposal {
            Disposal::Background => {
                let x_end = patch.left.saturating_add(pw).min(width);
                let y_end = patch.top.saturating_add(ph).min(height);
                for cy in patch.top.min(height)..y_end {
                    for cx in patch.left.min(width)..x_end {
                        canvas.put_pixel(cx, cy, Rgba([0, 0, 0, 0]));
                    }
                }
            }
            Disposal::Keep | Disposal::Previous => {}
        }
    }

    Ok(frames)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which frames a destructive edit on an animated source touches.
pub enum FrameScope {
    Current,
    All,
}

#[derive(Debug, Clone)]
/// Decoded frames plus the playback cursor. Frames are read-only once built.
pub struct MultiFrameSource {
    frames: Vec<Frame>,
    current_index: usize,
    playing: bool,
    elapsed_in_frame_ms: u32,
    default_delay_ms: u32,
}

impl MultiFrameSource {
    pub fn new(frames: Vec<Frame>, default_delay_ms: u32) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(EngineError::decode("animation contains no frames"));
        };
        let expected = first.pixels.dimensions();
        for frame in &frames[1..] {
            ensure_dimensions(expected, frame.pixels.dimensions())?;
        }
        Ok(Self {
            frames,
            current_index: 0,
            playing: false,
            elapsed_in_frame_ms: 0,
            default_delay_ms: default_delay_ms.max(1),
        })
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.frames[0].pixels.dimensions()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> &Frame {
        &self.frames[self.current_index]
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Display time for frame `index`, substituting the default for zero delays.
    pub fn effective_delay_ms(&self, index: usize) -> u32 {
        match self.frames.get(index).map(|f| f.delay_ms) {
            Some(0) | None => self.default_delay_ms,
            Some(d) => d,
        }
    }

    /// Jumps to `index` and stops playback.
    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.frames.len() {
            return Err(EngineError::invalid(format!(
                "frame {index} out of range ({} frames)",
                self.frames.len()
            )));
        }
        self.pause();
        self.current_index = index;
        Ok(())
    }

    pub fn next(&mut self) {
        self.pause();
        self.current_index = (self.current_index + 1) % self.frames.len();
    }

    pub fn previous(&mut self) {
        self.pause();
        self.current_index = (self.current_index + self.frames.len() - 1) % self.frames.len();
    }

    pub fn play(&mut self) {
        if self.frames.len() > 1 && !self.playing {
            debug!(frame = self.current_index, "playback started");
            self.playing = true;
            self.elapsed_in_frame_ms = 0;
        }
    }

    pub fn pause(&mut self) {
        if self.playing {
            debug!(frame = self.current_index, "playback stopped");
        }
        self.playing = false;
        self.elapsed_in_frame_ms = 0;
    }

    /// Advances playback by `elapsed_ms`, wrapping at the last frame.
    /// Returns whether the current frame changed.
    pub fn tick(&mut self, elapsed_ms: u32) -> bool {
        if !self.playing {
            return false;
        }
        let start = self.current_index;
        let mut budget = self.elapsed_in_frame_ms.saturating_add(elapsed_ms);
        // Whole loops land back on the same frame at the same offset.
        let cycle: u64 = (0..self.frames.len())
            .map(|i| u64::from(self.effective_delay_ms(i)))
            .sum();
        if u64::from(budget) >= cycle {
            budget = (u64::from(budget) % cycle) as u32;
        }
        loop {
            let delay = self.effective_delay_ms(self.current_index);
            if budget < delay {
                break;
            }
            budget -= delay;
            self.current_index = (self.current_index + 1) % self.frames.len();
        }
        self.elapsed_in_frame_ms = budget;
        self.current_index != start
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgba, RgbaImage};

    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn patch(left: u32, top: u32, w: u32, h: u32, c: Rgba<u8>, disposal: Disposal) -> FramePatch {
        FramePatch {
            left,
            top,
            pixels: ImageBuffer::from_pixel(w, h, c),
            delay_ms: 50,
            disposal,
        }
    }

    fn source(delays: &[u32]) -> MultiFrameSource {
        let frames = delays
            .iter()
            .map(|d| Frame::new(RgbaImage::new(2, 2), *d))
            .collect();
        MultiFrameSource::new(frames, 100).unwrap()
    }

    #[test]
    fn keep_disposal_accumulates_patches() {
        let frames = compose_patches(
            3,
            1,
            &[
                patch(0, 0, 1, 1, RED, Disposal::Keep),
                patch(2, 0, 1, 1, BLUE, Disposal::Keep),
            ],
        )
        .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(*frames[1].pixels.get_pixel(0, 0), RED);
        assert_eq!(*frames[1].pixels.get_pixel(2, 0), BLUE);
    }

    #[test]
    fn background_disposal_clears_patch_after_capture() {
        let frames = compose_patches(
            2,
            1,
            &[
                patch(0, 0, 1, 1, RED, Disposal::Background),
                patch(1, 0, 1, 1, BLUE, Disposal::Keep),
            ],
        )
        .unwrap();
        assert_eq!(*frames[0].pixels.get_pixel(0, 0), RED);
        assert_eq!(frames[1].pixels.get_pixel(0, 0)[3], 0);
        assert_eq!(*frames[1].pixels.get_pixel(1, 0), BLUE);
    }

    #[test]
    fn previous_disposal_currently_behaves_like_keep() {
        let frames = compose_patches(
            2,
            1,
            &[
                patch(0, 0, 1, 1, RED, Disposal::Keep),
                patch(0, 0, 2, 1, BLUE, Disposal::Previous),
                patch(1, 0, 1, 1, Rgba([0, 0, 0, 0]), Disposal::Keep),
            ],
        )
        .unwrap();
        // A full restore would bring back RED at (0, 0); the canvas keeps BLUE.
        assert_eq!(*frames[2].pixels.get_pixel(0, 0), BLUE);
        assert_eq!(*frames[2].pixels.get_pixel(1, 0), BLUE);
    }

    #[test]
    fn transparent_patch_pixels_do_not_overwrite() {
        let frames = compose_patches(
            1,
            1,
            &[
                patch(0, 0, 1, 1, RED, Disposal::Keep),
                patch(0, 0, 1, 1, Rgba([0, 255, 0, 0]), Disposal::Keep),
            ],
        )
        .unwrap();
        assert_eq!(*frames[1].pixels.get_pixel(0, 0), RED);
    }

    #[test]
    fn patches_outside_canvas_are_clipped() {
        let frames =
            compose_patches(2, 2, &[patch(1, 1, 4, 4, RED, Disposal::Background)]).unwrap();
        assert_eq!(*frames[0].pixels.get_pixel(1, 1), RED);
        assert_eq!(frames[0].pixels.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn empty_animation_is_a_decode_failure() {
        assert!(matches!(
            compose_patches(2, 2, &[]),
            Err(EngineError::DecodeFailure { .. })
        ));
    }

    #[test]
    fn frames_must_share_dimensions() {
        let frames = vec![
            Frame::new(RgbaImage::new(2, 2), 10),
            Frame::new(RgbaImage::new(3, 2), 10),
        ];
        assert!(matches!(
            MultiFrameSource::new(frames, 100),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn tick_uses_default_for_zero_delay_and_wraps() {
        let mut src = source(&[0, 30, 30]);
        src.play();
        assert!(!src.tick(99));
        assert!(src.tick(1));
        assert_eq!(src.current_index(), 1);
        assert!(src.tick(60));
        assert_eq!(src.current_index(), 0);
    }

    #[test]
    fn long_ticks_skip_whole_loops() {
        let mut src = source(&[1, 1]);
        src.play();
        assert!(src.tick(u32::MAX));
        assert_eq!(src.current_index(), 1);

        let mut src = source(&[10, 20]);
        src.play();
        assert!(src.tick(30 * 1_000_000 + 15));
        assert_eq!(src.current_index(), 1);
        assert!(!src.tick(14));
        assert!(src.tick(1));
        assert_eq!(src.current_index(), 0);
    }

    #[test]
    fn selecting_a_frame_stops_playback() {
        let mut src = source(&[10, 10, 10]);
        src.play();
        assert!(src.is_playing());
        src.select(2).unwrap();
        assert!(!src.is_playing());
        assert_eq!(src.current_index(), 2);
        assert!(!src.tick(1000));
        assert!(src.select(3).is_err());
    }

    #[test]
    fn next_and_previous_wrap() {
        let mut src = source(&[10, 10]);
        src.previous();
        assert_eq!(src.current_index(), 1);
        src.next();
        assert_eq!(src.current_index(), 0);
    }

    #[test]
    fn single_frame_never_plays() {
        let mut src = source(&[10]);
        src.play();
        assert!(!src.is_playing());
    }
}
