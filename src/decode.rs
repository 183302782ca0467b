use std::io::Cursor;

use image::{ImageBuffer, RgbaImage};

use crate::error::{EngineError, Result};
use crate::frames::{Disposal, Frame, FramePatch, compose_patches};

static ANIMATED_EXTS: &[&str] = &["gif"];

/// Returns `true` if the file name has an extension decoded as animation.
pub fn is_animated_name(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    ANIMATED_EXTS.iter().any(|known| ext.eq_ignore_ascii_case(known))
}

/// Returns `true` when the bytes start with a GIF signature.
pub fn looks_animated(bytes: &[u8]) -> bool {
    bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")
}

/// Decodes a still image of any format the `image` crate understands.
pub fn decode_still(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes).map_err(EngineError::decode)?;
    let rgba = img.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(EngineError::decode("image has no pixels"));
    }
    Ok(rgba)
}

/// Decodes every frame of an animated GIF, composing partial frames onto a
/// full-size canvas. GIF delays are in centiseconds.
pub fn decode_animated(bytes: &[u8]) -> Result<Vec<Frame>> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut decoder = options
        .read_info(Cursor::new(bytes))
        .map_err(EngineError::decode)?;

    let width = decoder.width() as u32;
    let height = decoder.height() as u32;

    let mut patches = Vec::new();
    while let Some(frame) = decoder.read_next_frame().map_err(EngineError::decode)? {
        let pixels: RgbaImage = ImageBuffer::from_raw(
            frame.width as u32,
            frame.height as u32,
            frame.buffer.to_vec(),
        )
        .ok_or_else(|| EngineError::decode("frame buffer is shorter than its declared size"))?;

        patches.push(FramePatch {
            left: frame.left as u32,
            top: frame.top as u32,
            pixels,
            delay_ms: frame.delay as u32 * 10,
            disposal: match frame.dispose {
                gif::DisposalMethod::Background => Disposal::Background,
                gif::DisposalMethod::Previous => Disposal::Previous,
                gif::DisposalMethod::Any | gif::DisposalMethod::Keep => Disposal::Keep,
            },
        });
    }

    compose_patches(width, height, &patches)
}

/// Decodes `bytes` as an animation when they carry a GIF signature,
/// otherwise as a single still frame.
pub fn decode_any(bytes: &[u8]) -> Result<Vec<Frame>> {
    if looks_animated(bytes) {
        decode_animated(bytes)
    } else {
        Ok(vec![Frame::new(decode_still(bytes)?, 0)])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage};

    use super::*;

    fn encode_gif(frames: &[(RgbaImage, u16, gif::DisposalMethod)]) -> Vec<u8> {
        let (w, h) = frames[0].0.dimensions();
        let mut bytes = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut bytes, w as u16, h as u16, &[]).unwrap();
            for (img, delay, dispose) in frames {
                let mut raw = img.as_raw().clone();
                let mut frame = gif::Frame::from_rgba_speed(
                    img.width() as u16,
                    img.height() as u16,
                    &mut raw,
                    10,
                );
                frame.delay = *delay;
                frame.dispose = *dispose;
                encoder.write_frame(&frame).unwrap();
            }
        }
        bytes
    }

    #[test]
    fn animated_gif_decodes_every_frame() {
        let red: RgbaImage = ImageBuffer::from_pixel(4, 3, Rgba([255, 0, 0, 255]));
        let blue: RgbaImage = ImageBuffer::from_pixel(4, 3, Rgba([0, 0, 255, 255]));
        let bytes = encode_gif(&[
            (red, 5, gif::DisposalMethod::Keep),
            (blue, 0, gif::DisposalMethod::Keep),
        ]);

        assert!(looks_animated(&bytes));
        let frames = decode_animated(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].delay_ms, 50);
        assert_eq!(frames[1].delay_ms, 0);
        assert_eq!((frames[1].width(), frames[1].height()), (4, 3));
        assert_eq!(*frames[0].pixels.get_pixel(1, 1), Rgba([255, 0, 0, 255]));
        assert_eq!(*frames[1].pixels.get_pixel(1, 1), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn still_png_decodes_to_single_frame() {
        let img: RgbaImage = ImageBuffer::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        assert!(!looks_animated(&bytes));
        let frames = decode_any(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(*frames[0].pixels, img);
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        assert!(matches!(
            decode_still(b"not an image"),
            Err(EngineError::DecodeFailure { .. })
        ));
        assert!(matches!(
            decode_animated(b"GIF89a\x01"),
            Err(EngineError::DecodeFailure { .. })
        ));
    }

    #[test]
    fn animated_extension_check_is_case_insensitive() {
        assert!(is_animated_name("loop.GIF"));
        assert!(!is_animated_name("photo.png"));
        assert!(!is_animated_name("gif"));
    }
}
