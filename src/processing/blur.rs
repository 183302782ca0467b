use image::RgbaImage;
use imageproc::filter::gaussian_blur_f32;

/// Gaussian blur where `radius` is the standard deviation in pixels, matching
/// the CSS `blur()` convention. Radii at or below zero leave the image as-is.
///
/// The kernel grows with sigma, so sigma is capped at the longer image side.
/// Past that point the result is already a near-flat average.
pub fn apply(img: RgbaImage, radius: f32) -> RgbaImage {
    if radius.is_nan() || radius <= 0.0 || img.width() == 0 || img.height() == 0 {
        return img;
    }
    let sigma = radius.min(img.width().max(img.height()) as f32);
    gaussian_blur_f32(&img, sigma)
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgba, RgbaImage};

    use super::apply;

    #[test]
    fn zero_radius_is_identity() {
        let img: RgbaImage =
            ImageBuffer::from_fn(4, 4, |x, y| Rgba([(x * 60) as u8, (y * 60) as u8, 7, 255]));
        let out = apply(img.clone(), 0.0);
        assert_eq!(img, out);
    }

    #[test]
    fn positive_radius_softens_edges() {
        // Left half dark, right half bright
        let mut buf = ImageBuffer::from_pixel(8, 1, Rgba([200u8, 200, 200, 255]));
        for x in 0..4 {
            buf.put_pixel(x, 0, Rgba([50, 50, 50, 255]));
        }
        let out = apply(buf.clone(), 1.5);
        assert!(out.get_pixel(3, 0)[0] > 50);
        assert!(out.get_pixel(4, 0)[0] < 200);
    }

    #[test]
    fn huge_radius_is_capped_to_image_size() {
        let mut buf = ImageBuffer::from_pixel(2, 2, Rgba([255u8, 255, 255, 255]));
        buf.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        buf.put_pixel(0, 1, Rgba([0, 0, 0, 255]));
        let out = apply(buf, 1.0e9);
        assert_eq!(out.dimensions(), (2, 2));
        let spread = out.get_pixel(1, 0)[0].abs_diff(out.get_pixel(0, 0)[0]);
        assert!(spread < 255);
    }

    #[test]
    fn infinite_radius_is_capped_too() {
        let img: RgbaImage = ImageBuffer::from_pixel(3, 1, Rgba([90u8, 90, 90, 255]));
        let out = apply(img, f32::INFINITY);
        assert_eq!(out.dimensions(), (3, 1));
    }
}
