//! Mild sharpening applied to every rendered page before it is written.
//!
//! The kernel keeps its centre weight at 2 and spreads −1 over the four
//! orthogonal neighbours, so flat regions are unchanged (weights sum to 1)
//! while glyph edges gain contrast. Border pixels are copied through
//! untouched.

use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};

/// 3×3 kernel, row-major.
pub const SHARPEN_KERNEL: [f32; 9] = [0.0, -0.25, 0.0, -0.25, 2.0, -0.25, 0.0, -0.25, 0.0];

pub fn sharpen(img: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageRgba8(sharpen_rgba(&img.to_rgba8()))
}

fn sharpen_rgba(src: &RgbaImage) -> RgbaImage {
    let (w, h) = src.dimensions();
    let mut out: RgbaImage = ImageBuffer::new(w, h);
    for (x, y, px) in out.enumerate_pixels_mut() {
        if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
            *px = *src.get_pixel(x, y);
            continue;
        }
        let mut acc = [0f32; 3];
        for ky in 0..3u32 {
            for kx in 0..3u32 {
                let weight = SHARPEN_KERNEL[(ky * 3 + kx) as usize];
                if weight == 0.0 {
                    continue;
                }
                let p = src.get_pixel(x + kx - 1, y + ky - 1);
                for (c, a) in acc.iter_mut().enumerate() {
                    *a += weight * p[c] as f32;
                }
            }
        }
        let alpha = src.get_pixel(x, y)[3];
        *px = Rgba([clamp(acc[0]), clamp(acc[1]), clamp(acc[2]), alpha]);
    }
    out
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_is_unchanged() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([120, 60, 200, 255])));
        let out = sharpen(&img).to_rgba8();
        assert!(out.pixels().all(|p| *p == Rgba([120, 60, 200, 255])));
    }

    #[test]
    fn edge_contrast_increases() {
        let mut src = RgbaImage::from_pixel(6, 6, Rgba([200, 200, 200, 255]));
        for y in 0..6 {
            for x in 3..6 {
                src.put_pixel(x, y, Rgba([40, 40, 40, 255]));
            }
        }
        let out = sharpen(&DynamicImage::ImageRgba8(src)).to_rgba8();
        // light side of the edge gets lighter, dark side darker
        assert!(out.get_pixel(2, 2)[0] > 200);
        assert!(out.get_pixel(3, 2)[0] < 40);
    }

    #[test]
    fn tiny_images_survive() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 2, Rgba([1, 2, 3, 4])));
        let out = sharpen(&img);
        assert_eq!((out.width(), out.height()), (1, 2));
    }
}
