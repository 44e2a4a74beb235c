//! # Pixel Effects
//!
//! Stateless image mappers, usable with
//! [`ImageProcessor::map_pixels`](crate::processor::ImageProcessor::map_pixels)
//! or looked up by name through [`EffectRegistry`].

pub mod registry;

pub use registry::EffectRegistry;

use image::{imageops, RgbaImage};
use rayon::prelude::*;

/// Scanline strength used by the named `scanlines` effect
pub const DEFAULT_SCANLINE_INTENSITY: f32 = 0.8;

/// Convert to luma (Rec. 601), keeping alpha
pub fn grayscale(mut image: RgbaImage) -> RgbaImage {
    image.par_chunks_mut(4).for_each(|pixel| {
        let luma = (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32)
            .round()
            .min(255.0) as u8;
        pixel[0] = luma;
        pixel[1] = luma;
        pixel[2] = luma;
    });
    image
}

/// Invert colour channels, keeping alpha
pub fn invert(mut image: RgbaImage) -> RgbaImage {
    image.par_chunks_mut(4).for_each(|pixel| {
        pixel[0] = 255 - pixel[0];
        pixel[1] = 255 - pixel[1];
        pixel[2] = 255 - pixel[2];
    });
    image
}

pub fn flip_horizontal(image: RgbaImage) -> RgbaImage {
    imageops::flip_horizontal(&image)
}

pub fn flip_vertical(image: RgbaImage) -> RgbaImage {
    imageops::flip_vertical(&image)
}

pub fn rotate180(image: RgbaImage) -> RgbaImage {
    imageops::rotate180(&image)
}

/// CRT-style scanlines at the default intensity
pub fn scanlines(image: RgbaImage) -> RgbaImage {
    scanlines_with(image, DEFAULT_SCANLINE_INTENSITY)
}

/// Darken alternating rows, with a heavier line every eighth row
pub fn scanlines_with(mut image: RgbaImage, intensity: f32) -> RgbaImage {
    let intensity = intensity.clamp(0.0, 1.0);
    let row_len = image.width() as usize * 4;
    if row_len == 0 {
        return image;
    }

    image
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let mut factor = if y % 2 == 0 {
                1.0 - intensity * 0.4
            } else {
                1.0 - intensity * 0.2
            };
            if y % 8 == 0 && intensity > 0.5 {
                factor *= 0.7;
            }

            for pixel in row.chunks_exact_mut(4) {
                pixel[0] = (pixel[0] as f32 * factor) as u8;
                pixel[1] = (pixel[1] as f32 * factor) as u8;
                pixel[2] = (pixel[2] as f32 * factor) as u8;
            }
        });
    image
}
