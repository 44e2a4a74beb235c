use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::media::ImageFrame;
use crate::writer::{MediaWriter, WriterOptions};

/// Largest icon edge
pub const ICO_MAX_SIZE: u32 = 256;

/// Single-image writer for png, jpg/jpeg, bmp, tif/tiff and ico
///
/// Keeps the first frame it receives and encodes it on close. Later frames
/// are ignored.
pub struct StillWriter {
    options: WriterOptions,
    format: ImageFormat,
    image: Option<RgbaImage>,
    ignored: usize,
    closed: bool,
}

impl StillWriter {
    pub fn new(options: WriterOptions) -> Result<Self> {
        let format = ImageFormat::from_extension(&options.format)
            .filter(|format| {
                matches!(
                    format,
                    ImageFormat::Png
                        | ImageFormat::Jpeg
                        | ImageFormat::Bmp
                        | ImageFormat::Tiff
                        | ImageFormat::Ico
                )
            })
            .ok_or_else(|| MediaError::UnsupportedFormat {
                format: options.format.clone(),
            })?;

        Ok(Self {
            options,
            format,
            image: None,
            ignored: 0,
            closed: false,
        })
    }

    /// Convert to what the target format can store
    fn prepare(&self, image: RgbaImage) -> DynamicImage {
        match self.format {
            ImageFormat::Png | ImageFormat::Tiff => DynamicImage::ImageRgba8(image),
            ImageFormat::Ico => {
                let (width, height) = image.dimensions();
                if width <= ICO_MAX_SIZE && height <= ICO_MAX_SIZE {
                    return DynamicImage::ImageRgba8(image);
                }
                let scale = (ICO_MAX_SIZE as f64 / width as f64).min(ICO_MAX_SIZE as f64 / height as f64);
                let target_w = ((width as f64 * scale).round() as u32).clamp(1, ICO_MAX_SIZE);
                let target_h = ((height as f64 * scale).round() as u32).clamp(1, ICO_MAX_SIZE);
                debug!("Shrinking icon from {}x{} to {}x{}", width, height, target_w, target_h);
                DynamicImage::ImageRgba8(imageops::thumbnail(&image, target_w, target_h))
            }
            _ => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        }
    }
}

impl MediaWriter for StillWriter {
    fn write_image(&mut self, frame: ImageFrame) -> Result<()> {
        if self.closed {
            return Err(MediaError::WriterClosed {
                path: self.options.describe(),
            }
            .into());
        }
        if self.image.is_none() {
            self.image = Some(frame.into_content());
        } else {
            self.ignored += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let Some(image) = self.image.take() else {
            warn!("Still writer for {} closed without frames", self.options.describe());
            return Ok(());
        };
        if self.ignored > 0 {
            debug!("Still output keeps the first frame, {} ignored", self.ignored);
        }

        let (width, height) = image.dimensions();
        self.prepare(image)
            .save_with_format(&self.options.path, self.format)?;
        info!("Image written: {} ({}x{})", self.options.describe(), width, height);
        Ok(())
    }
}

impl Drop for StillWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::media::Frame;
    use image::{GenericImageView, Rgba};
    use tempfile::tempdir;

    fn still(path: &std::path::Path, format: &str) -> StillWriter {
        StillWriter::new(WriterOptions::from_config(path, format, &Config::default())).unwrap()
    }

    #[test]
    fn test_png_keeps_first_frame_and_alpha() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut writer = still(&path, "png");

        writer
            .write_image(Frame::new(RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 100])), 10, 0))
            .unwrap();
        writer
            .write_image(Frame::new(RgbaImage::from_pixel(4, 3, Rgba([9, 9, 9, 255])), 10, 10))
            .unwrap();
        writer.close().unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0).0, [1, 2, 3, 100]);
    }

    #[test]
    fn test_jpeg_is_flattened() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        let mut writer = still(&path, "JPG");

        writer
            .write_image(Frame::new(RgbaImage::from_pixel(8, 8, Rgba([200, 10, 10, 0])), 10, 0))
            .unwrap();
        writer.close().unwrap();

        let decoded = image::open(&path).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn test_ico_is_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ico");
        let mut writer = still(&path, "ico");

        writer
            .write_image(Frame::new(RgbaImage::from_pixel(512, 300, Rgba([0, 0, 0, 255])), 10, 0))
            .unwrap();
        writer.close().unwrap();

        let (width, height) = image::open(&path).unwrap().dimensions();
        assert_eq!(width, 256);
        assert!(height <= 256);
    }

    #[test]
    fn test_rejects_non_still_format() {
        let options = WriterOptions::from_config("out.mp4", "mp4", &Config::default());
        assert!(StillWriter::new(options).is_err());
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempdir().unwrap();
        let mut writer = still(&dir.path().join("out.bmp"), "bmp");
        writer.close().unwrap();

        let result = writer.write_image(Frame::new(RgbaImage::new(1, 1), 10, 0));
        assert!(result.is_err());
        assert!(!dir.path().join("out.bmp").exists());
    }
}
