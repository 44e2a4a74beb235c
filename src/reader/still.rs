use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::error::{MediaError, Result};
use crate::media::{stack_durations, Frame, FrameTime, ImageFrame, MediaInfo, MediaSource};
use crate::reader::{FrameIter, MediaReader};

/// Display duration given to a single still image (1/30 s)
pub const STILL_FRAME_DURATION: u64 = 33_333;

/// Read a WBMP multi-byte integer (7 bits per byte, high bit continues)
fn read_multibyte(bytes: &mut impl Iterator<Item = u8>) -> Option<u32> {
    let mut value: u32 = 0;
    for _ in 0..5 {
        let byte = bytes.next()?;
        value = value.checked_mul(128)? | u32::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

/// Decode a type 0 WBMP: monochrome, one bit per pixel, rows padded to bytes
pub fn decode_wbmp(bytes: &[u8]) -> std::result::Result<RgbaImage, String> {
    let mut header = bytes.iter().copied();
    let image_type = read_multibyte(&mut header).ok_or("truncated header")?;
    if image_type != 0 {
        return Err(format!("unsupported WBMP type {}", image_type));
    }
    let fix_header = header.next().ok_or("truncated header")?;
    if fix_header & 0x80 != 0 {
        return Err("extension headers are not supported".to_string());
    }
    let width = read_multibyte(&mut header).ok_or("invalid width")?;
    let height = read_multibyte(&mut header).ok_or("invalid height")?;
    if width == 0 || height == 0 {
        return Err(format!("empty {}x{} image", width, height));
    }

    let data = &bytes[bytes.len() - header.count()..];
    let stride = (width as usize + 7) / 8;
    let needed = stride
        .checked_mul(height as usize)
        .ok_or("image too large")?;
    if data.len() < needed {
        return Err(format!("expected {} bytes of pixel data, found {}", needed, data.len()));
    }

    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let byte = data[y as usize * stride + x as usize / 8];
        if byte & (0x80 >> (x % 8)) != 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    }))
}

/// One-frame reader for raster images
pub struct StillReader {
    image: RgbaImage,
    info: MediaInfo,
}

impl StillReader {
    /// Decode a raster image with the `image` crate
    pub fn open(source: &MediaSource) -> Result<Self> {
        let bytes = source.read_bytes()?;
        let format = source.format();

        if format == "wbmp" {
            let image = decode_wbmp(&bytes).map_err(|reason| MediaError::Unreadable {
                path: source.describe(),
                reason,
            })?;
            debug!("Decoded WBMP {} ({}x{})", source.describe(), image.width(), image.height());
            return Ok(Self::from_image(&format, image));
        }

        let decoded = match image::ImageFormat::from_extension(&format) {
            Some(image_format) => image::load_from_memory_with_format(&bytes, image_format),
            None => image::load_from_memory(&bytes),
        }
        .map_err(|e| MediaError::Unreadable {
            path: source.describe(),
            reason: e.to_string(),
        })?;

        debug!("Decoded still image {} ({}x{})", source.describe(), decoded.width(), decoded.height());
        Ok(Self::from_image(&format, decoded.to_rgba8()))
    }

    /// Wrap an already decoded image
    pub fn from_image(format: &str, image: RgbaImage) -> Self {
        let times = stack_durations([STILL_FRAME_DURATION]);
        let info = MediaInfo::from_times(format, &times, image.width(), image.height());
        Self { image, info }
    }

    fn frame(&self) -> ImageFrame {
        Frame::new(self.image.clone(), STILL_FRAME_DURATION, 0)
    }
}

impl MediaReader for StillReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn frame_times(&mut self) -> Result<Vec<FrameTime>> {
        Ok(vec![FrameTime::new(0, STILL_FRAME_DURATION)])
    }

    fn frame_at(&mut self, _timestamp: u64) -> Result<ImageFrame> {
        Ok(self.frame())
    }

    fn frames(&mut self) -> Result<FrameIter<'_>> {
        Ok(Box::new(std::iter::once(Ok(self.frame()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    #[test]
    fn test_png_is_static() {
        let mut reader = StillReader::open(&MediaSource::bytes(png_bytes(8, 6), "png")).unwrap();

        assert_eq!(reader.info().frame_count, 1);
        assert!(!reader.info().is_animated());
        assert_eq!((reader.info().width, reader.info().height), (8, 6));

        let frame = reader.frame_at(1_000_000).unwrap();
        assert_eq!(frame.timestamp(), 0);
        assert_eq!(frame.content().get_pixel(0, 0)[2], 30);
        assert_eq!(reader.frames().unwrap().count(), 1);
    }

    #[test]
    fn test_garbage_is_unreadable() {
        let result = StillReader::open(&MediaSource::bytes(vec![1, 2, 3, 4], "png"));
        assert!(matches!(
            result,
            Err(crate::ReframeError::Media(MediaError::Unreadable { .. }))
        ));
    }

    #[test]
    fn test_wbmp_decodes_monochrome() {
        // type 0, fixed header 0, 10x2, two bytes per row
        let bytes = vec![0x00, 0x00, 0x0a, 0x02, 0b1000_0001, 0b0100_0000, 0xff, 0x00];
        let mut reader = StillReader::open(&MediaSource::bytes(bytes, "wbmp")).unwrap();

        assert_eq!((reader.info().width, reader.info().height), (10, 2));
        let frame = reader.first().unwrap();
        let image = frame.content();
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(7, 0).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(9, 0).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(8, 1).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(3, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_wbmp_multibyte_width_and_truncation() {
        // width 200 = 0x81 0x48
        let mut bytes = vec![0x00, 0x00, 0x81, 0x48, 0x01];
        bytes.extend(std::iter::repeat(0).take(25));
        assert_eq!(decode_wbmp(&bytes).unwrap().width(), 200);

        bytes.truncate(20);
        assert!(decode_wbmp(&bytes).is_err());
        assert!(decode_wbmp(&[0x02, 0x00, 0x01, 0x01, 0x00]).is_err());
    }
}
