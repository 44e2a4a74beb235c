//! Format name → reader/writer lookup.
//!
//! A registry is an explicit value built once (usually through
//! [`FormatRegistry::with_defaults`]) and passed by reference. Formats are
//! matched case-insensitively. A format may list several readers; they are
//! tried in order and each failure is logged before the next attempt.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{MediaError, ReframeError, Result};
use crate::media::MediaSource;
use crate::reader::{BoxedReader, FrameListReader, StillReader};
use crate::writer::{BoxedWriter, GifWriter, StillWriter, WriterOptions};

#[cfg(feature = "ffmpeg")]
use crate::reader::NativeReader;
#[cfg(feature = "ffmpeg")]
use crate::writer::NativeWriter;

/// Opens a reader for a source
pub type ReaderFactory = fn(&MediaSource) -> Result<BoxedReader>;

/// Opens a writer for a set of options
pub type WriterFactory = fn(WriterOptions) -> Result<BoxedWriter>;

/// Raster formats handled by [`StillReader`] and [`StillWriter`]
pub const STILL_FORMATS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "ico"];

fn open_still(source: &MediaSource) -> Result<BoxedReader> {
    Ok(Box::new(StillReader::open(source)?))
}

fn open_frame_list(source: &MediaSource) -> Result<BoxedReader> {
    Ok(Box::new(FrameListReader::open(source)?))
}

fn create_gif(options: WriterOptions) -> Result<BoxedWriter> {
    Ok(Box::new(GifWriter::new(options)))
}

fn create_still(options: WriterOptions) -> Result<BoxedWriter> {
    Ok(Box::new(StillWriter::new(options)?))
}

#[cfg(feature = "ffmpeg")]
fn open_native(source: &MediaSource) -> Result<BoxedReader> {
    Ok(Box::new(NativeReader::open(source)?))
}

#[cfg(feature = "ffmpeg")]
fn create_native(options: WriterOptions) -> Result<BoxedWriter> {
    Ok(Box::new(NativeWriter::new(options)?))
}

/// Registry of readers and writers by format name
pub struct FormatRegistry {
    readers: HashMap<String, Vec<ReaderFactory>>,
    writers: HashMap<String, WriterFactory>,
    fallback_reader: Option<ReaderFactory>,
    fallback_writer: Option<WriterFactory>,
}

impl FormatRegistry {
    /// An empty registry without fallbacks
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
            writers: HashMap::new(),
            fallback_reader: None,
            fallback_writer: None,
        }
    }

    /// Registry with every built-in reader and writer
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        for format in STILL_FORMATS {
            registry.register_reader(format, open_still);
            registry.register_writer(format, create_still);
        }
        registry.register_reader("wbmp", open_still);
        registry.register_reader("gif", open_frame_list);
        registry.register_reader("webp", open_frame_list);
        registry.register_reader("webp", open_still);
        registry.register_writer("gif", create_gif);

        #[cfg(feature = "ffmpeg")]
        {
            registry.fallback_reader = Some(open_native);
            registry.fallback_writer = Some(create_native);
        }
        registry
    }

    /// Append a reader candidate for `format`
    pub fn register_reader(&mut self, format: &str, factory: ReaderFactory) {
        self.readers
            .entry(format.to_lowercase())
            .or_default()
            .push(factory);
    }

    /// Set the writer for `format`, replacing any previous one
    pub fn register_writer(&mut self, format: &str, factory: WriterFactory) {
        self.writers.insert(format.to_lowercase(), factory);
    }

    /// Reader used for formats without a registered candidate
    pub fn set_fallback_reader(&mut self, factory: Option<ReaderFactory>) {
        self.fallback_reader = factory;
    }

    /// Writer used for formats without a registered writer
    pub fn set_fallback_writer(&mut self, factory: Option<WriterFactory>) {
        self.fallback_writer = factory;
    }

    pub fn has_reader(&self, format: &str) -> bool {
        self.readers.contains_key(&format.to_lowercase()) || self.fallback_reader.is_some()
    }

    pub fn has_writer(&self, format: &str) -> bool {
        self.writers.contains_key(&format.to_lowercase()) || self.fallback_writer.is_some()
    }

    /// Open a reader, trying each candidate for the source's format in turn
    pub fn open_reader(&self, source: &MediaSource) -> Result<BoxedReader> {
        let format = source.format();
        let candidates: Vec<ReaderFactory> = match self.readers.get(&format) {
            Some(list) => list.clone(),
            None => self.fallback_reader.into_iter().collect(),
        };
        if candidates.is_empty() {
            return Err(MediaError::UnsupportedFormat { format }.into());
        }

        let mut last_error: Option<ReframeError> = None;
        for (attempt, open) in candidates.iter().enumerate() {
            match open(source) {
                Ok(reader) => {
                    debug!(
                        "Opened {} with reader candidate {} of {}",
                        source.describe(),
                        attempt + 1,
                        candidates.len()
                    );
                    return Ok(reader);
                }
                Err(e) => {
                    warn!(
                        "Reader candidate {} of {} failed for {}: {}",
                        attempt + 1,
                        candidates.len(),
                        source.describe(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MediaError::UnsupportedFormat { format }.into()))
    }

    /// Open the writer for `options.format`
    pub fn open_writer(&self, options: WriterOptions) -> Result<BoxedWriter> {
        let factory = self
            .writers
            .get(&options.format.to_lowercase())
            .copied()
            .or(self.fallback_writer)
            .ok_or_else(|| MediaError::UnsupportedFormat {
                format: options.format.clone(),
            })?;
        factory(options)
    }

    /// Formats with a registered reader, sorted
    pub fn reader_formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.readers.keys().cloned().collect();
        formats.sort();
        formats
    }

    /// Formats with a registered writer, sorted
    pub fn writer_formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.writers.keys().cloned().collect();
        formats.sort();
        formats
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn failing(_: &MediaSource) -> Result<BoxedReader> {
        Err(MediaError::Decode {
            reason: "first candidate".to_string(),
        }
        .into())
    }

    fn also_failing(_: &MediaSource) -> Result<BoxedReader> {
        Err(MediaError::Decode {
            reason: "second candidate".to_string(),
        }
        .into())
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let registry = FormatRegistry::with_defaults();
        let reader = registry
            .open_reader(&MediaSource::bytes(png_bytes(), "PNG"))
            .unwrap();

        assert_eq!(reader.info().width, 3);
        assert!(registry.has_writer("GIF"));
    }

    #[test]
    fn test_falls_through_to_next_candidate() {
        let mut registry = FormatRegistry::new();
        registry.register_reader("png", failing);
        registry.register_reader("png", open_still);

        let reader = registry.open_reader(&MediaSource::bytes(png_bytes(), "png"));
        assert!(reader.is_ok());
    }

    #[test]
    fn test_reports_last_failure() {
        let mut registry = FormatRegistry::new();
        registry.register_reader("png", failing);
        registry.register_reader("png", also_failing);

        let error = registry
            .open_reader(&MediaSource::bytes(png_bytes(), "png"))
            .err()
            .unwrap();
        assert!(error.to_string().contains("second candidate"));
    }

    #[test]
    fn test_unknown_format_without_fallback() {
        let mut registry = FormatRegistry::with_defaults();
        registry.set_fallback_reader(None);
        registry.set_fallback_writer(None);

        let reader = registry.open_reader(&MediaSource::bytes(vec![0; 4], "xyz"));
        assert!(matches!(
            reader.err(),
            Some(ReframeError::Media(MediaError::UnsupportedFormat { .. }))
        ));

        let options = WriterOptions::from_config("out.xyz", "xyz", &Config::default());
        assert!(registry.open_writer(options).is_err());
    }

    #[test]
    fn test_webp_lists_two_candidates() {
        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.readers.get("webp").map(Vec::len), Some(2));
        assert!(registry.reader_formats().contains(&"gif".to_string()));
        assert!(!registry.writer_formats().contains(&"webp".to_string()));
    }

    #[test]
    fn test_wbmp_still_is_readable() {
        let registry = FormatRegistry::with_defaults();
        let bytes = vec![0x00, 0x00, 0x03, 0x01, 0b1010_0000];
        let mut reader = registry
            .open_reader(&MediaSource::bytes(bytes, "WBMP"))
            .unwrap();

        assert_eq!((reader.info().width, reader.info().height), (3, 1));
        assert!(!reader.info().is_animated());
        let frame = reader.first().unwrap();
        assert_eq!(frame.content().get_pixel(1, 0).0, [0, 0, 0, 255]);
        assert_eq!(frame.content().get_pixel(2, 0).0, [255, 255, 255, 255]);
        assert!(!registry.writer_formats().contains(&"wbmp".to_string()));
    }
}
