use std::path::{Path, PathBuf};

use crate::media::frame::FrameTime;

/// Attributes of one decoded stream
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Lower-case format name, usually the file extension
    pub format: String,

    /// Number of image frames
    pub frame_count: usize,

    /// Total duration in microseconds
    pub duration: u64,

    /// Nominal duration of one frame in microseconds
    pub frame_duration: u64,

    /// Width of the decoded frames
    pub width: u32,

    /// Height of the decoded frames
    pub height: u32,

    /// Audio stream parameters, if the source carries audio
    pub audio: Option<AudioInfo>,
}

impl MediaInfo {
    /// Build info for an image sequence from its frame index
    pub fn from_times(format: &str, times: &[FrameTime], width: u32, height: u32) -> Self {
        let duration = times.last().map(|t| t.end()).unwrap_or(0);
        let frame_duration = if times.is_empty() {
            0
        } else {
            (duration / times.len() as u64).max(1)
        };

        Self {
            format: format.to_lowercase(),
            frame_count: times.len(),
            duration,
            frame_duration,
            width,
            height,
            audio: None,
        }
    }

    /// Frames per second implied by the nominal frame duration
    pub fn frame_rate(&self) -> f64 {
        if self.frame_duration == 0 {
            return 0.0;
        }
        1_000_000.0 / self.frame_duration as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Audio stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub channels: u16,
    pub sample_rate: u32,
    /// Bits per second as reported by the container (0 if unknown)
    pub bitrate: u64,
}

/// Where a reader gets its bytes from
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// A file on disk; the format is taken from its extension
    File(PathBuf),

    /// An in-memory byte stream with an explicitly declared format
    Bytes { data: Vec<u8>, format: String },
}

impl MediaSource {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self::File(path.into())
    }

    pub fn bytes<S: Into<String>>(data: Vec<u8>, format: S) -> Self {
        Self::Bytes {
            data,
            format: format.into(),
        }
    }

    /// Lower-case format name
    pub fn format(&self) -> String {
        match self {
            Self::File(path) => extension_of(path),
            Self::Bytes { format, .. } => format.to_lowercase(),
        }
    }

    /// Human-readable name used in logs and error messages
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Bytes { data, format } => format!("<{} bytes of {}>", data.len(), format),
        }
    }

    /// Read the whole source into memory
    pub fn read_bytes(&self) -> std::io::Result<std::borrow::Cow<'_, [u8]>> {
        match self {
            Self::File(path) => std::fs::read(path).map(std::borrow::Cow::Owned),
            Self::Bytes { data, .. } => Ok(std::borrow::Cow::Borrowed(data.as_slice())),
        }
    }
}

/// Lower-case extension of a path, empty if it has none
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::stack_durations;

    #[test]
    fn test_info_from_times() {
        let times = stack_durations([20_000, 20_000, 40_000]);
        let info = MediaInfo::from_times("GIF", &times, 10, 10);

        assert_eq!(info.format, "gif");
        assert_eq!(info.frame_count, 3);
        assert_eq!(info.duration, 80_000);
        assert!(info.is_animated());
        assert!(!info.is_empty());
    }

    #[test]
    fn test_frame_rate() {
        let times = stack_durations([10_000; 4]);
        let info = MediaInfo::from_times("gif", &times, 1, 1);
        assert!((info.frame_rate() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_source_format_is_case_insensitive() {
        assert_eq!(MediaSource::file("clip.MP4").format(), "mp4");
        assert_eq!(MediaSource::bytes(vec![], "PNG").format(), "png");
        assert_eq!(MediaSource::file("noext").format(), "");
    }
}
