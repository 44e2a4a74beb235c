//! # Media Writers
//!
//! Format-specific encoders behind one contract. Writers are initialized by
//! the first image frame they receive (its size fixes the output size), take
//! frames strictly in timestamp order, and must be closed exactly once to
//! flush their output. Closing twice is harmless; writing after close fails.

pub mod budget;
pub mod gif;
pub mod still;

#[cfg(feature = "ffmpeg")]
pub mod native;

pub use self::budget::{snap_sample_rate, AudioCodec, BitrateBudget, CodecPlan, VideoCodec};
pub use self::gif::GifWriter;
pub use self::still::StillWriter;

#[cfg(feature = "ffmpeg")]
pub use self::native::NativeWriter;

use std::path::PathBuf;

use crate::config::{Config, GifConfig, VideoConfig};
use crate::error::Result;
use crate::media::{AudioFrame, ImageFrame};

/// Owned, type-erased writer
pub type BoxedWriter = Box<dyn MediaWriter>;

/// Contract shared by every encoder
pub trait MediaWriter {
    /// Append an image frame
    fn write_image(&mut self, frame: ImageFrame) -> Result<()>;

    /// Append an audio frame; writers without audio ignore it
    fn write_audio(&mut self, frame: AudioFrame) -> Result<()> {
        let _ = frame;
        Ok(())
    }

    /// Whether audio written through [`MediaWriter::write_audio`] ends up
    /// in the output
    fn supports_audio(&self) -> bool {
        false
    }

    /// Flush and finalize the output
    fn close(&mut self) -> Result<()>;
}

/// Everything a writer needs to know up front
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Output file
    pub path: PathBuf,

    /// Lower-case output format
    pub format: String,

    /// Animation repeat count (0 = forever)
    pub loop_count: u16,

    pub audio_channels: u16,
    pub audio_sample_rate: u32,
    pub audio_bitrate: u64,

    /// Size ceiling in bytes (0 = unconstrained)
    pub max_file_size: u64,

    /// Duration ceiling in microseconds (0 = unconstrained)
    pub max_duration: u64,

    /// Expected output duration in microseconds, used for budgeting
    pub expected_duration: u64,

    /// Open an audio stream
    pub with_audio: bool,

    pub gif: GifConfig,
    pub video: VideoConfig,
}

impl WriterOptions {
    /// Options for `path`, with defaults taken from the configuration
    pub fn from_config<P: Into<PathBuf>>(path: P, format: &str, config: &Config) -> Self {
        Self {
            path: path.into(),
            format: format.to_lowercase(),
            loop_count: config.output.loop_count,
            audio_channels: config.output.audio_channels,
            audio_sample_rate: config.output.audio_sample_rate,
            audio_bitrate: config.output.audio_bitrate,
            max_file_size: config.output.max_file_size,
            max_duration: config.output.max_duration,
            expected_duration: 0,
            with_audio: false,
            gif: config.gif.clone(),
            video: config.video.clone(),
        }
    }

    /// Path as text for logs and errors
    pub fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.output.loop_count = 3;
        config.gif.color_tolerance = 0;

        let options = WriterOptions::from_config("out/clip.GIF", "GIF", &config);
        assert_eq!(options.format, "gif");
        assert_eq!(options.loop_count, 3);
        assert_eq!(options.gif.color_tolerance, 0);
        assert!(!options.with_audio);
    }
}
