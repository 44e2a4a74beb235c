use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for reframe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output defaults applied to every writer
    #[serde(default)]
    pub output: OutputConfig,

    /// GIF encoder settings
    #[serde(default)]
    pub gif: GifConfig,

    /// Native video encoder settings
    #[serde(default)]
    pub video: VideoConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.output.validate()?;
        self.gif.validate()?;
        self.video.validate()?;
        Ok(())
    }
}

/// Writer parameters used when the caller does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of times animated output repeats (0 = forever)
    pub loop_count: u16,

    /// Audio channel count for native output
    pub audio_channels: u16,

    /// Audio sample rate for native output (Hz)
    pub audio_sample_rate: u32,

    /// Audio bitrate for native output (bits per second)
    pub audio_bitrate: u64,

    /// Maximum output size in bytes (0 = unconstrained)
    pub max_file_size: u64,

    /// Maximum output duration in microseconds (0 = unconstrained)
    pub max_duration: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            loop_count: 0,
            audio_channels: 2,
            audio_sample_rate: 44100,
            audio_bitrate: 128_000,
            max_file_size: 0,
            max_duration: 0,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.audio_channels == 0 || self.audio_channels > 8 {
            return Err(ConfigError::InvalidValue {
                key: "output.audio_channels".to_string(),
                value: self.audio_channels.to_string()
            }.into());
        }

        if self.audio_sample_rate < 8000 {
            return Err(ConfigError::InvalidValue {
                key: "output.audio_sample_rate".to_string(),
                value: self.audio_sample_rate.to_string()
            }.into());
        }

        Ok(())
    }
}

/// GIF temporal optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GifConfig {
    /// Manhattan RGB distance under which a pixel counts as unchanged
    pub color_tolerance: u32,

    /// NeuQuant sampling speed (1 = best quality, 30 = fastest)
    pub quantize_speed: i32,
}

impl Default for GifConfig {
    fn default() -> Self {
        Self {
            color_tolerance: 6,
            quantize_speed: 10,
        }
    }
}

impl GifConfig {
    fn validate(&self) -> Result<()> {
        if !(1..=30).contains(&self.quantize_speed) {
            return Err(ConfigError::InvalidValue {
                key: "gif.quantize_speed".to_string(),
                value: self.quantize_speed.to_string()
            }.into());
        }

        if self.color_tolerance > 765 {
            return Err(ConfigError::InvalidValue {
                key: "gif.color_tolerance".to_string(),
                value: self.color_tolerance.to_string()
            }.into());
        }

        Ok(())
    }
}

/// Native video encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Bits spent per pixel per frame when estimating the video bitrate
    pub bits_per_pixel: f64,

    /// Seconds between forced keyframes
    pub keyframe_interval_secs: u32,

    /// Frame rate above which audio is dropped instead of encoded
    pub max_audio_frame_rate: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            bits_per_pixel: 0.1,
            keyframe_interval_secs: 2,
            max_audio_frame_rate: 120.0,
        }
    }
}

impl VideoConfig {
    fn validate(&self) -> Result<()> {
        if self.bits_per_pixel.is_nan() || self.bits_per_pixel <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "video.bits_per_pixel".to_string(),
                value: self.bits_per_pixel.to_string()
            }.into());
        }

        if self.keyframe_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.keyframe_interval_secs".to_string(),
                value: self.keyframe_interval_secs.to_string()
            }.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("reframe.toml");

        let mut original = Config::default();
        original.output.max_file_size = 8 * 1024 * 1024;
        original.gif.color_tolerance = 12;

        original.save_to_file(&file_path).unwrap();
        let loaded = Config::from_file(&file_path).unwrap();

        assert_eq!(loaded.output.max_file_size, 8 * 1024 * 1024);
        assert_eq!(loaded.gif.color_tolerance, 12);
        assert_eq!(loaded.video.keyframe_interval_secs, 2);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[gif]\ncolor_tolerance = 0\nquantize_speed = 1\n").unwrap();

        let loaded = Config::from_file(&file_path).unwrap();
        assert_eq!(loaded.gif.quantize_speed, 1);
        assert_eq!(loaded.output.audio_sample_rate, 44100);
    }

    #[test]
    fn test_invalid_quantize_speed() {
        let mut config = Config::default();
        config.gif.quantize_speed = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/definitely/not/here.toml");
        assert!(result.is_err());
    }
}
