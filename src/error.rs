use thiserror::Error;

/// Main error type for the reframe library
#[derive(Error, Debug)]
pub enum ReframeError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Reader, writer and codec errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Unreadable media: {path} ({reason})")]
    Unreadable { path: String, reason: String },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Media contains no frames: {path}")]
    Empty { path: String },

    #[error("Decoding failed: {reason}")]
    Decode { reason: String },

    #[error("Encoding failed: {reason}")]
    Encode { reason: String },

    #[error("Writer already closed: {path}")]
    WriterClosed { path: String },

    #[error("Invalid media parameters: {details}")]
    InvalidParameters { details: String },
}

/// Per-frame transform errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Transform failed: {reason}")]
    TransformFailed { reason: String },

    #[error("Unknown effect: {name}")]
    UnknownEffect { name: String },

    #[error("Invalid processor parameters: {details}")]
    InvalidParameters { details: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using ReframeError
pub type Result<T> = std::result::Result<T, ReframeError>;

impl ReframeError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            // IO errors might be temporary
            Self::Io(_) => true,
            // Broken or unsupported input never decodes on a second attempt
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Media(MediaError::Unreadable { path, .. }) => {
                format!("Could not read '{}'. The file is damaged or not a media file.", path)
            }
            Self::Media(MediaError::UnsupportedFormat { format }) => {
                format!("The format '{}' is not supported.", format)
            }
            Self::Media(MediaError::Empty { path }) => {
                format!("'{}' does not contain any frames.", path)
            }
            Self::Processing(ProcessingError::UnknownEffect { name }) => {
                format!("Effect '{}' not found.", name)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

impl From<image::ImageError> for ReframeError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::IoError(e) => Self::Io(e),
            image::ImageError::Unsupported(e) => MediaError::UnsupportedFormat {
                format: e.to_string(),
            }
            .into(),
            other => MediaError::Decode {
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

impl From<gif::EncodingError> for ReframeError {
    fn from(error: gif::EncodingError) -> Self {
        match error {
            gif::EncodingError::Io(e) => Self::Io(e),
            other => MediaError::Encode {
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for ReframeError {
    fn from(error: ffmpeg_next::Error) -> Self {
        MediaError::Decode {
            reason: error.to_string(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_has_user_message() {
        let error: ReframeError = MediaError::Unreadable {
            path: "cat.gif".to_string(),
            reason: "bad header".to_string(),
        }
        .into();

        assert!(error.user_message().contains("cat.gif"));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_io_is_recoverable() {
        let error: ReframeError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_image_error_maps_to_decode() {
        let error: ReframeError = image::ImageError::Parameter(
            image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ),
        )
        .into();

        assert!(matches!(error, ReframeError::Media(MediaError::Decode { .. })));
    }
}
