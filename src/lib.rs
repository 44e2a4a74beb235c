//! # reframe
//!
//! Decode images, animations and video into timestamped frames, transform
//! them, and re-encode the result under size and duration budgets.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use reframe::{
//!     config::Config,
//!     effects,
//!     media::MediaSource,
//!     pipeline::Pipeline,
//!     processor::{Fit, ImageProcessor},
//!     registry::FormatRegistry,
//! };
//!
//! # fn main() -> reframe::Result<()> {
//! let registry = FormatRegistry::with_defaults();
//! let config = Config::default();
//!
//! let mut processor = Fit::new(320, 240).map_pixels(effects::grayscale);
//! let report = Pipeline::new(&registry, &config).transcode(
//!     &MediaSource::file("cat.gif"),
//!     Path::new("out/cat"),
//!     &mut processor,
//! )?;
//! println!("wrote {} frames to {}", report.frames_written, report.path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - [`media`] - Frames, stream info and sources
//! - [`reader`] - Timestamp-addressable decoders and timeline wrappers
//! - [`sync`] - Pairing two streams onto one timeline
//! - [`processor`] - Per-frame transforms with one-time constant data
//! - [`effects`] - Named pixel effects
//! - [`writer`] - GIF, still-image and native video encoders
//! - [`registry`] - Format name → reader/writer lookup
//! - [`pipeline`] - Read → transform → write orchestration
//! - [`config`] - Configuration management
//!
//! ## Custom Processors
//!
//! Implement [`ImageProcessor`](processor::ImageProcessor); put work that only
//! depends on the first frame into `constant_data`:
//!
//! ```rust
//! use image::{imageops, RgbaImage};
//! use reframe::{media::ImageFrame, processor::ImageProcessor, Result};
//!
//! struct Thumbnail;
//!
//! impl ImageProcessor for Thumbnail {
//!     type Constant = (u32, u32);
//!
//!     fn constant_data(&self, first: &ImageFrame) -> Result<(u32, u32)> {
//!         let (w, h) = first.content().dimensions();
//!         Ok((w / 2, h / 2))
//!     }
//!
//!     fn transform(&self, frame: &ImageFrame, size: &(u32, u32)) -> Result<RgbaImage> {
//!         Ok(imageops::thumbnail(frame.content(), size.0.max(1), size.1.max(1)))
//!     }
//! }
//! ```
//!
//! Native container support (mp4, webm, mov, ...) needs the `ffmpeg` feature.

pub mod config;
pub mod effects;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod processor;
pub mod reader;
pub mod registry;
pub mod sync;
pub mod writer;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    effects::EffectRegistry,
    error::{ReframeError, Result},
    media::{Frame, ImageFrame, MediaInfo, MediaSource},
    pipeline::{Pipeline, TranscodeOptions, TranscodeReport},
    processor::{DualImageProcessor, ImageProcessor},
    reader::{MediaReader, ReaderExt},
    registry::FormatRegistry,
    sync::DualReader,
    writer::MediaWriter,
};
