//! # Media Model
//!
//! Timestamped frames and the stream descriptions shared by readers,
//! processors and writers. All times are microseconds.

pub mod frame;
pub mod types;

pub use frame::{locate, stack_durations, AudioBuffer, AudioFrame, Frame, FrameTime, ImageFrame};
pub use types::{extension_of, AudioInfo, MediaInfo, MediaSource};
