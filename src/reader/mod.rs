//! # Media Readers
//!
//! Timestamp-addressable access to decoded frames.
//!
//! Every reader answers three kinds of question: what the stream looks like
//! ([`MediaReader::info`]), which frame is showing at a given microsecond
//! ([`MediaReader::frame_at`]), and what the frames are in order
//! ([`MediaReader::frames`]). Random access is circular: timestamps past the
//! end wrap around, so any reader can be looped without bounds checks.
//!
//! Derived readers wrap a boxed reader and rewrite its timeline:
//!
//! ```rust,no_run
//! use reframe::media::MediaSource;
//! use reframe::reader::ReaderExt;
//! use reframe::registry::FormatRegistry;
//!
//! # fn main() -> reframe::Result<()> {
//! let registry = FormatRegistry::with_defaults();
//! let reader = registry.open_reader(&MediaSource::file("cat.gif"))?;
//! let mut reader = reader.reversed()?.limited(2_000_000)?;
//! let first = reader.first()?;
//! println!("{}x{}", first.content().width(), first.content().height());
//! # Ok(())
//! # }
//! ```

pub mod cadence;
pub mod frame_list;
pub mod limited;
pub mod reversed;
pub mod still;

#[cfg(feature = "ffmpeg")]
pub mod native;

pub use cadence::CadenceReader;
pub use frame_list::FrameListReader;
pub use limited::LimitedReader;
pub use reversed::ReversedReader;
pub use still::StillReader;

#[cfg(feature = "ffmpeg")]
pub use native::NativeReader;

use crate::error::{MediaError, Result};
use crate::media::{AudioFrame, FrameTime, ImageFrame, MediaInfo};

/// Lazy, finite sequence of image frames
pub type FrameIter<'a> = Box<dyn Iterator<Item = Result<ImageFrame>> + 'a>;

/// Lazy, finite sequence of audio frames
pub type AudioIter<'a> = Box<dyn Iterator<Item = Result<AudioFrame>> + 'a>;

/// Owned, type-erased reader
pub type BoxedReader = Box<dyn MediaReader>;

/// Contract shared by every decoder and derived reader
pub trait MediaReader {
    /// Stream attributes, fixed at construction
    fn info(&self) -> &MediaInfo;

    /// Timestamp and duration of every image frame, in order
    fn frame_times(&mut self) -> Result<Vec<FrameTime>>;

    /// Frame showing at `timestamp`, taken modulo the stream duration
    ///
    /// The returned frame satisfies `frame.timestamp() <= t < frame.end()`
    /// where `t` is the wrapped timestamp.
    fn frame_at(&mut self, timestamp: u64) -> Result<ImageFrame>;

    /// Iterate all image frames from the start
    ///
    /// Every call starts a fresh pass.
    fn frames(&mut self) -> Result<FrameIter<'_>>;

    /// First image frame
    fn first(&mut self) -> Result<ImageFrame> {
        self.frame_at(0)
    }

    /// Iterate all audio frames from the start (empty for image-only readers)
    fn audio_frames(&mut self) -> Result<AudioIter<'_>> {
        Ok(Box::new(std::iter::empty()))
    }

    /// Release decoder handles. Calling it more than once is harmless.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hand back the wrapped forward reader if this reader is a reversal
    ///
    /// Used by [`ReaderExt::reversed`] so that reversing twice returns the
    /// original reader instead of stacking two wrappers.
    #[doc(hidden)]
    fn take_forward(&mut self) -> Option<BoxedReader> {
        None
    }
}

/// Timeline rewrites available on any boxed reader
pub trait ReaderExt {
    /// Play the stream backwards; reversing twice gives back the original
    fn reversed(self) -> Result<BoxedReader>;

    /// Cap the stream at `max_duration`, or loop it up to that length
    fn limited(self, max_duration: u64) -> Result<BoxedReader>;

    /// Resample onto slots of exactly `frame_duration`
    fn with_cadence(self, frame_duration: u64) -> Result<BoxedReader>;
}

impl ReaderExt for BoxedReader {
    fn reversed(mut self) -> Result<BoxedReader> {
        if let Some(forward) = self.take_forward() {
            return Ok(forward);
        }
        Ok(Box::new(ReversedReader::new(self)?))
    }

    fn limited(self, max_duration: u64) -> Result<BoxedReader> {
        if max_duration == 0 || max_duration == self.info().duration {
            return Ok(self);
        }
        Ok(Box::new(LimitedReader::new(self, max_duration)?))
    }

    fn with_cadence(self, frame_duration: u64) -> Result<BoxedReader> {
        Ok(Box::new(CadenceReader::new(self, frame_duration)?))
    }
}

/// Wrap a query timestamp into `[0, duration)`
pub(crate) fn wrap_timestamp(info: &MediaInfo, timestamp: u64) -> Result<u64> {
    if info.duration == 0 || info.frame_count == 0 {
        return Err(MediaError::Empty {
            path: info.format.clone(),
        }
        .into());
    }
    Ok(timestamp % info.duration)
}

/// True if every frame but the last has the same duration
pub fn has_constant_cadence(times: &[FrameTime]) -> bool {
    match times.split_last() {
        Some((_, body)) => body.windows(2).all(|pair| pair[0].duration == pair[1].duration),
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::media::{stack_durations, Frame};

    /// Solid-colour frame whose red channel encodes `index`
    pub fn solid(index: usize, width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([index as u8, 64, 128, 255]))
    }

    /// Red channel of a solid frame, i.e. the index it was created with
    pub fn marker(frame: &ImageFrame) -> u8 {
        frame.content().get_pixel(0, 0)[0]
    }

    /// In-memory reader with one solid frame per duration
    pub fn list_reader(format: &str, durations: &[u64]) -> FrameListReader {
        let frames = stack_durations(durations.iter().copied())
            .into_iter()
            .enumerate()
            .map(|(i, time)| Frame::new(solid(i, 4, 4), time.duration, time.timestamp))
            .collect();
        FrameListReader::new(format, frames).unwrap()
    }

    /// Check `frame_at` against the frame index at and around every boundary
    pub fn assert_frame_at_is_consistent(reader: &mut dyn MediaReader) {
        let times = reader.frame_times().unwrap();
        let duration = reader.info().duration;
        for (i, time) in times.iter().enumerate() {
            let probes = [time.timestamp, time.timestamp + time.duration / 2, time.end() - 1];
            for t in probes {
                if t >= duration {
                    continue;
                }
                let frame = reader.frame_at(t).unwrap();
                assert!(frame.timestamp() <= t, "frame at {} starts at {}", t, frame.timestamp());
                if let Some(next) = times.get(i + 1) {
                    assert!(next.timestamp > t);
                    assert!(frame.end() <= next.timestamp);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_constant_cadence_detection() {
        let regular = crate::media::stack_durations([10, 10, 10, 4]);
        let irregular = crate::media::stack_durations([10, 20, 10]);
        assert!(has_constant_cadence(&regular));
        assert!(!has_constant_cadence(&irregular));
        assert!(has_constant_cadence(&[]));
    }

    #[test]
    fn test_double_reverse_returns_original() {
        let reader: BoxedReader = Box::new(list_reader("gif", &[10_000, 20_000, 30_000]));
        let mut twice = reader.reversed().unwrap().reversed().unwrap();

        assert_eq!(twice.info().frame_count, 3);
        let frames: Vec<_> = twice.frames().unwrap().map(|f| f.unwrap()).collect();
        let markers: Vec<_> = frames.iter().map(marker).collect();
        assert_eq!(markers, vec![0, 1, 2]);
        assert_eq!(frames[1].timestamp(), 10_000);
    }

    #[test]
    fn test_limited_zero_is_noop() {
        let reader: BoxedReader = Box::new(list_reader("gif", &[10_000, 10_000]));
        let reader = reader.limited(0).unwrap();
        assert_eq!(reader.info().duration, 20_000);
    }
}
