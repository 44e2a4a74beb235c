use std::io::Cursor;

use image::AnimationDecoder;
use tracing::debug;

use crate::error::{MediaError, Result};
use crate::media::{
    locate, stack_durations, AudioFrame, AudioInfo, Frame, FrameTime, ImageFrame, MediaInfo,
    MediaSource,
};
use crate::reader::{wrap_timestamp, AudioIter, FrameIter, MediaReader};

/// Delay browsers substitute for GIF frames that declare none
pub const DEFAULT_ANIMATION_DELAY: u64 = 100_000;

/// Reader over frames that are already decoded and held in memory
pub struct FrameListReader {
    frames: Vec<ImageFrame>,
    times: Vec<FrameTime>,
    audio: Vec<AudioFrame>,
    info: MediaInfo,
}

impl FrameListReader {
    /// Build a reader from in-memory frames
    ///
    /// Frames are laid end to end in the given order; their own timestamps
    /// are replaced.
    pub fn new(format: &str, frames: Vec<ImageFrame>) -> Result<Self> {
        let first = frames.first().ok_or_else(|| MediaError::Empty {
            path: format.to_string(),
        })?;
        let (width, height) = first.content().dimensions();

        let times = stack_durations(frames.iter().map(|f| f.duration()));
        let frames = frames
            .into_iter()
            .zip(&times)
            .map(|(frame, time)| frame.with_timing(time.duration, time.timestamp))
            .collect();
        let info = MediaInfo::from_times(format, &times, width, height);

        Ok(Self {
            frames,
            times,
            audio: Vec::new(),
            info,
        })
    }

    /// Attach an audio track
    pub fn with_audio(mut self, audio: Vec<AudioFrame>, audio_info: AudioInfo) -> Self {
        self.audio = audio;
        self.info.audio = Some(audio_info);
        self
    }

    /// Decode an animated GIF or WebP into composited frames
    pub fn open(source: &MediaSource) -> Result<Self> {
        let format = source.format();
        let bytes = source.read_bytes()?;
        let unreadable = |reason: String| MediaError::Unreadable {
            path: source.describe(),
            reason,
        };

        let decoded = match format.as_str() {
            "gif" => image::codecs::gif::GifDecoder::new(Cursor::new(&bytes[..]))
                .and_then(|decoder| decoder.into_frames().collect_frames()),
            "webp" => image::codecs::webp::WebPDecoder::new(Cursor::new(&bytes[..]))
                .and_then(|decoder| decoder.into_frames().collect_frames()),
            other => {
                return Err(MediaError::UnsupportedFormat {
                    format: other.to_string(),
                }
                .into())
            }
        }
        .map_err(|e| unreadable(e.to_string()))?;

        if decoded.is_empty() {
            return Err(unreadable("no frames".to_string()).into());
        }

        let frames: Vec<ImageFrame> = decoded
            .into_iter()
            .map(|frame| {
                let (numer, denom) = frame.delay().numer_denom_ms();
                let delay = if numer == 0 || denom == 0 {
                    DEFAULT_ANIMATION_DELAY
                } else {
                    numer as u64 * 1000 / denom as u64
                };
                Frame::new(frame.into_buffer(), delay, 0)
            })
            .collect();

        debug!("Decoded {} frames from {}", frames.len(), source.describe());
        Self::new(&format, frames)
    }
}

impl MediaReader for FrameListReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn frame_times(&mut self) -> Result<Vec<FrameTime>> {
        Ok(self.times.clone())
    }

    fn frame_at(&mut self, timestamp: u64) -> Result<ImageFrame> {
        let t = wrap_timestamp(&self.info, timestamp)?;
        Ok(self.frames[locate(&self.times, t)].clone())
    }

    fn frames(&mut self) -> Result<FrameIter<'_>> {
        Ok(Box::new(self.frames.iter().cloned().map(Ok)))
    }

    fn audio_frames(&mut self) -> Result<AudioIter<'_>> {
        Ok(Box::new(self.audio.iter().cloned().map(Ok)))
    }
}
