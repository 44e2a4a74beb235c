use tracing::debug;

use crate::error::{MediaError, Result};
use crate::media::{AudioBuffer, AudioFrame, Frame, FrameTime, ImageFrame, MediaInfo};
use crate::reader::{wrap_timestamp, AudioIter, BoxedReader, FrameIter, MediaReader};

/// Plays its source backwards
///
/// The image index is computed once up front; every access maps back onto
/// the forward reader. Audio is decoded in full and reversed sample by
/// sample.
pub struct ReversedReader {
    source: Option<BoxedReader>,
    /// Forward timeline of the source
    forward: Vec<FrameTime>,
    /// Reversed timeline: entry `i` shows forward frame `len - 1 - i`
    times: Vec<FrameTime>,
    info: MediaInfo,
}

impl ReversedReader {
    pub fn new(mut source: BoxedReader) -> Result<Self> {
        let forward = source.frame_times()?;
        let duration = source.info().duration;

        let times = forward
            .iter()
            .rev()
            .map(|time| FrameTime::new(duration - time.end(), time.duration))
            .collect();
        let info = source.info().clone();

        debug!("Reversed index built for {} frames", forward.len());
        Ok(Self {
            source: Some(source),
            forward,
            times,
            info,
        })
    }

    fn source(&mut self) -> Result<&mut BoxedReader> {
        self.source.as_mut().ok_or_else(|| {
            MediaError::InvalidParameters {
                details: "reversed reader no longer owns its source".to_string(),
            }
            .into()
        })
    }

    /// Reverse a full audio track
    fn reverse_audio(frames: Vec<AudioFrame>, duration: u64) -> Vec<AudioFrame> {
        frames
            .into_iter()
            .rev()
            .map(|frame| {
                let (frame_duration, end) = (frame.duration(), frame.end());
                let mut buffer: AudioBuffer = frame.into_content();
                buffer.reverse_in_place();
                Frame::new(buffer, frame_duration, duration.saturating_sub(end))
            })
            .collect()
    }
}

impl MediaReader for ReversedReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn frame_times(&mut self) -> Result<Vec<FrameTime>> {
        Ok(self.times.clone())
    }

    fn frame_at(&mut self, timestamp: u64) -> Result<ImageFrame> {
        let t = wrap_timestamp(&self.info, timestamp)?;
        let duration = self.info.duration;
        let frame = self.source()?.frame_at(duration - 1 - t)?;
        let (frame_duration, end) = (frame.duration(), frame.end());
        Ok(frame.with_timing(frame_duration, duration.saturating_sub(end)))
    }

    fn frames(&mut self) -> Result<FrameIter<'_>> {
        let source = self.source.as_mut().ok_or_else(|| MediaError::InvalidParameters {
            details: "reversed reader no longer owns its source".to_string(),
        })?;
        let forward = &self.forward;
        let iter = self.times.iter().enumerate().map(move |(i, time)| {
            let original = forward[forward.len() - 1 - i];
            source
                .frame_at(original.timestamp)
                .map(|frame| frame.with_timing(time.duration, time.timestamp))
        });
        Ok(Box::new(iter))
    }

    fn audio_frames(&mut self) -> Result<AudioIter<'_>> {
        let source = self.source()?;
        let frames = source.audio_frames()?.collect::<Result<Vec<_>>>()?;
        let duration = frames.last().map(|f| f.end()).unwrap_or(0);
        let reversed = Self::reverse_audio(frames, duration);
        Ok(Box::new(reversed.into_iter().map(Ok)))
    }

    fn close(&mut self) -> Result<()> {
        match self.source.as_mut() {
            Some(source) => source.close(),
            None => Ok(()),
        }
    }

    fn take_forward(&mut self) -> Option<BoxedReader> {
        self.source.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::AudioInfo;
    use crate::reader::test_support::*;

    #[test]
    fn test_frames_play_backwards() {
        let mut reader = ReversedReader::new(Box::new(list_reader("gif", &[10_000, 20_000, 30_000]))).unwrap();

        let frames: Vec<_> = reader.frames().unwrap().map(|f| f.unwrap()).collect();
        let markers: Vec<_> = frames.iter().map(marker).collect();
        assert_eq!(markers, vec![2, 1, 0]);

        let stamps: Vec<_> = frames.iter().map(|f| (f.timestamp(), f.duration())).collect();
        assert_eq!(stamps, vec![(0, 30_000), (30_000, 20_000), (50_000, 10_000)]);
    }

    #[test]
    fn test_frame_at_maps_onto_source() {
        let mut reader = ReversedReader::new(Box::new(list_reader("gif", &[10_000, 20_000, 30_000]))).unwrap();

        assert_eq!(marker(&reader.frame_at(0).unwrap()), 2);
        assert_eq!(marker(&reader.frame_at(29_999).unwrap()), 2);
        assert_eq!(marker(&reader.frame_at(30_000).unwrap()), 1);
        assert_eq!(marker(&reader.frame_at(59_999).unwrap()), 0);
        assert_frame_at_is_consistent(&mut reader);
    }

    #[test]
    fn test_audio_is_reversed() {
        let audio = vec![
            Frame::new(AudioBuffer::new(vec![1.0, 2.0], 1, 100), 20_000, 0),
            Frame::new(AudioBuffer::new(vec![3.0, 4.0, 5.0], 1, 100), 30_000, 20_000),
        ];
        let info = AudioInfo {
            channels: 1,
            sample_rate: 100,
            bitrate: 0,
        };
        let source = list_reader("mp4", &[50_000]).with_audio(audio, info);
        let mut reader = ReversedReader::new(Box::new(source)).unwrap();

        let frames: Vec<_> = reader.audio_frames().unwrap().map(|f| f.unwrap()).collect();
        assert_eq!(frames[0].content().samples, vec![5.0, 4.0, 3.0]);
        assert_eq!(frames[0].timestamp(), 0);
        assert_eq!(frames[1].content().samples, vec![2.0, 1.0]);
        assert_eq!(frames[1].timestamp(), 30_000);
        assert_eq!(frames[1].content().sample_rate, 100);
    }

    #[test]
    fn test_take_forward_empties_wrapper() {
        let mut reader = ReversedReader::new(Box::new(list_reader("gif", &[10_000]))).unwrap();
        assert!(reader.take_forward().is_some());
        assert!(reader.frame_at(0).is_err());
        assert!(reader.close().is_ok());
    }
}
