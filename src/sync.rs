//! # Dual-Stream Synchronization
//!
//! Pairs two readers so they can be composited frame by frame. One reader
//! controls iteration; the other is sampled at the controlling timestamps.

use tracing::debug;

use crate::error::{MediaError, Result};
use crate::media::{AudioInfo, ImageFrame, MediaInfo};
use crate::reader::{AudioIter, BoxedReader};

/// Which argument of [`DualReader::new`] drives iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    First,
    Second,
}

/// Two frames shown at the same time
///
/// `first` and `second` keep the argument order of [`DualReader::new`],
/// regardless of which reader is controlling. Both carry the controlling
/// frame's timing.
#[derive(Debug, Clone)]
pub struct DualFrame {
    pub first: ImageFrame,
    pub second: ImageFrame,
    pub timestamp: u64,
    pub duration: u64,
}

/// Synchronizes two readers onto the controlling reader's timeline
pub struct DualReader {
    first: BoxedReader,
    second: BoxedReader,
    controller: Controller,
    info: MediaInfo,
}

impl DualReader {
    pub fn new(mut first: BoxedReader, mut second: BoxedReader) -> Result<Self> {
        for reader in [&first, &second] {
            if reader.info().is_empty() {
                return Err(MediaError::Empty {
                    path: reader.info().format.clone(),
                }
                .into());
            }
        }

        let controller = choose_controller(first.info(), second.info());
        let duration = match (first.info().is_animated(), second.info().is_animated()) {
            (true, true) => first.info().duration.max(second.info().duration),
            _ => match controller {
                Controller::First => first.info().duration,
                Controller::Second => second.info().duration,
            },
        };

        let leading = match controller {
            Controller::First => &mut first,
            Controller::Second => &mut second,
        };
        let times = leading.frame_times()?;
        let loop_length = leading.info().duration;
        let mut frame_count = 0;
        let mut offset = 0;
        while offset < duration {
            frame_count += times
                .iter()
                .take_while(|time| offset + time.timestamp < duration)
                .count();
            offset += loop_length;
        }

        let leading_info = leading.info();
        let info = MediaInfo {
            format: leading_info.format.clone(),
            frame_count,
            duration,
            frame_duration: leading_info.frame_duration,
            width: leading_info.width,
            height: leading_info.height,
            audio: leading_info.audio,
        };

        debug!(
            "Dual reader: {:?} controls, {} pairs over {} us",
            controller, frame_count, duration
        );
        Ok(Self {
            first,
            second,
            controller,
            info,
        })
    }

    /// Combined stream attributes (format and cadence of the controlling reader)
    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn controller(&self) -> Controller {
        self.controller
    }

    /// Info of the reader passed first
    pub fn first_info(&self) -> &MediaInfo {
        self.first.info()
    }

    /// Info of the reader passed second
    pub fn second_info(&self) -> &MediaInfo {
        self.second.info()
    }

    /// Audio parameters of the controlling reader
    pub fn audio_info(&self) -> Option<AudioInfo> {
        self.info.audio
    }

    /// Audio of the controlling reader
    pub fn audio_frames(&mut self) -> Result<AudioIter<'_>> {
        let (leading, _) = self.split();
        leading.audio_frames()
    }

    fn split(&mut self) -> (&mut BoxedReader, &mut BoxedReader) {
        match self.controller {
            Controller::First => (&mut self.first, &mut self.second),
            Controller::Second => (&mut self.second, &mut self.first),
        }
    }

    fn pair(&self, leading: ImageFrame, following: ImageFrame) -> DualFrame {
        let (timestamp, duration) = (leading.timestamp(), leading.duration());
        let following = following.with_timing(duration, timestamp);
        let (first, second) = match self.controller {
            Controller::First => (leading, following),
            Controller::Second => (following, leading),
        };
        DualFrame {
            first,
            second,
            timestamp,
            duration,
        }
    }

    /// Visit every pair in timestamp order
    ///
    /// The controlling reader is replayed from the start as often as needed
    /// to cover the combined duration.
    pub fn for_each_pair<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(DualFrame) -> Result<()>,
    {
        let controller = self.controller;
        let total = self.info.duration;
        let mut offset = 0;

        loop {
            let (leading, following) = match controller {
                Controller::First => (&mut self.first, &mut self.second),
                Controller::Second => (&mut self.second, &mut self.first),
            };
            let loop_length = leading.info().duration;
            let mut emitted = false;

            for frame in leading.frames()? {
                let frame = frame?;
                let timestamp = offset + frame.timestamp();
                if timestamp >= total {
                    break;
                }
                let duration = frame.duration().min(total - timestamp);
                let leading_frame = frame.with_timing(duration, timestamp);
                let following_frame = following.frame_at(timestamp)?.with_timing(duration, timestamp);

                let (first, second) = match controller {
                    Controller::First => (leading_frame, following_frame),
                    Controller::Second => (following_frame, leading_frame),
                };
                callback(DualFrame {
                    first,
                    second,
                    timestamp,
                    duration,
                })?;
                emitted = true;
            }

            offset += loop_length;
            if offset >= total || !emitted {
                return Ok(());
            }
        }
    }

    /// Pair showing at `timestamp`, wrapped around the combined duration
    pub fn pair_at(&mut self, timestamp: u64) -> Result<DualFrame> {
        if self.info.duration == 0 {
            return Err(MediaError::Empty {
                path: self.info.format.clone(),
            }
            .into());
        }
        let t = timestamp % self.info.duration;

        let (leading, following) = self.split();
        let loop_length = leading.info().duration.max(1);
        let offset = t / loop_length * loop_length;
        let frame = leading.frame_at(t)?;
        let (duration, timestamp) = (frame.duration(), offset + frame.timestamp());
        let frame = frame.with_timing(duration, timestamp);
        let other = following.frame_at(t)?;
        Ok(self.pair(frame, other))
    }

    /// Close both readers, reporting the first failure
    pub fn close(&mut self) -> Result<()> {
        let first = self.first.close();
        let second = self.second.close();
        first.and(second)
    }

    /// Give back both readers in argument order
    pub fn into_inner(self) -> (BoxedReader, BoxedReader) {
        (self.first, self.second)
    }
}

/// Animated beats static; between two animations the finer cadence wins,
/// ties going to the first argument
pub fn choose_controller(first: &MediaInfo, second: &MediaInfo) -> Controller {
    match (first.is_animated(), second.is_animated()) {
        (false, true) => Controller::Second,
        (true, true) if second.frame_duration < first.frame_duration => Controller::Second,
        _ => Controller::First,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::test_support::*;

    fn boxed(format: &str, durations: &[u64]) -> BoxedReader {
        Box::new(list_reader(format, durations))
    }

    fn collect(reader: &mut DualReader) -> Vec<DualFrame> {
        let mut pairs = Vec::new();
        reader
            .for_each_pair(|pair| {
                pairs.push(pair);
                Ok(())
            })
            .unwrap();
        pairs
    }

    #[test]
    fn test_finer_cadence_controls() {
        let mut reader = DualReader::new(boxed("gif", &[10_000; 6]), boxed("mp4", &[20_000; 2])).unwrap();

        assert_eq!(reader.controller(), Controller::First);
        let pairs = collect(&mut reader);
        assert_eq!(pairs.len(), 6);
        assert_eq!(reader.info().frame_count, 6);

        assert_eq!(marker(&pairs[1].second), 0);
        assert_eq!(marker(&pairs[2].second), 1);
        assert_eq!(pairs[5].timestamp, 50_000);
    }

    #[test]
    fn test_controller_loops_to_cover_longer_follower() {
        let mut reader = DualReader::new(boxed("gif", &[10_000; 3]), boxed("mp4", &[20_000; 3])).unwrap();

        assert_eq!(reader.info().duration, 60_000);
        let pairs = collect(&mut reader);
        assert_eq!(pairs.len(), 6);
        assert_eq!(reader.info().frame_count, 6);

        let markers: Vec<_> = pairs.iter().map(|p| marker(&p.first)).collect();
        assert_eq!(markers, vec![0, 1, 2, 0, 1, 2]);
        let timestamps: Vec<_> = pairs.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![0, 10_000, 20_000, 30_000, 40_000, 50_000]);
        assert_eq!(marker(&pairs[4].second), 2);
    }

    #[test]
    fn test_animated_controls_over_static() {
        let mut reader = DualReader::new(boxed("png", &[33_333]), boxed("gif", &[20_000; 5])).unwrap();

        assert_eq!(reader.controller(), Controller::Second);
        assert_eq!(reader.info().format, "gif");

        let pairs = collect(&mut reader);
        assert_eq!(pairs.len(), 5);
        assert_eq!(marker(&pairs[3].second), 3);
        assert_eq!(marker(&pairs[3].first), 0);
        assert_eq!(pairs[3].first.timestamp(), pairs[3].timestamp);
    }

    #[test]
    fn test_tie_goes_to_first() {
        let first = MediaInfo::from_times("gif", &crate::media::stack_durations([10_000; 3]), 1, 1);
        let second = MediaInfo::from_times("gif", &crate::media::stack_durations([10_000; 5]), 1, 1);
        assert_eq!(choose_controller(&first, &second), Controller::First);
        assert_eq!(choose_controller(&second, &first), Controller::First);
    }

    #[test]
    fn test_pair_at_wraps() {
        let mut reader = DualReader::new(boxed("gif", &[10_000; 3]), boxed("mp4", &[20_000; 3])).unwrap();

        let pair = reader.pair_at(45_000).unwrap();
        assert_eq!(pair.timestamp, 40_000);
        assert_eq!(marker(&pair.first), 1);
        assert_eq!(marker(&pair.second), 2);

        let wrapped = reader.pair_at(60_000 + 45_000).unwrap();
        assert_eq!(wrapped.timestamp, 40_000);
        assert!(reader.close().is_ok());
    }
}
