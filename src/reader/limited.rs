use tracing::debug;

use crate::error::{MediaError, Result};
use crate::media::{locate, FrameTime, ImageFrame, MediaInfo};
use crate::reader::{wrap_timestamp, AudioIter, BoxedReader, FrameIter, MediaReader};

/// One output frame and the source timestamp it is sampled from
#[derive(Debug, Clone, Copy)]
struct Slot {
    source_timestamp: u64,
    time: FrameTime,
}

/// Caps a reader at a maximum duration, or loops a shorter one up to it
pub struct LimitedReader {
    source: BoxedReader,
    schedule: Vec<Slot>,
    times: Vec<FrameTime>,
    info: MediaInfo,
    cap: u64,
}

impl LimitedReader {
    pub fn new(mut source: BoxedReader, max_duration: u64) -> Result<Self> {
        if max_duration == 0 {
            return Err(MediaError::InvalidParameters {
                details: "maximum duration must be positive".to_string(),
            }
            .into());
        }

        let source_times = source.frame_times()?;
        let source_duration = source.info().duration;
        if source_times.is_empty() || source_duration == 0 {
            return Err(MediaError::Empty {
                path: source.info().format.clone(),
            }
            .into());
        }

        let schedule = if source_duration > max_duration {
            truncate(&source_times, max_duration)
        } else {
            extend(&source_times, source_duration, max_duration)
        };
        debug!(
            "Limiting {} us of {} to {} us ({} frames)",
            source_duration,
            source.info().format,
            max_duration,
            schedule.len()
        );

        let times: Vec<FrameTime> = schedule.iter().map(|slot| slot.time).collect();
        let source_info = source.info();
        let mut info = MediaInfo::from_times(
            &source_info.format,
            &times,
            source_info.width,
            source_info.height,
        );
        info.audio = source_info.audio;

        Ok(Self {
            source,
            schedule,
            times,
            info,
            cap: max_duration,
        })
    }
}

/// Keep whole frames while they fit under the cap, never fewer than one
fn truncate(source_times: &[FrameTime], cap: u64) -> Vec<Slot> {
    let mut schedule = Vec::new();
    for time in source_times {
        if !schedule.is_empty() && time.end() > cap {
            break;
        }
        schedule.push(Slot {
            source_timestamp: time.timestamp,
            time: *time,
        });
    }
    schedule
}

/// Replay the source circularly until the cap, clipping the final frame
fn extend(source_times: &[FrameTime], source_duration: u64, cap: u64) -> Vec<Slot> {
    let mut schedule = Vec::new();
    let mut offset = 0;
    while offset < cap {
        for time in source_times {
            let start = offset + time.timestamp;
            if start >= cap {
                break;
            }
            let end = (start + time.duration).min(cap);
            schedule.push(Slot {
                source_timestamp: time.timestamp,
                time: FrameTime::new(start, end - start),
            });
        }
        offset += source_duration;
    }
    schedule
}

impl MediaReader for LimitedReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn frame_times(&mut self) -> Result<Vec<FrameTime>> {
        Ok(self.times.clone())
    }

    fn frame_at(&mut self, timestamp: u64) -> Result<ImageFrame> {
        let t = wrap_timestamp(&self.info, timestamp)?;
        let slot = self.schedule[locate(&self.times, t)];
        let frame = self.source.frame_at(slot.source_timestamp)?;
        Ok(frame.with_timing(slot.time.duration, slot.time.timestamp))
    }

    fn frames(&mut self) -> Result<FrameIter<'_>> {
        let source = &mut self.source;
        let iter = self.schedule.iter().map(move |slot| {
            source
                .frame_at(slot.source_timestamp)
                .map(|frame| frame.with_timing(slot.time.duration, slot.time.timestamp))
        });
        Ok(Box::new(iter))
    }

    fn audio_frames(&mut self) -> Result<AudioIter<'_>> {
        let cap = self.cap;
        let audio = self.source.audio_frames()?;
        Ok(Box::new(audio.take_while(move |frame| match frame {
            Ok(frame) => frame.timestamp() < cap,
            Err(_) => true,
        })))
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioBuffer, AudioInfo, Frame};
    use crate::reader::test_support::*;

    fn boxed(durations: &[u64]) -> BoxedReader {
        Box::new(list_reader("gif", durations))
    }

    #[test]
    fn test_truncates_whole_frames() {
        let mut reader = LimitedReader::new(boxed(&[10_000, 10_000, 10_000, 10_000]), 25_000).unwrap();

        assert_eq!(reader.info().frame_count, 2);
        assert_eq!(reader.info().duration, 20_000);
        let markers: Vec<_> = reader.frames().unwrap().map(|f| marker(&f.unwrap())).collect();
        assert_eq!(markers, vec![0, 1]);
    }

    #[test]
    fn test_keeps_at_least_one_frame() {
        let reader = LimitedReader::new(boxed(&[50_000, 50_000]), 10_000).unwrap();
        assert_eq!(reader.info().frame_count, 1);
        assert_eq!(reader.info().duration, 50_000);
    }

    #[test]
    fn test_loops_short_source() {
        let mut reader = LimitedReader::new(boxed(&[10_000, 20_000]), 75_000).unwrap();

        assert_eq!(reader.info().duration, 75_000);
        let frames: Vec<_> = reader.frames().unwrap().map(|f| f.unwrap()).collect();
        let markers: Vec<_> = frames.iter().map(marker).collect();
        assert_eq!(markers, vec![0, 1, 0, 1, 0, 1]);

        let last = frames.last().unwrap();
        assert_eq!(last.timestamp(), 70_000);
        assert_eq!(last.end(), 75_000);

        assert_eq!(marker(&reader.frame_at(35_000).unwrap()), 0);
        assert_eq!(marker(&reader.frame_at(45_000).unwrap()), 1);
        assert_frame_at_is_consistent(&mut reader);
    }

    #[test]
    fn test_audio_stops_at_cap() {
        let audio = (0..4)
            .map(|i| Frame::new(AudioBuffer::new(vec![0.0; 20], 2, 1000), 10_000, i * 10_000))
            .collect();
        let info = AudioInfo {
            channels: 2,
            sample_rate: 1000,
            bitrate: 0,
        };
        let source = list_reader("mp4", &[10_000; 4]).with_audio(audio, info);

        let mut reader = LimitedReader::new(Box::new(source), 25_000).unwrap();
        assert_eq!(reader.audio_frames().unwrap().count(), 3);
        assert!(reader.info().has_audio());
    }
}
