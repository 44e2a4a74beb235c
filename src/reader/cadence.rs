use crate::error::{MediaError, Result};
use crate::media::{FrameTime, ImageFrame, MediaInfo};
use crate::reader::{wrap_timestamp, AudioIter, BoxedReader, FrameIter, MediaReader};

/// Resamples a reader with irregular frame durations onto a fixed grid
///
/// Slot `i` starts at `i * frame_duration` and shows whichever source frame
/// is active at that instant. The final slot is shortened so the total
/// duration is unchanged.
pub struct CadenceReader {
    source: BoxedReader,
    frame_duration: u64,
    info: MediaInfo,
}

impl CadenceReader {
    pub fn new(source: BoxedReader, frame_duration: u64) -> Result<Self> {
        if frame_duration == 0 {
            return Err(MediaError::InvalidParameters {
                details: "cadence frame duration must be positive".to_string(),
            }
            .into());
        }

        let source_info = source.info();
        let duration = source_info.duration;
        let frame_count = duration.div_ceil(frame_duration) as usize;
        let info = MediaInfo {
            format: source_info.format.clone(),
            frame_count,
            duration,
            frame_duration,
            width: source_info.width,
            height: source_info.height,
            audio: source_info.audio,
        };

        Ok(Self {
            source,
            frame_duration,
            info,
        })
    }

    fn slot(&self, index: usize) -> FrameTime {
        let timestamp = index as u64 * self.frame_duration;
        FrameTime::new(timestamp, self.frame_duration.min(self.info.duration - timestamp))
    }
}

impl MediaReader for CadenceReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn frame_times(&mut self) -> Result<Vec<FrameTime>> {
        Ok((0..self.info.frame_count).map(|i| self.slot(i)).collect())
    }

    fn frame_at(&mut self, timestamp: u64) -> Result<ImageFrame> {
        let t = wrap_timestamp(&self.info, timestamp)?;
        let slot = self.slot((t / self.frame_duration) as usize);
        let frame = self.source.frame_at(slot.timestamp)?;
        Ok(frame.with_timing(slot.duration, slot.timestamp))
    }

    fn frames(&mut self) -> Result<FrameIter<'_>> {
        let count = self.info.frame_count;
        Ok(Box::new((0..count).map(move |i| {
            let slot = self.slot(i);
            self.frame_at(slot.timestamp)
        })))
    }

    fn audio_frames(&mut self) -> Result<AudioIter<'_>> {
        self.source.audio_frames()
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::test_support::*;

    #[test]
    fn test_frame_count_is_ceiling() {
        let source = Box::new(list_reader("gif", &[30_000, 10_000, 35_000]));
        let mut reader = CadenceReader::new(source, 20_000).unwrap();

        assert_eq!(reader.info().frame_count, 4);
        assert_eq!(reader.info().duration, 75_000);

        let times = reader.frame_times().unwrap();
        assert_eq!(times[3], FrameTime::new(60_000, 15_000));
    }

    #[test]
    fn test_slots_sample_active_frame() {
        let source = Box::new(list_reader("gif", &[30_000, 10_000, 35_000]));
        let mut reader = CadenceReader::new(source, 20_000).unwrap();

        let frames: Vec<_> = reader.frames().unwrap().map(|f| f.unwrap()).collect();
        let markers: Vec<_> = frames.iter().map(marker).collect();
        assert_eq!(markers, vec![0, 0, 2, 2]);
        assert_eq!(frames[1].timestamp(), 20_000);
        assert_eq!(frames[1].duration(), 20_000);
        assert_frame_at_is_consistent(&mut reader);
    }

    #[test]
    fn test_zero_cadence_is_rejected() {
        let source = Box::new(list_reader("gif", &[10_000]));
        assert!(CadenceReader::new(source, 0).is_err());
    }
}
