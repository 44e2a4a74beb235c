use image::RgbaImage;

/// A decoded image frame
pub type ImageFrame = Frame<RgbaImage>;

/// A decoded block of audio samples
pub type AudioFrame = Frame<AudioBuffer>;

/// One timestamped unit of decoded media
///
/// Timestamps and durations are microseconds. A frame is never shorter
/// than one microsecond; constructors clamp zero durations.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame<T> {
    content: T,
    duration: u64,
    timestamp: u64,
}

impl<T> Frame<T> {
    /// Create a new frame
    pub fn new(content: T, duration: u64, timestamp: u64) -> Self {
        Self {
            content,
            duration: duration.max(1),
            timestamp,
        }
    }

    /// Decoded payload
    pub fn content(&self) -> &T {
        &self.content
    }

    /// Take ownership of the decoded payload
    pub fn into_content(self) -> T {
        self.content
    }

    /// Display duration in microseconds
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Presentation timestamp in microseconds
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Microsecond at which the next frame starts
    pub fn end(&self) -> u64 {
        self.timestamp + self.duration
    }

    /// Same timing, different payload
    pub fn with_content<U>(self, content: U) -> Frame<U> {
        Frame::new(content, self.duration, self.timestamp)
    }

    /// Same payload, different timing
    pub fn with_timing(self, duration: u64, timestamp: u64) -> Self {
        Self::new(self.content, duration, timestamp)
    }

    /// Apply a playback speed multiplier to the timing
    ///
    /// A speed of 2.0 halves both the duration and the timestamp.
    /// Non-positive or non-finite speeds leave the frame untouched.
    pub fn with_speed(self, speed: f64) -> Self {
        if !speed.is_finite() || speed <= 0.0 || speed == 1.0 {
            return self;
        }
        let duration = (self.duration as f64 / speed).round() as u64;
        let timestamp = (self.timestamp as f64 / speed).round() as u64;
        Self::new(self.content, duration, timestamp)
    }
}

impl AudioFrame {
    /// Speed change for audio also changes the declared sample rate,
    /// so the encoder's resampler stretches or squeezes the samples.
    pub fn with_audio_speed(self, speed: f64) -> Self {
        if !speed.is_finite() || speed <= 0.0 || speed == 1.0 {
            return self;
        }
        let rate = (self.content.sample_rate as f64 * speed).round() as u32;
        let sped = self.with_speed(speed);
        let (duration, timestamp) = (sped.duration, sped.timestamp);
        let mut content = sped.content;
        content.sample_rate = rate.max(1);
        Frame::new(content, duration, timestamp)
    }
}

/// Interleaved 32-bit float PCM
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    /// Samples, channel-interleaved: `[L0, R0, L1, R1, ...]`
    pub samples: Vec<f32>,
    /// Number of interleaved channels
    pub channels: u16,
    /// Samples per second per channel
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Number of samples per channel
    pub fn sample_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback length in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.sample_frames() as u64 * 1_000_000 / self.sample_rate as u64
    }

    /// Reverse the sample order while keeping channel order inside each
    /// sample frame intact
    pub fn reverse_in_place(&mut self) {
        let channels = self.channels as usize;
        let frames = self.sample_frames();
        self.samples.truncate(frames * channels);
        for i in 0..frames / 2 {
            let j = frames - 1 - i;
            for c in 0..channels {
                self.samples.swap(i * channels + c, j * channels + c);
            }
        }
    }
}

/// Position of one frame on a reader's timeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTime {
    pub timestamp: u64,
    pub duration: u64,
}

impl FrameTime {
    pub fn new(timestamp: u64, duration: u64) -> Self {
        Self {
            timestamp,
            duration: duration.max(1),
        }
    }

    pub fn end(&self) -> u64 {
        self.timestamp + self.duration
    }
}

/// Lay frame durations end to end starting at zero
pub fn stack_durations<I: IntoIterator<Item = u64>>(durations: I) -> Vec<FrameTime> {
    let mut at = 0;
    durations
        .into_iter()
        .map(|duration| {
            let time = FrameTime::new(at, duration);
            at = time.end();
            time
        })
        .collect()
}

/// Index of the frame active at `timestamp`
///
/// `times` must be sorted and non-empty. Timestamps past the end resolve to
/// the last frame.
pub fn locate(times: &[FrameTime], timestamp: u64) -> usize {
    times
        .partition_point(|time| time.timestamp <= timestamp)
        .saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_is_clamped() {
        let frame = Frame::new((), 0, 10);
        assert_eq!(frame.duration(), 1);
    }

    #[test]
    fn test_speed_scales_timing() {
        let frame = Frame::new((), 40_000, 80_000).with_speed(2.0);
        assert_eq!(frame.duration(), 20_000);
        assert_eq!(frame.timestamp(), 40_000);

        let untouched = Frame::new((), 40_000, 80_000).with_speed(0.0);
        assert_eq!(untouched.duration(), 40_000);
    }

    #[test]
    fn test_audio_speed_changes_rate() {
        let buffer = AudioBuffer::new(vec![0.0; 200], 2, 1000);
        let frame = Frame::new(buffer, 100_000, 0).with_audio_speed(2.0);
        assert_eq!(frame.content().sample_rate, 2000);
        assert_eq!(frame.duration(), 50_000);
    }

    #[test]
    fn test_reverse_keeps_channel_order() {
        let mut buffer = AudioBuffer::new(vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2, 48000);
        buffer.reverse_in_place();
        assert_eq!(buffer.samples, vec![3.0, -3.0, 2.0, -2.0, 1.0, -1.0]);
    }

    #[test]
    fn test_locate() {
        let times = stack_durations([10, 20, 30]);
        assert_eq!(locate(&times, 0), 0);
        assert_eq!(locate(&times, 9), 0);
        assert_eq!(locate(&times, 10), 1);
        assert_eq!(locate(&times, 29), 1);
        assert_eq!(locate(&times, 30), 2);
        assert_eq!(locate(&times, 1000), 2);
    }
}
