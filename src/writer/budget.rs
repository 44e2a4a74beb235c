//! Bitrate budgeting and codec selection for native video output.
//!
//! Everything here is plain arithmetic so it can be tested without FFmpeg.

use tracing::debug;

use crate::writer::WriterOptions;

/// Sample rates Opus accepts, highest first
pub const OPUS_SAMPLE_RATES: [u32; 5] = [48_000, 24_000, 16_000, 12_000, 8_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Vp8,
}

impl VideoCodec {
    /// FFmpeg encoder name
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Vp8 => "libvpx",
        }
    }

    /// Private encoder options for the fastest, lowest-latency encode
    pub fn encoder_options(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::H264 => &[("preset", "ultrafast"), ("tune", "zerolatency")],
            Self::Vp8 => &[("deadline", "realtime"), ("cpu-used", "8")],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Opus,
}

impl AudioCodec {
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Opus => "libopus",
        }
    }
}

/// Codecs used for one output container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecPlan {
    pub video: VideoCodec,
    pub audio: AudioCodec,
}

impl CodecPlan {
    /// WebM gets VP8 + Opus (VP9 is several times slower); everything else
    /// gets H.264 + AAC
    pub fn for_container(format: &str) -> Self {
        match format.to_lowercase().as_str() {
            "webm" => Self {
                video: VideoCodec::Vp8,
                audio: AudioCodec::Opus,
            },
            _ => Self {
                video: VideoCodec::H264,
                audio: AudioCodec::Aac,
            },
        }
    }

    /// Sample rate the audio encoder will actually run at
    pub fn audio_sample_rate(&self, requested: u32) -> u32 {
        match self.audio {
            AudioCodec::Opus => snap_sample_rate(requested),
            AudioCodec::Aac => requested,
        }
    }
}

/// Nearest rate on the Opus ladder; ties go to the higher rate
pub fn snap_sample_rate(rate: u32) -> u32 {
    OPUS_SAMPLE_RATES
        .iter()
        .copied()
        .min_by_key(|candidate| candidate.abs_diff(rate))
        .unwrap_or(OPUS_SAMPLE_RATES[0])
}

/// Largest even dimensions not above the input, as 4:2:0 requires
pub fn even_dimensions(width: u32, height: u32) -> (u32, u32) {
    ((width & !1).max(2), (height & !1).max(2))
}

/// Frames between forced keyframes
pub fn keyframe_interval(frame_rate: f64, seconds: u32) -> u32 {
    (frame_rate * seconds as f64).round().max(1.0) as u32
}

/// Bitrates chosen for one output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateBudget {
    /// Video bits per second
    pub video_bitrate: u64,

    /// Audio bits per second (0 without audio)
    pub audio_bitrate: u64,

    /// Duration the budget was computed for, in microseconds
    pub duration: u64,

    /// Whether both rates were scaled down to meet the size ceiling
    pub constrained: bool,
}

impl BitrateBudget {
    /// Video rate from `width × height × fps × bits_per_pixel`, audio rate
    /// from the options, both scaled down together if the estimated file
    /// would exceed `max_file_size`
    pub fn new(width: u32, height: u32, frame_rate: f64, options: &WriterOptions) -> Self {
        let video = (width as f64 * height as f64 * frame_rate * options.video.bits_per_pixel)
            .max(1.0) as u64;
        let audio = if options.with_audio {
            options.audio_bitrate
        } else {
            0
        };
        let duration = match (options.expected_duration, options.max_duration) {
            (expected, 0) => expected,
            (0, max) => max,
            (expected, max) => expected.min(max),
        };

        let mut budget = Self {
            video_bitrate: video,
            audio_bitrate: audio,
            duration,
            constrained: false,
        };

        let estimate = budget.estimated_size();
        if options.max_file_size > 0 && estimate > options.max_file_size as f64 {
            let factor = options.max_file_size as f64 / estimate;
            budget.video_bitrate = ((video as f64 * factor).floor() as u64).max(1);
            budget.audio_bitrate = (audio as f64 * factor).floor() as u64;
            budget.constrained = true;
            debug!(
                "Bitrate scaled by {:.3} to fit {} bytes: video {} bps, audio {} bps",
                factor, options.max_file_size, budget.video_bitrate, budget.audio_bitrate
            );
        }
        budget
    }

    /// Expected output size in bytes
    pub fn estimated_size(&self) -> f64 {
        let seconds = self.duration as f64 / 1_000_000.0;
        (self.video_bitrate + self.audio_bitrate) as f64 * seconds / 8.0
    }
}
