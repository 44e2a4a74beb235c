//! FFmpeg-backed container reader.
//!
//! Opening a file runs one decode pass that records every presentation
//! timestamp, so frame count and per-frame durations are exact even for
//! variable frame rate sources. Random access seeks to the nearest keyframe
//! and decodes forward; short forward jumps skip the seek entirely.

use std::io::Write;
use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use ffmpeg::{
    codec::context::Context as CodecContext,
    decoder::{Audio as AudioDecoder, Video as VideoDecoder},
    format::{context::Input, sample::Type as SampleType, Pixel, Sample},
    frame::{Audio as AudioFrameBuffer, Video as VideoFrameBuffer},
    media::Type as MediaType,
    software::{
        resampling::Context as ResamplingContext,
        scaling::{Context as ScalingContext, Flags as ScalingFlags},
    },
    ChannelLayout, Packet, Rational,
};
use image::RgbaImage;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{MediaError, Result};
use crate::media::{
    locate, AudioBuffer, AudioFrame, AudioInfo, Frame, FrameTime, ImageFrame, MediaInfo,
    MediaSource,
};
use crate::reader::{wrap_timestamp, AudioIter, FrameIter, MediaReader};

/// Forward distance (µs) that is decoded through instead of seeking
const SEQUENTIAL_WINDOW: u64 = 1_000_000;

/// Frame duration assumed when the container reports no frame rate
const FALLBACK_FRAME_DURATION: u64 = 33_333;

/// Convert a stream timestamp to microseconds
fn to_micros(pts: i64, time_base: Rational) -> i64 {
    let numerator = time_base.numerator() as i128;
    let denominator = time_base.denominator().max(1) as i128;
    (pts as i128 * numerator * 1_000_000 / denominator) as i64
}

/// Nominal frame duration (µs) from a stream's average frame rate
fn nominal_duration(rate: Rational) -> u64 {
    if rate.numerator() <= 0 || rate.denominator() <= 0 {
        return FALLBACK_FRAME_DURATION;
    }
    (1_000_000 * rate.denominator() as u64 / rate.numerator() as u64).max(1)
}

/// Build the frame index from raw start times (µs, unsorted)
fn index_from_starts(mut starts: Vec<i64>, nominal: u64) -> (i64, Vec<FrameTime>) {
    starts.sort_unstable();
    starts.dedup();
    let origin = starts.first().copied().unwrap_or(0);

    let times = starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let duration = match starts.get(i + 1) {
                Some(next) => (next - start) as u64,
                None => nominal,
            };
            FrameTime::new((start - origin) as u64, duration)
        })
        .collect();
    (origin, times)
}

/// Open decode handles for the best video stream
struct VideoHandles {
    input: Input,
    decoder: VideoDecoder,
    stream_index: usize,
    time_base: Rational,
}

impl VideoHandles {
    fn open(path: &Path) -> std::result::Result<Self, ffmpeg::Error> {
        let input = ffmpeg::format::input(&path)?;
        let stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or(ffmpeg::Error::StreamNotFound)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        Ok(Self {
            input,
            decoder,
            stream_index,
            time_base,
        })
    }
}

/// Reader for any container FFmpeg can demux
pub struct NativeReader {
    path: PathBuf,
    handles: Option<VideoHandles>,
    scaler: Option<ScalingContext>,
    decoded: VideoFrameBuffer,
    origin: i64,
    times: Vec<FrameTime>,
    info: MediaInfo,
    /// Index of the most recently decoded frame
    position: Option<usize>,
    /// Most recently converted frame
    cached: Option<(usize, RgbaImage)>,
    eof: bool,
    /// Keeps spooled byte sources alive for as long as the reader
    _spool: Option<NamedTempFile>,
}

impl NativeReader {
    pub fn open(source: &MediaSource) -> Result<Self> {
        ffmpeg::init()?;

        let format = source.format();
        let (path, spool) = match source {
            MediaSource::File(path) => (path.clone(), None),
            MediaSource::Bytes { data, .. } => {
                let mut file = tempfile::Builder::new()
                    .prefix("reframe-")
                    .suffix(&format!(".{}", format))
                    .tempfile()?;
                file.write_all(data)?;
                file.flush()?;
                (file.path().to_path_buf(), Some(file))
            }
        };

        let unreadable = |e: ffmpeg::Error| MediaError::Unreadable {
            path: source.describe(),
            reason: e.to_string(),
        };

        let mut handles = VideoHandles::open(&path).map_err(unreadable)?;
        let nominal = handles
            .input
            .stream(handles.stream_index)
            .map(|stream| nominal_duration(stream.avg_frame_rate()))
            .unwrap_or(FALLBACK_FRAME_DURATION);

        let starts = Self::prime(&mut handles).map_err(unreadable)?;
        if starts.is_empty() {
            return Err(MediaError::Unreadable {
                path: source.describe(),
                reason: "no decodable video frames".to_string(),
            }
            .into());
        }
        let (origin, times) = index_from_starts(starts, nominal);

        let mut info = MediaInfo::from_times(
            &format,
            &times,
            handles.decoder.width(),
            handles.decoder.height(),
        );
        info.audio = Self::probe_audio(&handles.input);

        // Priming consumed the stream; fresh handles start at the beginning
        let handles = VideoHandles::open(&path).map_err(unreadable)?;

        info!(
            "Opened {}: {} frames, {} us, {}x{}, audio: {}",
            source.describe(),
            info.frame_count,
            info.duration,
            info.width,
            info.height,
            info.has_audio()
        );

        Ok(Self {
            path,
            handles: Some(handles),
            scaler: None,
            decoded: VideoFrameBuffer::empty(),
            origin,
            times,
            info,
            position: None,
            cached: None,
            eof: false,
            _spool: spool,
        })
    }

    /// Decode everything once, returning raw frame start times in µs
    fn prime(handles: &mut VideoHandles) -> std::result::Result<Vec<i64>, ffmpeg::Error> {
        let mut starts = Vec::new();
        let mut frame = VideoFrameBuffer::empty();
        let mut packet = Packet::empty();
        let time_base = handles.time_base;
        let mut record = |decoder: &mut VideoDecoder, starts: &mut Vec<i64>| {
            while decoder.receive_frame(&mut frame).is_ok() {
                let pts = frame.timestamp().or(frame.pts()).unwrap_or(0);
                starts.push(to_micros(pts, time_base));
            }
        };

        loop {
            match packet.read(&mut handles.input) {
                Ok(()) => {
                    if packet.stream() != handles.stream_index {
                        continue;
                    }
                    handles.decoder.send_packet(&packet)?;
                    record(&mut handles.decoder, &mut starts);
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e),
            }
        }
        handles.decoder.send_eof()?;
        record(&mut handles.decoder, &mut starts);
        Ok(starts)
    }

    fn probe_audio(input: &Input) -> Option<AudioInfo> {
        let stream = input.streams().best(MediaType::Audio)?;
        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().audio())
            .ok()?;
        Some(AudioInfo {
            channels: decoder.channels(),
            sample_rate: decoder.rate(),
            bitrate: decoder.bit_rate() as u64,
        })
    }

    fn handles(&mut self) -> Result<&mut VideoHandles> {
        self.handles.as_mut().ok_or_else(|| {
            MediaError::Decode {
                reason: format!("reader for {} is closed", self.path.display()),
            }
            .into()
        })
    }

    /// Jump to the keyframe at or before `timestamp` (normalized µs)
    fn seek(&mut self, timestamp: u64) -> Result<()> {
        let target = self.origin + timestamp as i64;
        let handles = self.handles()?;
        handles.decoder.flush();
        handles.input.seek(target, ..target)?;
        debug!("Seeked {} to {} us", self.path.display(), timestamp);
        self.position = None;
        self.eof = false;
        Ok(())
    }

    /// Decode the next video frame into `self.decoded`, returning its index
    fn decode_next(&mut self) -> Result<Option<usize>> {
        let mut packet = Packet::empty();
        loop {
            let eof = self.eof;
            let handles = self.handles.as_mut().ok_or_else(|| MediaError::Decode {
                reason: "reader is closed".to_string(),
            })?;

            if handles.decoder.receive_frame(&mut self.decoded).is_ok() {
                let pts = self.decoded.timestamp().or(self.decoded.pts()).unwrap_or(0);
                let micros = (to_micros(pts, handles.time_base) - self.origin).max(0) as u64;
                let index = locate(&self.times, micros);
                self.position = Some(index);
                return Ok(Some(index));
            }
            if eof {
                return Ok(None);
            }

            match packet.read(&mut handles.input) {
                Ok(()) => {
                    if packet.stream() == handles.stream_index {
                        handles.decoder.send_packet(&packet)?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    handles.decoder.send_eof()?;
                    self.eof = true;
                }
                Err(e) => {
                    return Err(MediaError::Decode {
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
    }

    /// Convert `self.decoded` into an owned RGBA image
    fn convert(&mut self) -> Result<RgbaImage> {
        let (width, height) = (self.info.width, self.info.height);
        if self.scaler.is_none() {
            self.scaler = Some(ScalingContext::get(
                self.decoded.format(),
                self.decoded.width(),
                self.decoded.height(),
                Pixel::RGBA,
                width,
                height,
                ScalingFlags::BILINEAR,
            )?);
        }

        let mut rgba = VideoFrameBuffer::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(&self.decoded, &mut rgba)?;
        }

        let row = width as usize * 4;
        let stride = rgba.stride(0);
        let data = rgba.data(0);
        let mut buffer = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            buffer.extend_from_slice(&data[y * stride..y * stride + row]);
        }

        RgbaImage::from_raw(width, height, buffer).ok_or_else(|| {
            MediaError::Decode {
                reason: "decoded frame has an unexpected size".to_string(),
            }
            .into()
        })
    }

    /// Frame with the timing of the decoded `index`, never the requested one
    fn timed(&self, index: usize, image: RgbaImage) -> ImageFrame {
        let time = self.times[index];
        Frame::new(image, time.duration, time.timestamp)
    }

    /// Decode the next frame that has not been handed out yet
    fn next_frame(&mut self) -> Result<Option<ImageFrame>> {
        let previous = self.position;
        while let Some(index) = self.decode_next()? {
            if previous.map_or(false, |p| index <= p) {
                continue;
            }
            let image = self.convert()?;
            self.cached = Some((index, image.clone()));
            return Ok(Some(self.timed(index, image)));
        }
        Ok(None)
    }
}

/// Index a forward decode settles on when looking for `target`
///
/// Frames before the target are skipped. A frame past it (the target was
/// dropped by the decoder) is kept with its own index.
fn landed_on(decoded: usize, target: usize) -> Option<usize> {
    (decoded >= target).then_some(decoded)
}

impl MediaReader for NativeReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn frame_times(&mut self) -> Result<Vec<FrameTime>> {
        Ok(self.times.clone())
    }

    fn frame_at(&mut self, timestamp: u64) -> Result<ImageFrame> {
        let t = wrap_timestamp(&self.info, timestamp)?;
        let target = locate(&self.times, t);

        if let Some((index, image)) = &self.cached {
            if *index == target {
                return Ok(self.timed(target, image.clone()));
            }
        }

        let sequential = match self.position {
            Some(p) => p < target && self.times[target].timestamp - self.times[p].timestamp <= SEQUENTIAL_WINDOW,
            None => false,
        };
        if !sequential {
            self.seek(self.times[target].timestamp)?;
        }

        while let Some(index) = self.decode_next()? {
            if let Some(shown) = landed_on(index, target) {
                if shown != target {
                    debug!("Decoder overshot frame {} and landed on {}", target, shown);
                }
                let image = self.convert()?;
                self.cached = Some((shown, image.clone()));
                return Ok(self.timed(shown, image));
            }
        }

        Err(MediaError::Decode {
            reason: format!("frame at {} us not found in {}", t, self.path.display()),
        }
        .into())
    }

    fn frames(&mut self) -> Result<FrameIter<'_>> {
        self.seek(0)?;
        Ok(Box::new(std::iter::from_fn(move || self.next_frame().transpose())))
    }

    fn audio_frames(&mut self) -> Result<AudioIter<'_>> {
        if self.handles.is_none() {
            return Err(MediaError::Decode {
                reason: format!("reader for {} is closed", self.path.display()),
            }
            .into());
        }
        match AudioDecodeIter::open(&self.path, self.origin)? {
            Some(iter) => Ok(Box::new(iter)),
            None => Ok(Box::new(std::iter::empty())),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.handles.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
        self.scaler = None;
        self.cached = None;
        Ok(())
    }
}

impl Drop for NativeReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Second demux pass over the audio stream, resampled to packed f32
struct AudioDecodeIter {
    input: Input,
    decoder: AudioDecoder,
    resampler: ResamplingContext,
    stream_index: usize,
    time_base: Rational,
    origin: i64,
    channels: u16,
    rate: u32,
    eof: bool,
    done: bool,
}

impl AudioDecodeIter {
    fn open(path: &Path, origin: i64) -> Result<Option<Self>> {
        let input = ffmpeg::format::input(&path)?;
        let Some(stream) = input.streams().best(MediaType::Audio) else {
            return Ok(None);
        };
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .audio()?;

        let channels = decoder.channels().max(1);
        let mut layout = decoder.channel_layout();
        if layout.is_empty() {
            layout = ChannelLayout::default(channels as i32);
        }
        let resampler = ResamplingContext::get(
            decoder.format(),
            layout,
            decoder.rate(),
            Sample::F32(SampleType::Packed),
            layout,
            decoder.rate(),
        )?;

        Ok(Some(Self {
            rate: decoder.rate(),
            input,
            decoder,
            resampler,
            stream_index,
            time_base,
            origin,
            channels,
            eof: false,
            done: false,
        }))
    }

    fn receive(&mut self) -> Result<Option<AudioFrame>> {
        let mut decoded = AudioFrameBuffer::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut packed = AudioFrameBuffer::empty();
        self.resampler.run(&decoded, &mut packed)?;

        let count = packed.samples() * self.channels as usize;
        let samples: Vec<f32> = packed.data(0)[..count * 4]
            .chunks_exact(4)
            .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();

        let pts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
        let timestamp = (to_micros(pts, self.time_base) - self.origin).max(0) as u64;
        let buffer = AudioBuffer::new(samples, self.channels, self.rate);
        let duration = buffer.duration_us();
        Ok(Some(Frame::new(buffer, duration, timestamp)))
    }

    fn advance(&mut self) -> Result<Option<AudioFrame>> {
        let mut packet = Packet::empty();
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(None);
            }
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.decoder.send_packet(&packet)?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof()?;
                    self.eof = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Iterator for AudioDecodeIter {
    type Item = Result<AudioFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.advance().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_from_unsorted_starts() {
        let (origin, times) = index_from_starts(vec![1_040_000, 1_000_000, 1_020_000, 1_020_000], 20_000);

        assert_eq!(origin, 1_000_000);
        assert_eq!(
            times,
            vec![
                FrameTime::new(0, 20_000),
                FrameTime::new(20_000, 20_000),
                FrameTime::new(40_000, 20_000),
            ]
        );
    }

    #[test]
    fn test_overshoot_keeps_decoded_index() {
        assert_eq!(landed_on(3, 5), None);
        assert_eq!(landed_on(5, 5), Some(5));
        assert_eq!(landed_on(7, 5), Some(7));
    }

    #[test]
    fn test_nominal_duration() {
        assert_eq!(nominal_duration(Rational::new(25, 1)), 40_000);
        assert_eq!(nominal_duration(Rational::new(0, 1)), FALLBACK_FRAME_DURATION);
    }

    #[test]
    fn test_to_micros() {
        assert_eq!(to_micros(90_000, Rational::new(1, 90_000)), 1_000_000);
        assert_eq!(to_micros(3, Rational::new(1, 25)), 120_000);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let result = NativeReader::open(&MediaSource::file("/no/such/clip.mp4"));
        assert!(result.is_err());
    }
}
