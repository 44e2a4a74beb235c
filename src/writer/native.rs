//! FFmpeg-backed video/audio writer.
//!
//! The encoder is configured from the first image frame: its size (rounded
//! down to even values) and its duration, which fixes the nominal frame rate.
//! Video timestamps are kept in microseconds end to end. Audio is resampled
//! to the encoder's rate and layout and fed in fixed-size encoder frames.

use ffmpeg_next as ffmpeg;
use ffmpeg::{
    codec::{context::Context as CodecContext, Flags as CodecFlags},
    encoder::{audio::Encoder as AudioEncoder, video::Encoder as VideoEncoder, Encoder},
    format::{context::Output, sample::Type as SampleType, Pixel, Sample},
    frame::{Audio as AudioFrameBuffer, Video as VideoFrameBuffer},
    software::{
        resampling::Context as ResamplingContext,
        scaling::{Context as ScalingContext, Flags as ScalingFlags},
    },
    ChannelLayout, Dictionary, Packet, Rational,
};
use image::{imageops, RgbaImage};
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::media::{AudioFrame, ImageFrame};
use crate::writer::budget::{even_dimensions, keyframe_interval, BitrateBudget, CodecPlan};
use crate::writer::{MediaWriter, WriterOptions};

/// Encoder frame size used when the codec accepts any
const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;

/// Microsecond time base shared by video encoder and input timestamps
const MICROS: Rational = Rational(1, 1_000_000);

fn encode_error(reason: impl Into<String>) -> MediaError {
    MediaError::Encode {
        reason: reason.into(),
    }
}

/// Pull every ready packet out of `encoder` and mux it
fn drain(
    encoder: &mut Encoder,
    output: &mut Output,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
) -> Result<()> {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(encoder_time_base, stream_time_base);
        packet.write_interleaved(output)?;
    }
    Ok(())
}

/// Copy interleaved f32 samples into a frame of the encoder's sample format
fn fill_samples(frame: &mut AudioFrameBuffer, samples: &[f32], channels: usize) -> Result<()> {
    let count = samples.len() / channels;
    match frame.format() {
        Sample::F32(SampleType::Packed) => {
            let data = frame.data_mut(0);
            for (bytes, sample) in data.chunks_exact_mut(4).zip(samples) {
                bytes.copy_from_slice(&sample.to_ne_bytes());
            }
        }
        Sample::F32(SampleType::Planar) => {
            for channel in 0..channels {
                let data = frame.data_mut(channel);
                for (i, bytes) in data.chunks_exact_mut(4).take(count).enumerate() {
                    bytes.copy_from_slice(&samples[i * channels + channel].to_ne_bytes());
                }
            }
        }
        Sample::I16(SampleType::Packed) => {
            let data = frame.data_mut(0);
            for (bytes, sample) in data.chunks_exact_mut(2).zip(samples) {
                bytes.copy_from_slice(&to_i16(*sample).to_ne_bytes());
            }
        }
        Sample::I16(SampleType::Planar) => {
            for channel in 0..channels {
                let data = frame.data_mut(channel);
                for (i, bytes) in data.chunks_exact_mut(2).take(count).enumerate() {
                    bytes.copy_from_slice(&to_i16(samples[i * channels + channel]).to_ne_bytes());
                }
            }
        }
        other => {
            return Err(encode_error(format!("unsupported encoder sample format {:?}", other)).into())
        }
    }
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Read interleaved f32 samples out of a packed f32 frame
fn packed_samples(frame: &AudioFrameBuffer, channels: usize) -> Vec<f32> {
    let len = frame.samples() * channels * 4;
    frame.data(0)[..len]
        .chunks_exact(4)
        .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

struct VideoStream {
    encoder: VideoEncoder,
    scaler: ScalingContext,
    width: u32,
    height: u32,
    stream_index: usize,
    stream_time_base: Rational,
}

/// Converts incoming audio to the encoder's rate and layout
struct Resampler {
    context: ResamplingContext,
    input_rate: u32,
    input_channels: u16,
}

struct AudioStream {
    encoder: AudioEncoder,
    resampler: Option<Resampler>,
    /// Interleaved f32 samples at the encoder rate, not yet encoded
    fifo: Vec<f32>,
    frame_size: usize,
    channels: usize,
    layout: ChannelLayout,
    rate: u32,
    next_pts: i64,
    stream_index: usize,
    stream_time_base: Rational,
}

impl AudioStream {
    fn resampler_for(&mut self, rate: u32, channels: u16) -> Result<&mut ResamplingContext> {
        let stale = match &self.resampler {
            Some(r) => r.input_rate != rate || r.input_channels != channels,
            None => true,
        };
        if stale {
            if self.resampler.is_some() {
                warn!("Audio input changed to {} Hz / {} channels mid-stream", rate, channels);
            }
            let context = ResamplingContext::get(
                Sample::F32(SampleType::Packed),
                ChannelLayout::default(channels as i32),
                rate,
                Sample::F32(SampleType::Packed),
                self.layout,
                self.rate,
            )?;
            self.resampler = Some(Resampler {
                context,
                input_rate: rate,
                input_channels: channels,
            });
        }
        match self.resampler.as_mut() {
            Some(r) => Ok(&mut r.context),
            None => Err(encode_error("audio resampler unavailable").into()),
        }
    }

    fn push(&mut self, frame: &AudioFrame) -> Result<()> {
        let buffer = frame.content();
        let count = buffer.sample_frames();
        if count == 0 {
            return Ok(());
        }
        let channels = buffer.channels as usize;

        let mut input = AudioFrameBuffer::new(
            Sample::F32(SampleType::Packed),
            count,
            ChannelLayout::default(buffer.channels as i32),
        );
        input.set_rate(buffer.sample_rate);
        fill_samples(&mut input, &buffer.samples[..count * channels], channels)?;

        let capacity = count * self.rate as usize / buffer.sample_rate.max(1) as usize + 256;
        let (layout, out_channels) = (self.layout, self.channels);
        let resampler = self.resampler_for(buffer.sample_rate, buffer.channels)?;
        let mut output = AudioFrameBuffer::new(Sample::F32(SampleType::Packed), capacity, layout);
        resampler.run(&input, &mut output)?;
        let samples = packed_samples(&output, out_channels);
        self.fifo.extend(samples);
        Ok(())
    }

    fn flush_resampler(&mut self) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        loop {
            let mut output = AudioFrameBuffer::new(Sample::F32(SampleType::Packed), 4096, self.layout);
            resampler.context.flush(&mut output)?;
            if output.samples() == 0 {
                return Ok(());
            }
            self.fifo.extend(packed_samples(&output, self.channels));
        }
    }

    /// Encode whole encoder frames; with `pad`, the remainder too
    fn encode_ready(&mut self, output: &mut Output, pad: bool) -> Result<()> {
        let chunk = self.frame_size * self.channels;
        if pad && !self.fifo.is_empty() && self.fifo.len() % chunk != 0 {
            let padded = self.fifo.len().div_ceil(chunk) * chunk;
            self.fifo.resize(padded, 0.0);
        }

        let time_base = Rational(1, self.rate as i32);
        let mut consumed = 0;
        while self.fifo.len() - consumed >= chunk {
            let mut frame = AudioFrameBuffer::new(self.encoder.format(), self.frame_size, self.layout);
            frame.set_rate(self.rate);
            fill_samples(&mut frame, &self.fifo[consumed..consumed + chunk], self.channels)?;
            frame.set_pts(Some(self.next_pts));
            self.next_pts += self.frame_size as i64;
            consumed += chunk;

            self.encoder.send_frame(&frame)?;
            drain(&mut self.encoder, output, self.stream_index, time_base, self.stream_time_base)?;
        }
        self.fifo.drain(..consumed);
        Ok(())
    }
}

/// Open native encoder state
struct EncodeState {
    output: Output,
    video: VideoStream,
    audio: Option<AudioStream>,
}

/// Video writer for any container FFmpeg can mux (mp4, webm, mov, mkv, ...)
pub struct NativeWriter {
    options: WriterOptions,
    state: Option<EncodeState>,
    frames_written: usize,
    audio_dropped: usize,
    closed: bool,
}

impl NativeWriter {
    pub fn new(options: WriterOptions) -> Result<Self> {
        ffmpeg::init()?;
        Ok(Self {
            options,
            state: None,
            frames_written: 0,
            audio_dropped: 0,
            closed: false,
        })
    }

    fn initialize(&mut self, first: &ImageFrame) -> Result<EncodeState> {
        let (source_width, source_height) = first.content().dimensions();
        let (width, height) = even_dimensions(source_width, source_height);
        let frame_rate = 1_000_000.0 / first.duration() as f64;
        let plan = CodecPlan::for_container(&self.options.format);

        let mut output = ffmpeg::format::output(&self.options.path)?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let with_audio = if self.options.with_audio && frame_rate > self.options.video.max_audio_frame_rate {
            warn!(
                "Dropping audio: frame rate {:.1} fps exceeds {:.1} fps",
                frame_rate, self.options.video.max_audio_frame_rate
            );
            false
        } else {
            self.options.with_audio
        };
        let mut options = self.options.clone();
        options.with_audio = with_audio;
        let budget = BitrateBudget::new(width, height, frame_rate, &options);

        // Video stream
        let codec = ffmpeg::encoder::find_by_name(plan.video.encoder_name())
            .ok_or_else(|| encode_error(format!("encoder {} not available", plan.video.encoder_name())))?;
        let mut encoder = CodecContext::new_with_codec(codec).encoder().video()?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_frame_rate(Some(Rational(1_000_000, first.duration().min(i32::MAX as u64) as i32)));
        encoder.set_time_base(MICROS);
        encoder.set_gop(keyframe_interval(frame_rate, self.options.video.keyframe_interval_secs));
        encoder.set_bit_rate(budget.video_bitrate as usize);
        if global_header {
            encoder.set_flags(CodecFlags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        for (key, value) in plan.video.encoder_options() {
            opts.set(key, value);
        }
        let encoder = encoder.open_with(opts)?;
        let video_index = {
            let mut stream = output.add_stream(codec)?;
            stream.set_parameters(&encoder);
            stream.set_time_base(MICROS);
            stream.index()
        };
        let scaler = ScalingContext::get(
            Pixel::RGBA,
            source_width,
            source_height,
            Pixel::YUV420P,
            width,
            height,
            ScalingFlags::BILINEAR,
        )?;

        // Audio stream
        let audio = if with_audio {
            let codec = ffmpeg::encoder::find_by_name(plan.audio.encoder_name())
                .ok_or_else(|| encode_error(format!("encoder {} not available", plan.audio.encoder_name())))?;
            let format = codec
                .audio()
                .ok()
                .and_then(|audio| audio.formats())
                .and_then(|mut formats| formats.next())
                .unwrap_or(Sample::F32(SampleType::Planar));
            let rate = plan.audio_sample_rate(self.options.audio_sample_rate);
            let layout = ChannelLayout::default(self.options.audio_channels as i32);

            let mut encoder = CodecContext::new_with_codec(codec).encoder().audio()?;
            encoder.set_rate(rate as i32);
            encoder.set_channel_layout(layout);
            encoder.set_format(format);
            encoder.set_bit_rate(budget.audio_bitrate.max(1) as usize);
            encoder.set_time_base(Rational(1, rate as i32));
            if global_header {
                encoder.set_flags(CodecFlags::GLOBAL_HEADER);
            }
            let encoder = encoder.open_with(Dictionary::new())?;
            let frame_size = match encoder.frame_size() {
                0 => DEFAULT_AUDIO_FRAME_SIZE,
                n => n as usize,
            };

            let index = {
                let mut stream = output.add_stream(codec)?;
                stream.set_parameters(&encoder);
                stream.set_time_base(Rational(1, rate as i32));
                stream.index()
            };
            Some(AudioStream {
                encoder,
                resampler: None,
                fifo: Vec::new(),
                frame_size,
                channels: self.options.audio_channels.max(1) as usize,
                layout,
                rate,
                next_pts: 0,
                stream_index: index,
                stream_time_base: Rational(1, rate as i32),
            })
        } else {
            None
        };

        output.write_header()?;

        let stream_time_base = |output: &Output, index: usize| {
            output
                .stream(index)
                .map(|stream| stream.time_base())
                .ok_or_else(|| encode_error("output stream vanished after header"))
        };
        let video_time_base = stream_time_base(&output, video_index)?;
        let audio = match audio {
            Some(mut audio) => {
                audio.stream_time_base = stream_time_base(&output, audio.stream_index)?;
                Some(audio)
            }
            None => None,
        };

        info!(
            "Video writer initialized: {} ({} {}x{} @ {:.2} fps, {} bps{})",
            self.options.describe(),
            plan.video.encoder_name(),
            width,
            height,
            frame_rate,
            budget.video_bitrate,
            if audio.is_some() {
                format!(", {} {} bps", plan.audio.encoder_name(), budget.audio_bitrate)
            } else {
                String::new()
            }
        );

        Ok(EncodeState {
            output,
            video: VideoStream {
                encoder,
                scaler,
                width: source_width,
                height: source_height,
                stream_index: video_index,
                stream_time_base: video_time_base,
            },
            audio,
        })
    }

    fn closed_error(&self) -> MediaError {
        MediaError::WriterClosed {
            path: self.options.describe(),
        }
    }

    fn finish(state: &mut EncodeState) -> Result<()> {
        let EncodeState { output, video, audio } = state;

        video.encoder.send_eof()?;
        drain(&mut video.encoder, output, video.stream_index, MICROS, video.stream_time_base)?;

        if let Some(audio) = audio.as_mut() {
            audio.flush_resampler()?;
            audio.encode_ready(output, true)?;
            audio.encoder.send_eof()?;
            let time_base = Rational(1, audio.rate as i32);
            drain(&mut audio.encoder, output, audio.stream_index, time_base, audio.stream_time_base)?;
        }

        output.write_trailer()?;
        Ok(())
    }
}

impl MediaWriter for NativeWriter {
    fn write_image(&mut self, frame: ImageFrame) -> Result<()> {
        if self.closed {
            return Err(self.closed_error().into());
        }
        if self.state.is_none() {
            let state = self.initialize(&frame)?;
            self.state = Some(state);
        }
        let Some(state) = self.state.as_mut() else {
            return Err(self.closed_error().into());
        };
        let video = &mut state.video;

        let timestamp = frame.timestamp();
        let mut image = frame.into_content();
        if image.dimensions() != (video.width, video.height) {
            warn!(
                "Resizing {}x{} frame to {}x{}",
                image.width(),
                image.height(),
                video.width,
                video.height
            );
            image = imageops::resize(&image, video.width, video.height, imageops::FilterType::Triangle);
        }

        let rgba = rgba_frame(&image);
        let mut yuv = VideoFrameBuffer::empty();
        video.scaler.run(&rgba, &mut yuv)?;
        yuv.set_pts(Some(timestamp as i64));

        video.encoder.send_frame(&yuv)?;
        drain(
            &mut video.encoder,
            &mut state.output,
            video.stream_index,
            MICROS,
            video.stream_time_base,
        )?;
        self.frames_written += 1;
        Ok(())
    }

    fn write_audio(&mut self, frame: AudioFrame) -> Result<()> {
        if self.closed {
            return Err(self.closed_error().into());
        }
        let Some(state) = self.state.as_mut() else {
            panic!("audio frame written to {} before the first image frame", self.options.describe());
        };
        let Some(audio) = state.audio.as_mut() else {
            self.audio_dropped += 1;
            return Ok(());
        };

        audio.push(&frame)?;
        audio.encode_ready(&mut state.output, false)
    }

    fn supports_audio(&self) -> bool {
        self.options.with_audio
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let Some(mut state) = self.state.take() else {
            warn!("Video writer for {} closed without frames", self.options.describe());
            return Ok(());
        };
        Self::finish(&mut state)?;

        if self.audio_dropped > 0 {
            debug!("{} audio frames dropped", self.audio_dropped);
        }
        info!(
            "Video written: {} ({} frames)",
            self.options.describe(),
            self.frames_written
        );
        Ok(())
    }
}

impl Drop for NativeWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Copy an RGBA image into an FFmpeg frame, honouring its line stride
fn rgba_frame(image: &RgbaImage) -> VideoFrameBuffer {
    let (width, height) = image.dimensions();
    let mut frame = VideoFrameBuffer::new(Pixel::RGBA, width, height);
    let stride = frame.stride(0);
    let row = width as usize * 4;
    let data = frame.data_mut(0);
    for (y, source) in image.as_raw().chunks_exact(row).enumerate() {
        data[y * stride..y * stride + row].copy_from_slice(source);
    }
    frame
}
