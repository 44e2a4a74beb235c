use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{ProcessingError, Result},
    media::{MediaInfo, MediaSource},
    processor::{DualImageProcessor, ImageProcessor, Prepared, PreparedDual},
    reader::{has_constant_cadence, BoxedReader, MediaReader, ReaderExt},
    registry::FormatRegistry,
    sync::DualReader,
    writer::{BoxedWriter, MediaWriter, WriterOptions},
};

/// Per-invocation options on top of the configuration defaults
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// Output format; defaults to the source's
    pub format: Option<String>,

    /// Play the (content) source backwards
    pub reverse: bool,

    /// Playback speed multiplier, combined with the processor's own
    pub speed: f64,

    /// Duration ceiling in microseconds (overrides the configuration)
    pub max_duration: Option<u64>,

    /// Size ceiling in bytes (overrides the configuration)
    pub max_file_size: Option<u64>,

    /// Animation repeat count (overrides the configuration)
    pub loop_count: Option<u16>,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            format: None,
            reverse: false,
            speed: 1.0,
            max_duration: None,
            max_file_size: None,
            loop_count: None,
        }
    }
}

/// What a transcode produced
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeReport {
    pub path: PathBuf,
    pub format: String,
    pub frames_written: usize,
    /// Output duration in microseconds
    pub duration: u64,
}

/// Drives read → transform → write for one or two sources
///
/// The pipeline follows a fixed sequence:
/// 1. Open - resolve readers through the registry, apply reverse and duration cap
/// 2. Plan - pick the output format and open the writer
/// 3. Frames - compute constant data once, transform and write every frame
/// 4. Audio - copy audio (speed-adjusted) when the writer takes it
/// 5. Teardown - close writer, processor and readers on every path
pub struct Pipeline<'a> {
    registry: &'a FormatRegistry,
    config: &'a Config,
    options: TranscodeOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a FormatRegistry, config: &'a Config) -> Self {
        Self {
            registry,
            config,
            options: TranscodeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TranscodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Transcode one source into `<target stem>.<format>`
    ///
    /// The processor is closed on every path, including failures to open the
    /// source or the writer.
    pub fn transcode<P: ImageProcessor>(
        &self,
        source: &MediaSource,
        target: &Path,
        processor: &mut P,
    ) -> Result<TranscodeReport> {
        info!("🎬 Transcoding {}", source.describe());
        let mut prepared = Prepared::new(processor);
        let result = self.transcode_prepared(source, target, &mut prepared);
        let closed = prepared.close();
        let report = result?;
        closed?;

        info!(
            "🎉 Wrote {} ({} frames, {} us)",
            report.path.display(),
            report.frames_written,
            report.duration
        );
        Ok(report)
    }

    fn transcode_prepared<P: ImageProcessor>(
        &self,
        source: &MediaSource,
        target: &Path,
        prepared: &mut Prepared<'_, P>,
    ) -> Result<TranscodeReport> {
        let speed = self.validated_speed(prepared.speed())?;

        // Step 1: open
        let mut reader = self.open_source(source)?;
        let info = reader.info().clone();
        log_info("Source", &info);

        // Step 2: plan
        let requested = self.options.format.clone().unwrap_or_else(|| info.format.clone());
        let format = self.resolve_writable(&requested, info.is_animated());
        let result = self
            .open_writer(target, &format, &info, speed)
            .and_then(|writer| self.run_single(&mut reader, writer, prepared, speed));

        // Step 5: teardown
        let closed = reader.close();
        let (frames_written, duration) = result?;
        closed?;

        Ok(self.report(target, format, frames_written, duration))
    }

    /// Compose `content` onto `template`, frame by frame
    ///
    /// Irregularly timed animations are resampled onto their nominal cadence
    /// first so the two streams can be zipped.
    pub fn transcode_dual<P: DualImageProcessor>(
        &self,
        content: &MediaSource,
        template: &MediaSource,
        target: &Path,
        processor: &mut P,
    ) -> Result<TranscodeReport> {
        info!("🎬 Composing {} onto {}", content.describe(), template.describe());
        let mut prepared = PreparedDual::new(processor);
        let result = self.transcode_dual_prepared(content, template, target, &mut prepared);
        let closed = prepared.close();
        let report = result?;
        closed?;

        info!(
            "🎉 Wrote {} ({} frames, {} us)",
            report.path.display(),
            report.frames_written,
            report.duration
        );
        Ok(report)
    }

    fn transcode_dual_prepared<P: DualImageProcessor>(
        &self,
        content: &MediaSource,
        template: &MediaSource,
        target: &Path,
        prepared: &mut PreparedDual<'_, P>,
    ) -> Result<TranscodeReport> {
        let speed = self.validated_speed(prepared.speed())?;

        let content_reader = normalize_cadence(self.open_source(content)?)?;
        let template_reader = normalize_cadence(self.registry.open_reader(template)?)?;
        let mut dual = DualReader::new(content_reader, template_reader)?;
        log_info("Content", dual.first_info());
        log_info("Template", dual.second_info());

        let format = match &self.options.format {
            Some(format) => format.to_lowercase(),
            None => resolve_dual_format(dual.first_info(), dual.second_info()),
        };
        let format = self.resolve_writable(&format, dual.info().is_animated());
        let info = dual.info().clone();
        let result = self
            .open_writer(target, &format, &info, speed)
            .and_then(|writer| self.run_dual(&mut dual, writer, prepared, speed));

        let closed = dual.close();
        let (frames_written, duration) = result?;
        closed?;

        Ok(self.report(target, format, frames_written, duration))
    }

    // ==========================================
    // STEP 1: OPEN
    // ==========================================

    fn open_source(&self, source: &MediaSource) -> Result<BoxedReader> {
        let mut reader = self.registry.open_reader(source)?;
        if self.options.reverse {
            debug!("Reversing {}", source.describe());
            reader = reader.reversed()?;
        }

        let max = self.max_duration();
        if max > 0 && reader.info().duration > max {
            debug!("Capping {} us source at {} us", reader.info().duration, max);
            reader = reader.limited(max)?;
        }
        Ok(reader)
    }

    // ==========================================
    // STEP 2: PLAN
    // ==========================================

    fn max_duration(&self) -> u64 {
        self.options
            .max_duration
            .unwrap_or(self.config.output.max_duration)
    }

    fn validated_speed(&self, processor_speed: f64) -> Result<f64> {
        let speed = self.options.speed * processor_speed;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ProcessingError::InvalidParameters {
                details: format!("speed must be positive, got {}", speed),
            }
            .into());
        }
        Ok(speed)
    }

    /// Keep `format` if something can write it, else pick gif or png
    fn resolve_writable(&self, format: &str, animated: bool) -> String {
        let format = format.to_lowercase();
        if self.registry.has_writer(&format) || self.options.format.is_some() {
            return format;
        }
        let substitute = if animated { "gif" } else { "png" };
        warn!("No writer for {}, writing {} instead", format, substitute);
        substitute.to_string()
    }

    fn writer_options(&self, target: &Path, format: &str, info: &MediaInfo, speed: f64) -> WriterOptions {
        let mut options = WriterOptions::from_config(output_path(target, format), format, self.config);
        if let Some(loop_count) = self.options.loop_count {
            options.loop_count = loop_count;
        }
        if let Some(max_file_size) = self.options.max_file_size {
            options.max_file_size = max_file_size;
        }
        options.max_duration = self.max_duration();
        options.expected_duration = (info.duration as f64 / speed).round() as u64;
        options.with_audio = info.has_audio();
        options
    }

    fn open_writer(&self, target: &Path, format: &str, info: &MediaInfo, speed: f64) -> Result<BoxedWriter> {
        let options = self.writer_options(target, format, info, speed);
        debug!("Opening {} writer for {}", format, options.describe());
        self.registry.open_writer(options)
    }

    // ==========================================
    // STEP 3 + 4: FRAMES AND AUDIO
    // ==========================================

    fn run_single<P: ImageProcessor>(
        &self,
        reader: &mut BoxedReader,
        mut writer: BoxedWriter,
        prepared: &mut Prepared<'_, P>,
        speed: f64,
    ) -> Result<(usize, u64)> {
        let mut frames_written = 0;
        let mut duration = 0;

        for frame in reader.frames()? {
            let frame = frame?;
            let image = prepared.apply(&frame)?;
            let output = frame.with_content(image).with_speed(speed);
            duration = output.end();
            writer.write_image(output)?;
            frames_written += 1;
        }

        if writer.supports_audio() {
            let mut audio_frames = 0;
            for frame in reader.audio_frames()? {
                writer.write_audio(frame?.with_audio_speed(speed))?;
                audio_frames += 1;
            }
            debug!("Copied {} audio frames", audio_frames);
        }

        writer.close()?;
        Ok((frames_written, duration))
    }

    fn run_dual<P: DualImageProcessor>(
        &self,
        dual: &mut DualReader,
        mut writer: BoxedWriter,
        prepared: &mut PreparedDual<'_, P>,
        speed: f64,
    ) -> Result<(usize, u64)> {
        let mut frames_written = 0;
        let mut duration = 0;

        dual.for_each_pair(|pair| {
            let image = prepared.apply(&pair.first, &pair.second)?;
            let output = pair.first.with_content(image).with_speed(speed);
            duration = output.end();
            frames_written += 1;
            writer.write_image(output)
        })?;

        if writer.supports_audio() {
            for frame in dual.audio_frames()? {
                writer.write_audio(frame?.with_audio_speed(speed))?;
            }
        }

        writer.close()?;
        Ok((frames_written, duration))
    }

    fn report(&self, target: &Path, format: String, frames_written: usize, duration: u64) -> TranscodeReport {
        TranscodeReport {
            path: output_path(target, &format),
            format,
            frames_written,
            duration,
        }
    }
}

/// `<target stem>.<format>`
pub fn output_path(target: &Path, format: &str) -> PathBuf {
    target.with_extension(format)
}

/// Format of a composition when no format was requested
///
/// If exactly one side is animated its format wins; otherwise the content's.
pub fn resolve_dual_format(content: &MediaInfo, template: &MediaInfo) -> String {
    match (content.is_animated(), template.is_animated()) {
        (false, true) => template.format.clone(),
        _ => content.format.clone(),
    }
}

/// Resample irregularly timed animations onto their nominal cadence
fn normalize_cadence(mut reader: BoxedReader) -> Result<BoxedReader> {
    if !reader.info().is_animated() {
        return Ok(reader);
    }
    let times = reader.frame_times()?;
    if has_constant_cadence(&times) {
        return Ok(reader);
    }
    let frame_duration = reader.info().frame_duration;
    debug!("Resampling irregular {} onto {} us cadence", reader.info().format, frame_duration);
    reader.with_cadence(frame_duration)
}

fn log_info(label: &str, info: &MediaInfo) {
    info!(
        "   {}: {} {}x{}, {} frames, {} us{}",
        label,
        info.format,
        info.width,
        info.height,
        info.frame_count,
        info.duration,
        if info.has_audio() { ", with audio" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Fit, Identity, Overlay};
    use crate::reader::{FrameListReader, StillReader};
    use image::codecs::gif::GifEncoder;
    use image::{Delay, ImageFormat, Rgba, RgbaImage};
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::tempdir;

    fn write_gif(path: &Path, colors: &[[u8; 4]], delay_ms: u32, size: u32) {
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for color in colors {
            let image = RgbaImage::from_pixel(size, size, Rgba(*color));
            let frame = image::Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }

    fn write_png(path: &Path, size: u32) {
        RgbaImage::from_pixel(size, size, Rgba([0, 0, 255, 255]))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    /// Counts transform calls and passes the content through
    struct Counting {
        calls: Rc<Cell<usize>>,
    }

    impl DualImageProcessor for Counting {
        type Constant = ();

        fn constant_data(&self, _: &crate::media::ImageFrame, _: &crate::media::ImageFrame) -> Result<()> {
            Ok(())
        }

        fn transform(
            &self,
            content: &crate::media::ImageFrame,
            _: &crate::media::ImageFrame,
            _: &(),
        ) -> Result<RgbaImage> {
            self.calls.set(self.calls.get() + 1);
            Ok(content.content().clone())
        }
    }

    /// Passes frames through and counts `close` calls
    struct Tracked {
        closes: Rc<Cell<usize>>,
    }

    impl Tracked {
        fn new() -> (Self, Rc<Cell<usize>>) {
            let closes = Rc::new(Cell::new(0));
            (Self { closes: closes.clone() }, closes)
        }
    }

    impl ImageProcessor for Tracked {
        type Constant = ();

        fn constant_data(&self, _: &crate::media::ImageFrame) -> Result<()> {
            Ok(())
        }

        fn transform(&self, frame: &crate::media::ImageFrame, _: &()) -> Result<RgbaImage> {
            Ok(frame.content().clone())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    impl DualImageProcessor for Tracked {
        type Constant = ();

        fn constant_data(&self, _: &crate::media::ImageFrame, _: &crate::media::ImageFrame) -> Result<()> {
            Ok(())
        }

        fn transform(
            &self,
            content: &crate::media::ImageFrame,
            _: &crate::media::ImageFrame,
            _: &(),
        ) -> Result<RgbaImage> {
            Ok(content.content().clone())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    const COLORS: [[u8; 4]; 5] = [
        [255, 0, 0, 255],
        [0, 255, 0, 255],
        [0, 0, 255, 255],
        [255, 255, 0, 255],
        [0, 255, 255, 255],
    ];

    #[test]
    fn test_identity_gif_keeps_frames_and_timing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.gif");
        write_gif(&input, &COLORS[..3], 20, 100);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let report = Pipeline::new(&registry, &config)
            .transcode(&MediaSource::file(&input), &dir.path().join("out"), &mut Identity)
            .unwrap();

        assert_eq!(report.format, "gif");
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.duration, 60_000);
        assert_eq!(report.path, dir.path().join("out.gif"));

        let output = FrameListReader::open(&MediaSource::file(&report.path)).unwrap();
        assert_eq!(output.info().frame_count, 3);
        assert_eq!(output.info().duration, 60_000);
    }

    #[test]
    fn test_static_png_stays_static() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.png");
        write_png(&input, 10);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let report = Pipeline::new(&registry, &config)
            .transcode(&MediaSource::file(&input), &dir.path().join("out"), &mut Fit::new(5, 5))
            .unwrap();

        assert_eq!(report.frames_written, 1);
        let reader = StillReader::open(&MediaSource::file(&report.path)).unwrap();
        assert_eq!(reader.info().frame_count, 1);
        assert!(!reader.info().is_animated());
        assert_eq!(reader.info().width, 5);
    }

    #[test]
    fn test_dual_uses_animated_format_and_content_cadence() {
        let dir = tempdir().unwrap();
        let content = dir.path().join("content.gif");
        let template = dir.path().join("template.png");
        write_gif(&content, &COLORS, 40, 16);
        write_png(&template, 32);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let calls = Rc::new(Cell::new(0));
        let mut processor = Counting { calls: calls.clone() };

        let report = Pipeline::new(&registry, &config)
            .transcode_dual(
                &MediaSource::file(&content),
                &MediaSource::file(&template),
                &dir.path().join("out"),
                &mut processor,
            )
            .unwrap();

        assert_eq!(calls.get(), 5);
        assert_eq!(report.format, "gif");
        assert_eq!(report.frames_written, 5);
        assert_eq!(report.duration, 200_000);
    }

    #[test]
    fn test_overlay_takes_template_size() {
        let dir = tempdir().unwrap();
        let content = dir.path().join("content.gif");
        let template = dir.path().join("template.png");
        write_gif(&content, &COLORS[..2], 50, 8);
        write_png(&template, 24);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let report = Pipeline::new(&registry, &config)
            .transcode_dual(
                &MediaSource::file(&content),
                &MediaSource::file(&template),
                &dir.path().join("composed"),
                &mut Overlay,
            )
            .unwrap();

        let output = FrameListReader::open(&MediaSource::file(&report.path)).unwrap();
        assert_eq!((output.info().width, output.info().height), (24, 24));
        assert_eq!(output.info().frame_count, 2);
    }

    #[test]
    fn test_speed_reverse_and_cap() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.gif");
        write_gif(&input, &COLORS, 100, 8);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let options = TranscodeOptions {
            reverse: true,
            speed: 2.0,
            max_duration: Some(300_000),
            ..TranscodeOptions::default()
        };
        let report = Pipeline::new(&registry, &config)
            .with_options(options)
            .transcode(&MediaSource::file(&input), &dir.path().join("fast"), &mut Identity)
            .unwrap();

        // three 100 ms frames survive the cap, then play at double speed
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.duration, 150_000);

        let mut output = FrameListReader::open(&MediaSource::file(&report.path)).unwrap();
        // reversed: the last input colour comes first
        let first = output.first().unwrap();
        assert_eq!(first.content().get_pixel(0, 0).0, COLORS[4]);
    }

    #[test]
    fn test_explicit_format_and_rejected_speed() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.gif");
        write_gif(&input, &COLORS[..2], 20, 8);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let options = TranscodeOptions {
            format: Some("PNG".to_string()),
            ..TranscodeOptions::default()
        };
        let report = Pipeline::new(&registry, &config)
            .with_options(options)
            .transcode(&MediaSource::file(&input), &dir.path().join("still"), &mut Identity)
            .unwrap();
        assert_eq!(report.path, dir.path().join("still.png"));
        assert!(report.path.exists());

        let options = TranscodeOptions {
            speed: 0.0,
            ..TranscodeOptions::default()
        };
        let result = Pipeline::new(&registry, &config)
            .with_options(options)
            .transcode(&MediaSource::file(&input), &dir.path().join("never"), &mut Identity);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_dual_format() {
        let still = MediaInfo::from_times("png", &crate::media::stack_durations([33_333]), 1, 1);
        let animated = MediaInfo::from_times("gif", &crate::media::stack_durations([10, 10]), 1, 1);

        assert_eq!(resolve_dual_format(&still, &animated), "gif");
        assert_eq!(resolve_dual_format(&animated, &still), "gif");
        assert_eq!(resolve_dual_format(&still, &still), "png");
    }

    #[test]
    fn test_processor_closed_when_source_unreadable() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"definitely not a png").unwrap();
        let template = dir.path().join("template.png");
        write_png(&template, 4);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let pipeline = Pipeline::new(&registry, &config);

        let (mut processor, closes) = Tracked::new();
        let result = pipeline.transcode(&MediaSource::file(&broken), &dir.path().join("out"), &mut processor);
        assert!(result.is_err());
        assert_eq!(closes.get(), 1);

        let (mut processor, closes) = Tracked::new();
        let result = pipeline.transcode_dual(
            &MediaSource::file(&broken),
            &MediaSource::file(&template),
            &dir.path().join("out"),
            &mut processor,
        );
        assert!(result.is_err());
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_processor_closed_when_writer_unavailable() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.png");
        write_png(&input, 4);

        let mut registry = FormatRegistry::with_defaults();
        registry.set_fallback_writer(None);
        let config = Config::default();
        let options = TranscodeOptions {
            format: Some("xyz".to_string()),
            ..TranscodeOptions::default()
        };
        let pipeline = Pipeline::new(&registry, &config).with_options(options);

        let (mut processor, closes) = Tracked::new();
        let result = pipeline.transcode(&MediaSource::file(&input), &dir.path().join("out"), &mut processor);
        assert!(result.is_err());
        assert_eq!(closes.get(), 1);
        assert!(!dir.path().join("out.xyz").exists());
    }

    #[test]
    fn test_processor_closed_once_on_success() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.gif");
        write_gif(&input, &COLORS[..2], 20, 4);

        let registry = FormatRegistry::with_defaults();
        let config = Config::default();
        let (mut processor, closes) = Tracked::new();
        Pipeline::new(&registry, &config)
            .transcode(&MediaSource::file(&input), &dir.path().join("out"), &mut processor)
            .unwrap();
        assert_eq!(closes.get(), 1);
    }
}
