use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reframe::{
    config::Config,
    effects::EffectRegistry,
    media::MediaSource,
    pipeline::{Pipeline, TranscodeOptions},
    processor::{compose_mappers, Fit, Identity, ImageProcessor, Overlay},
    registry::FormatRegistry,
    DualImageProcessor,
};

#[derive(Parser)]
#[command(
    name = "reframe",
    version,
    about = "Transcode images, GIFs and video frame by frame",
    long_about = "reframe decodes a media file into timestamped frames, optionally composites it onto a template, applies effects and re-encodes it under size and duration limits."
)]
struct Cli {
    /// Input file (png, jpg, gif, webp, ... or any video with the ffmpeg feature)
    input: PathBuf,

    /// Output path without extension; the format's extension is appended
    #[arg(short, long)]
    output: PathBuf,

    /// Output format (defaults to the input's)
    #[arg(short, long)]
    format: Option<String>,

    /// Template the input is drawn onto
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Pixel effect to apply; repeatable, applied in order
    #[arg(short, long = "effect")]
    effects: Vec<String>,

    /// Shrink to fit WIDTHxHEIGHT
    #[arg(long)]
    fit: Option<String>,

    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Play backwards
    #[arg(long)]
    reverse: bool,

    /// Maximum output duration in seconds
    #[arg(long)]
    max_duration: Option<f64>,

    /// Maximum output size in bytes (video outputs)
    #[arg(long)]
    max_size: Option<u64>,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available effects and exit
    #[arg(long)]
    list_effects: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let effect_registry = EffectRegistry::new();
    if cli.list_effects {
        for name in effect_registry.available_effects() {
            println!("{}", name);
        }
        return Ok(());
    }

    info!("Starting reframe v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)
                .with_context(|| format!("loading configuration {}", config_path.display()))?
        }
        None => Config::default(),
    };

    let mappers = effect_registry
        .resolve(&cli.effects)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let effect = compose_mappers(mappers);
    let fit = match &cli.fit {
        Some(spec) => Some(Fit::parse(spec).map_err(|e| anyhow::anyhow!(e.user_message()))?),
        None => None,
    };

    let options = TranscodeOptions {
        format: cli.format.clone(),
        reverse: cli.reverse,
        speed: cli.speed,
        max_duration: cli.max_duration.map(|secs| (secs * 1_000_000.0).round() as u64),
        max_file_size: cli.max_size,
        loop_count: None,
    };
    let registry = FormatRegistry::with_defaults();
    let pipeline = Pipeline::new(&registry, &config).with_options(options);
    let input = MediaSource::file(&cli.input);

    let report = match (&cli.template, fit) {
        (Some(template), Some(fit)) => {
            let mut processor = Overlay.and_then(fit).map_pixels(effect);
            pipeline.transcode_dual(&input, &MediaSource::file(template), &cli.output, &mut processor)
        }
        (Some(template), None) => {
            let mut processor = Overlay.map_pixels(effect);
            pipeline.transcode_dual(&input, &MediaSource::file(template), &cli.output, &mut processor)
        }
        (None, Some(fit)) => {
            let mut processor = fit.map_pixels(effect);
            pipeline.transcode(&input, &cli.output, &mut processor)
        }
        (None, None) => {
            let mut processor = Identity.map_pixels(effect);
            pipeline.transcode(&input, &cli.output, &mut processor)
        }
    }
    .map_err(|e| anyhow::anyhow!(e.user_message()))
    .with_context(|| format!("transcoding {}", cli.input.display()))?;

    println!(
        "{} ({}, {} frames, {:.2}s)",
        report.path.display(),
        report.format,
        report.frames_written,
        report.duration as f64 / 1_000_000.0
    );
    Ok(())
}
