use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::media::ImageFrame;
use crate::processor::{DualImageProcessor, ImageProcessor};

/// Passes frames through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl ImageProcessor for Identity {
    type Constant = ();

    fn constant_data(&self, _first: &ImageFrame) -> Result<()> {
        Ok(())
    }

    fn transform(&self, frame: &ImageFrame, _constant: &()) -> Result<RgbaImage> {
        Ok(frame.content().clone())
    }
}

/// Largest size with the aspect ratio of `width`x`height` inside the box
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let fitted_width = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let fitted_height = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (fitted_width, fitted_height)
}

/// Downscales frames to fit inside a bounding box, keeping aspect ratio
///
/// Frames already inside the box are left at their size.
#[derive(Debug, Clone, Copy)]
pub struct Fit {
    max_width: u32,
    max_height: u32,
}

impl Fit {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
        }
    }

    /// Parse a `WIDTHxHEIGHT` box such as `480x270`
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || ProcessingError::InvalidParameters {
            details: format!("expected WIDTHxHEIGHT, got '{}'", spec),
        };
        let (width, height) = spec
            .to_lowercase()
            .split_once('x')
            .map(|(w, h)| (w.trim().parse::<u32>(), h.trim().parse::<u32>()))
            .ok_or_else(invalid)?;

        match (width, height) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok(Self::new(w, h)),
            _ => Err(invalid().into()),
        }
    }
}

impl ImageProcessor for Fit {
    /// Output dimensions
    type Constant = (u32, u32);

    fn constant_data(&self, first: &ImageFrame) -> Result<(u32, u32)> {
        let (width, height) = first.content().dimensions();
        let target = if width <= self.max_width && height <= self.max_height {
            (width, height)
        } else {
            fit_within(width, height, self.max_width, self.max_height)
        };
        debug!("Fit {}x{} -> {}x{}", width, height, target.0, target.1);
        Ok(target)
    }

    fn transform(&self, frame: &ImageFrame, target: &(u32, u32)) -> Result<RgbaImage> {
        let image = frame.content();
        if image.dimensions() == *target {
            return Ok(image.clone());
        }
        Ok(imageops::resize(image, target.0, target.1, FilterType::Triangle))
    }
}

/// Where the content lands on the template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Draws the first stream (content) centred on the second (template)
///
/// The content is scaled to fit the template while keeping its aspect
/// ratio. The output has the template's size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overlay;

impl DualImageProcessor for Overlay {
    type Constant = Placement;

    fn constant_data(&self, content: &ImageFrame, template: &ImageFrame) -> Result<Placement> {
        let (template_width, template_height) = template.content().dimensions();
        let (content_width, content_height) = content.content().dimensions();
        let (width, height) = fit_within(content_width, content_height, template_width, template_height);

        let placement = Placement {
            x: template_width.saturating_sub(width) / 2,
            y: template_height.saturating_sub(height) / 2,
            width,
            height,
        };
        debug!("Overlay placement: {:?}", placement);
        Ok(placement)
    }

    fn transform(
        &self,
        content: &ImageFrame,
        template: &ImageFrame,
        placement: &Placement,
    ) -> Result<RgbaImage> {
        let mut canvas = template.content().clone();
        let image = content.content();
        if image.dimensions() == (placement.width, placement.height) {
            imageops::overlay(&mut canvas, image, placement.x as i64, placement.y as i64);
        } else {
            let scaled = imageops::resize(image, placement.width, placement.height, FilterType::Triangle);
            imageops::overlay(&mut canvas, &scaled, placement.x as i64, placement.y as i64);
        }
        Ok(canvas)
    }
}
