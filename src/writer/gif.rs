//! Animated GIF output with temporal optimization.
//!
//! Frames are held back by one step so each can still be adjusted once the
//! next frame is known:
//!
//! - bit-identical frames extend the held frame instead of being written;
//! - nothing shorter than [`MIN_FRAME_DURATION`] is emitted, since browsers
//!   clamp such delays; short frames borrow time from their successor or are
//!   merged into the held frame entirely;
//! - pixels that did not change (within the configured colour tolerance) are
//!   written as transparent and the frame is cropped to the changed area,
//!   so the decoder keeps the previous pixels.
//!
//! A pixel that turns transparent cannot be expressed as a delta. When that
//! happens the held frame is disposed to background and the new frame is
//! drawn in full; full frames continue until an opaque frame arrives.

use std::fs::File;
use std::io::BufWriter;

use ::gif::{DisposalMethod, Encoder, Frame as GifFrame, Repeat};
use image::{imageops, RgbaImage};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::media::ImageFrame;
use crate::writer::{MediaWriter, WriterOptions};

/// Shortest delay browsers honour, in microseconds
pub const MIN_FRAME_DURATION: u64 = 20_000;

/// A frame accepted but not yet written
struct Pending {
    image: RgbaImage,
    left: u16,
    top: u16,
    dispose: DisposalMethod,
    duration: u64,
}

/// How a frame differs from the previous accepted one
enum Delta {
    /// Every pixel within tolerance
    Unchanged,
    /// Changed pixels only, cropped to their bounding box
    Partial { image: RgbaImage, left: u32, top: u32 },
    /// Some visible pixel became transparent
    Regression,
}

fn unchanged(next: &[u8], previous: &[u8], tolerance: u32) -> bool {
    if next[3] == 0 && previous[3] == 0 {
        return true;
    }
    if next[3] != previous[3] {
        return false;
    }
    let distance: u32 = (0..3)
        .map(|c| (next[c] as i32 - previous[c] as i32).unsigned_abs())
        .sum();
    distance <= tolerance
}

fn is_opaque(image: &RgbaImage) -> bool {
    image.as_raw().par_chunks(4).all(|pixel| pixel[3] == 255)
}

fn diff(previous: &RgbaImage, next: &RgbaImage, tolerance: u32) -> Delta {
    let regression = previous
        .as_raw()
        .par_chunks(4)
        .zip(next.as_raw().par_chunks(4))
        .any(|(p, n)| n[3] == 0 && p[3] != 0);
    if regression {
        return Delta::Regression;
    }

    let mut delta = next.clone();
    delta
        .par_chunks_mut(4)
        .zip(previous.as_raw().par_chunks(4))
        .for_each(|(n, p)| {
            if unchanged(n, p, tolerance) {
                n.copy_from_slice(&[0, 0, 0, 0]);
            }
        });

    let (width, height) = delta.dimensions();
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (width, height, 0, 0);
    for (x, y, pixel) in delta.enumerate_pixels() {
        if pixel[3] != 0 {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if min_x > max_x || min_y > max_y {
        return Delta::Unchanged;
    }

    let image = imageops::crop_imm(&delta, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image();
    Delta::Partial {
        image,
        left: min_x,
        top: min_y,
    }
}

/// GIF encoder with duplicate coalescing and transparency deltas
pub struct GifWriter {
    options: WriterOptions,
    encoder: Option<Encoder<BufWriter<File>>>,
    width: u16,
    height: u16,
    previous: Option<RgbaImage>,
    pending: Option<Pending>,
    cannot_optimize: bool,
    /// Emitted time in microseconds and in centiseconds
    elapsed_us: u64,
    elapsed_cs: u64,
    frames_written: usize,
    closed: bool,
}

impl GifWriter {
    pub fn new(options: WriterOptions) -> Self {
        Self {
            options,
            encoder: None,
            width: 0,
            height: 0,
            previous: None,
            pending: None,
            cannot_optimize: false,
            elapsed_us: 0,
            elapsed_cs: 0,
            frames_written: 0,
            closed: false,
        }
    }

    /// Number of GIF frames emitted so far
    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    fn initialize(&mut self, image: &RgbaImage) -> Result<()> {
        let (width, height) = image.dimensions();
        let (Ok(width), Ok(height)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(MediaError::InvalidParameters {
                details: format!("{}x{} exceeds the GIF size limit", width, height),
            }
            .into());
        };

        let file = File::create(&self.options.path)?;
        let mut encoder = Encoder::new(BufWriter::new(file), width, height, &[])?;
        encoder.set_repeat(match self.options.loop_count {
            0 => Repeat::Infinite,
            n => Repeat::Finite(n),
        })?;

        info!(
            "GIF writer initialized: {} ({}x{}, loop {})",
            self.options.describe(),
            width,
            height,
            self.options.loop_count
        );
        self.encoder = Some(encoder);
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn flush(&mut self, pending: Pending) -> Result<()> {
        let encoder = self.encoder.as_mut().ok_or_else(|| MediaError::WriterClosed {
            path: self.options.describe(),
        })?;

        let (width, height) = pending.image.dimensions();
        let mut buffer = pending.image.into_raw();
        // from_rgba_speed panics outside 1..=30
        let speed = self.options.gif.quantize_speed.clamp(1, 30);
        let mut frame = GifFrame::from_rgba_speed(width as u16, height as u16, &mut buffer, speed);

        let end_us = self.elapsed_us + pending.duration;
        let end_cs = (end_us + 5_000) / 10_000;
        frame.delay = (end_cs - self.elapsed_cs).min(u16::MAX as u64) as u16;
        frame.left = pending.left;
        frame.top = pending.top;
        frame.dispose = pending.dispose;

        encoder.write_frame(&frame)?;
        debug!(
            "GIF frame {}: {}x{} at ({}, {}), {} cs, {:?}",
            self.frames_written, width, height, pending.left, pending.top, frame.delay, pending.dispose
        );

        self.elapsed_us = end_us;
        self.elapsed_cs = end_cs;
        self.frames_written += 1;
        Ok(())
    }

    fn full_frame(image: &RgbaImage, duration: u64) -> Pending {
        Pending {
            image: image.clone(),
            left: 0,
            top: 0,
            dispose: DisposalMethod::Keep,
            duration,
        }
    }
}

impl MediaWriter for GifWriter {
    fn write_image(&mut self, frame: ImageFrame) -> Result<()> {
        if self.closed {
            return Err(MediaError::WriterClosed {
                path: self.options.describe(),
            }
            .into());
        }

        let duration = frame.duration();
        let mut image = frame.into_content();
        if self.encoder.is_none() {
            self.initialize(&image)?;
        }
        if image.dimensions() != (self.width as u32, self.height as u32) {
            warn!(
                "Resizing {}x{} frame to {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            );
            image = imageops::resize(
                &image,
                self.width as u32,
                self.height as u32,
                imageops::FilterType::Triangle,
            );
        }

        let (Some(previous), Some(mut pending)) = (self.previous.take(), self.pending.take()) else {
            self.pending = Some(Self::full_frame(&image, duration));
            self.previous = Some(image);
            return Ok(());
        };

        // Duplicate coalescing
        let delta = if previous == image {
            Delta::Unchanged
        } else if self.cannot_optimize {
            Delta::Regression
        } else {
            diff(&previous, &image, self.options.gif.color_tolerance)
        };
        if let Delta::Unchanged = delta {
            pending.duration += duration;
            debug!("Merged unchanged frame, held frame now {} us", pending.duration);
            self.pending = Some(pending);
            self.previous = Some(previous);
            return Ok(());
        }

        // Minimum frame duration
        let carried = if pending.duration >= MIN_FRAME_DURATION {
            duration
        } else {
            let needed = MIN_FRAME_DURATION - pending.duration;
            if duration <= needed {
                pending.duration += duration;
                debug!("Merged {} us frame into short held frame", duration);
                self.pending = Some(pending);
                self.previous = Some(previous);
                return Ok(());
            }
            pending.duration = MIN_FRAME_DURATION;
            duration - needed
        };

        // Transparency delta
        let next = match delta {
            Delta::Partial { image: cropped, left, top } => Pending {
                image: cropped,
                left: left as u16,
                top: top as u16,
                dispose: DisposalMethod::Keep,
                duration: carried,
            },
            _ => {
                let opaque = is_opaque(&image);
                if !opaque {
                    // Clear the whole canvas before drawing a frame with holes
                    pending = Pending {
                        dispose: DisposalMethod::Background,
                        ..Self::full_frame(&previous, pending.duration)
                    };
                }
                if self.cannot_optimize != !opaque {
                    debug!("Frame delta optimization {}", if opaque { "resumed" } else { "suspended" });
                }
                self.cannot_optimize = !opaque;
                Self::full_frame(&image, carried)
            }
        };

        self.flush(pending)?;
        self.pending = Some(next);
        self.previous = Some(image);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(mut pending) = self.pending.take() {
            pending.duration = pending.duration.max(MIN_FRAME_DURATION);
            self.flush(pending)?;
        }

        match self.encoder.take() {
            // Dropping the encoder writes the trailer
            Some(encoder) => drop(encoder),
            None => warn!("GIF writer for {} closed without frames", self.options.describe()),
        }

        info!(
            "GIF written: {} ({} frames, {} us)",
            self.options.describe(),
            self.frames_written,
            self.elapsed_us
        );
        Ok(())
    }
}

impl Drop for GifWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
