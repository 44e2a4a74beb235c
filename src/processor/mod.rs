//! # Image Processors
//!
//! Per-frame transforms with a one-time "constant data" stage.
//!
//! Work that only depends on the first frame (target geometry, placement,
//! lookup tables) goes into [`ImageProcessor::constant_data`]; it runs once
//! per transcode and its result is handed to every
//! [`ImageProcessor::transform`] call. Processors compose:
//!
//! ```rust
//! use reframe::effects;
//! use reframe::processor::{Fit, Identity, ImageProcessor};
//!
//! let processor = Identity
//!     .and_then(Fit::new(320, 240))
//!     .map_pixels(effects::grayscale)
//!     .with_speed(2.0);
//! assert_eq!(processor.speed(), 2.0);
//! ```

pub mod builtin;

pub use builtin::{Fit, Identity, Overlay, Placement};

use image::RgbaImage;

use crate::error::Result;
use crate::media::ImageFrame;

/// Transform applied to every frame of a single stream
pub trait ImageProcessor {
    /// Data computed once from the first frame
    type Constant;

    /// Compute the constant data from the first frame
    fn constant_data(&self, first: &ImageFrame) -> Result<Self::Constant>;

    /// Produce the output image for one frame
    fn transform(&self, frame: &ImageFrame, constant: &Self::Constant) -> Result<RgbaImage>;

    /// Playback speed multiplier applied to output timing
    fn speed(&self) -> f64 {
        1.0
    }

    /// Release anything held by the processor
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run `next` on the output of this processor
    fn and_then<B>(self, next: B) -> Chain<Self, B>
    where
        Self: Sized,
        B: ImageProcessor,
    {
        Chain { first: self, second: next }
    }

    /// Append a stateless pixel mapper
    fn map_pixels<F>(self, mapper: F) -> Mapped<Self, F>
    where
        Self: Sized,
        F: Fn(RgbaImage) -> RgbaImage,
    {
        Mapped { inner: self, mapper }
    }

    /// Override the speed multiplier
    fn with_speed(self, speed: f64) -> Speed<Self>
    where
        Self: Sized,
    {
        Speed { inner: self, speed }
    }
}

/// Transform applied to two synchronized streams
pub trait DualImageProcessor {
    type Constant;

    fn constant_data(&self, first: &ImageFrame, second: &ImageFrame) -> Result<Self::Constant>;

    fn transform(
        &self,
        first: &ImageFrame,
        second: &ImageFrame,
        constant: &Self::Constant,
    ) -> Result<RgbaImage>;

    fn speed(&self) -> f64 {
        1.0
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run a single-stream processor on the combined output
    fn and_then<P>(self, next: P) -> DualChain<Self, P>
    where
        Self: Sized,
        P: ImageProcessor,
    {
        DualChain { dual: self, next }
    }

    fn map_pixels<F>(self, mapper: F) -> Mapped<Self, F>
    where
        Self: Sized,
        F: Fn(RgbaImage) -> RgbaImage,
    {
        Mapped { inner: self, mapper }
    }

    fn with_speed(self, speed: f64) -> Speed<Self>
    where
        Self: Sized,
    {
        Speed { inner: self, speed }
    }
}

/// Two processors run back to back
pub struct Chain<A, B> {
    first: A,
    second: B,
}

impl<A: ImageProcessor, B: ImageProcessor> ImageProcessor for Chain<A, B> {
    type Constant = (A::Constant, B::Constant);

    fn constant_data(&self, first: &ImageFrame) -> Result<Self::Constant> {
        let a = self.first.constant_data(first)?;
        let intermediate = first.clone().with_content(self.first.transform(first, &a)?);
        let b = self.second.constant_data(&intermediate)?;
        Ok((a, b))
    }

    fn transform(&self, frame: &ImageFrame, constant: &Self::Constant) -> Result<RgbaImage> {
        let intermediate = frame.clone().with_content(self.first.transform(frame, &constant.0)?);
        self.second.transform(&intermediate, &constant.1)
    }

    fn speed(&self) -> f64 {
        self.first.speed() * self.second.speed()
    }

    fn close(&mut self) -> Result<()> {
        let first = self.first.close();
        let second = self.second.close();
        first.and(second)
    }
}

/// A dual processor followed by a single-stream processor
pub struct DualChain<D, P> {
    dual: D,
    next: P,
}

impl<D: DualImageProcessor, P: ImageProcessor> DualImageProcessor for DualChain<D, P> {
    type Constant = (D::Constant, P::Constant);

    fn constant_data(&self, first: &ImageFrame, second: &ImageFrame) -> Result<Self::Constant> {
        let d = self.dual.constant_data(first, second)?;
        let combined = first.clone().with_content(self.dual.transform(first, second, &d)?);
        let p = self.next.constant_data(&combined)?;
        Ok((d, p))
    }

    fn transform(
        &self,
        first: &ImageFrame,
        second: &ImageFrame,
        constant: &Self::Constant,
    ) -> Result<RgbaImage> {
        let combined = first
            .clone()
            .with_content(self.dual.transform(first, second, &constant.0)?);
        self.next.transform(&combined, &constant.1)
    }

    fn speed(&self) -> f64 {
        self.dual.speed() * self.next.speed()
    }

    fn close(&mut self) -> Result<()> {
        let dual = self.dual.close();
        let next = self.next.close();
        dual.and(next)
    }
}

/// A processor followed by a pure pixel mapper
pub struct Mapped<P, F> {
    inner: P,
    mapper: F,
}

impl<P, F> ImageProcessor for Mapped<P, F>
where
    P: ImageProcessor,
    F: Fn(RgbaImage) -> RgbaImage,
{
    type Constant = P::Constant;

    fn constant_data(&self, first: &ImageFrame) -> Result<Self::Constant> {
        self.inner.constant_data(first)
    }

    fn transform(&self, frame: &ImageFrame, constant: &Self::Constant) -> Result<RgbaImage> {
        Ok((self.mapper)(self.inner.transform(frame, constant)?))
    }

    fn speed(&self) -> f64 {
        self.inner.speed()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

impl<P, F> DualImageProcessor for Mapped<P, F>
where
    P: DualImageProcessor,
    F: Fn(RgbaImage) -> RgbaImage,
{
    type Constant = P::Constant;

    fn constant_data(&self, first: &ImageFrame, second: &ImageFrame) -> Result<Self::Constant> {
        self.inner.constant_data(first, second)
    }

    fn transform(
        &self,
        first: &ImageFrame,
        second: &ImageFrame,
        constant: &Self::Constant,
    ) -> Result<RgbaImage> {
        Ok((self.mapper)(self.inner.transform(first, second, constant)?))
    }

    fn speed(&self) -> f64 {
        self.inner.speed()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// A processor with an overridden speed multiplier
pub struct Speed<P> {
    inner: P,
    speed: f64,
}

impl<P: ImageProcessor> ImageProcessor for Speed<P> {
    type Constant = P::Constant;

    fn constant_data(&self, first: &ImageFrame) -> Result<Self::Constant> {
        self.inner.constant_data(first)
    }

    fn transform(&self, frame: &ImageFrame, constant: &Self::Constant) -> Result<RgbaImage> {
        self.inner.transform(frame, constant)
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

impl<P: DualImageProcessor> DualImageProcessor for Speed<P> {
    type Constant = P::Constant;

    fn constant_data(&self, first: &ImageFrame, second: &ImageFrame) -> Result<Self::Constant> {
        self.inner.constant_data(first, second)
    }

    fn transform(
        &self,
        first: &ImageFrame,
        second: &ImageFrame,
        constant: &Self::Constant,
    ) -> Result<RgbaImage> {
        self.inner.transform(first, second, constant)
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Boxed pixel mapper, the shape effects are registered in
pub type PixelMapper = Box<dyn Fn(RgbaImage) -> RgbaImage>;

/// Fold a list of mappers into one
pub fn compose_mappers(mappers: Vec<PixelMapper>) -> impl Fn(RgbaImage) -> RgbaImage {
    move |image| mappers.iter().fold(image, |image, mapper| mapper(image))
}

/// Processor with its constant data, computed on first use
///
/// Closes the processor when dropped, so every exit path of a transcode
/// releases it.
pub struct Prepared<'a, P: ImageProcessor> {
    processor: &'a mut P,
    constant: Option<P::Constant>,
    closed: bool,
}

impl<'a, P: ImageProcessor> Prepared<'a, P> {
    pub fn new(processor: &'a mut P) -> Self {
        Self {
            processor,
            constant: None,
            closed: false,
        }
    }

    pub fn speed(&self) -> f64 {
        self.processor.speed()
    }

    /// Transform one frame, computing constant data on the first call
    pub fn apply(&mut self, frame: &ImageFrame) -> Result<RgbaImage> {
        let constant = match self.constant.take() {
            Some(constant) => constant,
            None => self.processor.constant_data(frame)?,
        };
        let output = self.processor.transform(frame, &constant);
        self.constant = Some(constant);
        output
    }

    pub fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.processor.close()
    }
}

impl<P: ImageProcessor> Drop for Prepared<'_, P> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// [`Prepared`] for dual processors
pub struct PreparedDual<'a, P: DualImageProcessor> {
    processor: &'a mut P,
    constant: Option<P::Constant>,
    closed: bool,
}

impl<'a, P: DualImageProcessor> PreparedDual<'a, P> {
    pub fn new(processor: &'a mut P) -> Self {
        Self {
            processor,
            constant: None,
            closed: false,
        }
    }

    pub fn speed(&self) -> f64 {
        self.processor.speed()
    }

    pub fn apply(&mut self, first: &ImageFrame, second: &ImageFrame) -> Result<RgbaImage> {
        let constant = match self.constant.take() {
            Some(constant) => constant,
            None => self.processor.constant_data(first, second)?,
        };
        let output = self.processor.transform(first, second, &constant);
        self.constant = Some(constant);
        output
    }

    pub fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.processor.close()
    }
}

impl<P: DualImageProcessor> Drop for PreparedDual<'_, P> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
