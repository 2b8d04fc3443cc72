//! Capture sources.
//!
//! A source exposes the newest frame at native resolution and keeps
//! refreshing it on its own schedule until released. Readers never wait:
//! `latest()` returns whatever frame is current.

pub mod pattern;
pub mod screen;

use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Size;

pub use pattern::PatternSource;
pub use screen::ScreenSource;

/// One raw RGB sample at native resolution. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Could not access the capture device: {0}")]
    Unavailable(String),
}

pub trait CaptureSource: Send {
    /// Native resolution of produced frames
    fn resolution(&self) -> Size;

    /// Newest frame, or `None` before the first one arrives or after release
    fn latest(&self) -> Option<Frame>;

    /// Stop producing frames and free the device. Idempotent.
    fn release(&mut self);
}

/// Which device backs a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    /// Primary display
    Screen,
    /// Synthetic moving test pattern
    Pattern,
}

/// Builds a fresh source for every session start
pub type CaptureFactory =
    Box<dyn Fn(Size) -> Result<Box<dyn CaptureSource>, CaptureError> + Send>;

pub fn factory(kind: SourceKind) -> CaptureFactory {
    match kind {
        SourceKind::Screen => Box::new(|size| {
            let source = ScreenSource::start(size)?;
            Ok(Box::new(source) as Box<dyn CaptureSource>)
        }),
        SourceKind::Pattern => {
            Box::new(|size| Ok(Box::new(PatternSource::new(size)) as Box<dyn CaptureSource>))
        }
    }
}
