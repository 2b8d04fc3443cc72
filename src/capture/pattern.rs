use image::{Rgb, RgbImage};
use std::time::Instant;

use super::{CaptureSource, Frame};
use crate::config::Size;

/// Synthetic source: a slow colour gradient with a bright bar sweeping
/// across it. Each call to `latest()` renders the pattern for the current
/// instant, so it behaves like a live device without any hardware.
pub struct PatternSource {
    size: Size,
    started: Instant,
    released: bool,
}

impl PatternSource {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            started: Instant::now(),
            released: false,
        }
    }

    /// Pattern at `elapsed_ms` after start
    pub fn render_at(size: Size, elapsed_ms: u128) -> RgbImage {
        let phase = (elapsed_ms / 16) as u32;
        let bar_x = phase % size.width.max(1);
        let bar_half = (size.width / 40).max(1);

        RgbImage::from_fn(size.width, size.height, |x, y| {
            if x.abs_diff(bar_x) <= bar_half {
                return Rgb([240, 240, 240]);
            }
            let r = (x * 255 / size.width.max(1)) as u8;
            let g = (y * 255 / size.height.max(1)) as u8;
            let b = (phase % 256) as u8;
            Rgb([r / 2, g / 2, b / 3])
        })
    }
}

impl CaptureSource for PatternSource {
    fn resolution(&self) -> Size {
        self.size
    }

    fn latest(&self) -> Option<Frame> {
        if self.released {
            return None;
        }
        let elapsed = self.started.elapsed().as_millis();
        Some(Frame::new(Self::render_at(self.size, elapsed)))
    }

    fn release(&mut self) {
        self.released = true;
    }
}
