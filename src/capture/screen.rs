//! Primary-display capture.
//!
//! Grabs the primary display on a dedicated thread, converts BGRA to RGB
//! at the requested native size and publishes the newest frame through a
//! watch slot. Older frames are simply overwritten.

use image::{ImageBuffer, RgbImage};
use scrap::{Capturer, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{CaptureError, CaptureSource, Frame};
use crate::config::Size;

/// Device frame pacing
const CAPTURE_FPS: u64 = 30;
/// How long start() waits for the capture thread to open the display
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ScreenSource {
    size: Size,
    running: Arc<AtomicBool>,
    frames: watch::Receiver<Option<Frame>>,
}

impl ScreenSource {
    /// Open the primary display. Fails if no display exists or the
    /// platform refuses capture.
    pub fn start(size: Size) -> Result<Self, CaptureError> {
        // Open once before spawning so the common failure is reported synchronously
        Display::primary().map_err(|e| CaptureError::Unavailable(format!("no display: {}", e)))?;

        let running = Arc::new(AtomicBool::new(true));
        let (frame_tx, frame_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let running_thread = running.clone();
        std::thread::Builder::new()
            .name("screen-capture".into())
            .spawn(move || {
                // scrap::Capturer is !Send on X11, so it must be created here
                let opened = Display::primary().and_then(|display| {
                    let (w, h) = (display.width(), display.height());
                    Capturer::new(display).map(|c| (c, w, h))
                });
                match opened {
                    Ok((capturer, w, h)) => {
                        let _ = ready_tx.send(Ok(()));
                        capture_loop(capturer, w, h, size, frame_tx, running_thread);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                    }
                }
            })
            .map_err(|e| CaptureError::Unavailable(format!("capture thread: {}", e)))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CaptureError::Unavailable(e)),
            Err(_) => {
                running.store(false, Ordering::Relaxed);
                return Err(CaptureError::Unavailable(
                    "display did not open in time".to_string(),
                ));
            }
        }

        debug!(width = size.width, height = size.height, "screen capture started");
        Ok(Self {
            size,
            running,
            frames: frame_rx,
        })
    }
}

impl CaptureSource for ScreenSource {
    fn resolution(&self) -> Size {
        self.size
    }

    fn latest(&self) -> Option<Frame> {
        if !self.running.load(Ordering::Relaxed) {
            return None;
        }
        self.frames.borrow().clone()
    }

    fn release(&mut self) {
        if self.running.swap(false, Ordering::Relaxed) {
            debug!("screen capture released");
        }
    }
}

impl Drop for ScreenSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn capture_loop(
    mut capturer: Capturer,
    src_w: usize,
    src_h: usize,
    out: Size,
    tx: watch::Sender<Option<Frame>>,
    running: Arc<AtomicBool>,
) {
    let frame_interval = Duration::from_millis(1000 / CAPTURE_FPS);

    while running.load(Ordering::Relaxed) {
        let frame_start = Instant::now();

        match capturer.frame() {
            Ok(frame) => {
                // scrap gives BGRA rows, possibly padded
                let stride = frame.len() / src_h.max(1);
                let rgb = bgra_to_rgb_scaled(&frame, src_w, src_h, stride, out.width, out.height);
                let image: Option<RgbImage> = ImageBuffer::from_raw(out.width, out.height, rgb);
                match image {
                    Some(image) => {
                        tx.send_replace(Some(Frame::new(image)));
                    }
                    None => warn!("dropping screen frame with inconsistent size"),
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            Err(e) => {
                debug!("screen capture error: {}", e);
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }
}

/// Convert a BGRA buffer to RGB, resampling to `dst_w`×`dst_h` by nearest neighbour
fn bgra_to_rgb_scaled(
    bgra: &[u8],
    src_w: usize,
    src_h: usize,
    stride: usize,
    dst_w: u32,
    dst_h: u32,
) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((dst_w * dst_h * 3) as usize);

    for y in 0..dst_h {
        let src_y = (y as usize * src_h) / dst_h as usize;
        for x in 0..dst_w {
            let src_x = (x as usize * src_w) / dst_w as usize;
            let offset = src_y * stride + src_x * 4;
            if offset + 2 < bgra.len() {
                rgb.push(bgra[offset + 2]);
                rgb.push(bgra[offset + 1]);
                rgb.push(bgra[offset]);
            } else {
                rgb.extend_from_slice(&[0, 0, 0]);
            }
        }
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_conversion_swaps_channels() {
        // 2x1 BGRA: pure blue, pure red
        let bgra = [255, 0, 0, 255, 0, 0, 255, 255];
        let rgb = bgra_to_rgb_scaled(&bgra, 2, 1, 8, 2, 1);
        assert_eq!(rgb, vec![0, 0, 255, 255, 0, 0]);
    }

    #[test]
    fn test_bgra_downscale_and_padding() {
        // 4x2 source with 4 bytes of row padding, halved to 2x1
        let mut bgra = Vec::new();
        for row in 0..2u8 {
            for col in 0..4u8 {
                bgra.extend_from_slice(&[col, row, 9, 255]);
            }
            bgra.extend_from_slice(&[0, 0, 0, 0]);
        }
        let rgb = bgra_to_rgb_scaled(&bgra, 4, 2, 20, 2, 1);
        assert_eq!(rgb, vec![9, 0, 0, 9, 0, 2]);
    }

    #[test]
    fn test_short_buffer_pads_black() {
        let rgb = bgra_to_rgb_scaled(&[1, 2, 3, 4], 2, 1, 8, 2, 1);
        assert_eq!(rgb, vec![3, 2, 1, 0, 0, 0]);
    }
}
