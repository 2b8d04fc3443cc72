//! Render loop compositor.
//!
//! Pure function of (frame, detection, wall-clock time): no network
//! timing leaks into what is drawn, and the DANGER flash is keyed off the
//! clock value passed in rather than the tick count.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::capture::Frame;
use crate::config::{ReferenceObject, SessionConfig, Size};
use crate::protocol::{Detection, HazardState, Point};

/// Flash half-period in milliseconds
pub const FLASH_INTERVAL_MS: i64 = 200;
const FLASH_ALPHA: f32 = 0.3;
const MARKER_RADIUS: u32 = 5;

const OBJECT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const MARKER_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const FLASH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Fixed geometry shared by every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scene {
    pub display: Size,
    pub transmission: Size,
    pub object: ReferenceObject,
}

impl Scene {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            display: config.display,
            transmission: config.transmission,
            object: config.object,
        }
    }

    /// Rescale a transmission-space point to display space. Each axis is
    /// bounded to one display size beyond the frame edge.
    pub fn to_display(&self, point: Point) -> (i32, i32) {
        let Size { width, height } = self.display;
        let x = point.x * width as f64 / self.transmission.width.max(1) as f64;
        let y = point.y * height as f64 / self.transmission.height.max(1) as f64;
        let bound = |v: f64, extent: u32| {
            let e = extent as f64;
            v.clamp(-e, 2.0 * e).round() as i32
        };
        (bound(x, width), bound(y, height))
    }
}

/// Everything drawn or shown besides the pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub state: HazardState,
    pub label: &'static str,
    pub color: Rgb<u8>,
    /// Marker position in display space
    pub marker: Option<(i32, i32)>,
    /// Whether the DANGER flash is lit in this output
    pub flash: bool,
}

/// One composited output
#[derive(Debug, Clone)]
pub struct Composition {
    pub image: RgbImage,
    pub overlay: Overlay,
}

pub fn flash_lit(now_ms: i64) -> bool {
    now_ms.div_euclid(FLASH_INTERVAL_MS) % 2 == 0
}

pub fn overlay_label(state: HazardState) -> &'static str {
    match state {
        HazardState::Danger => "DANGER DANGER",
        other => other.name(),
    }
}

pub fn state_color(state: HazardState) -> Rgb<u8> {
    match state {
        HazardState::Safe => Rgb([0, 255, 0]),
        HazardState::Warning => Rgb([255, 255, 0]),
        HazardState::Danger => Rgb([255, 0, 0]),
    }
}

pub fn compose(scene: &Scene, frame: Option<&Frame>, detection: Detection, now_ms: i64) -> Composition {
    let Size { width, height } = scene.display;

    // 1. live frame at display resolution
    let mut image = match frame {
        Some(f) if f.size() == scene.display => f.image().clone(),
        Some(f) => imageops::resize(f.image(), width, height, FilterType::Triangle),
        None => RgbImage::new(width, height),
    };

    // 2. reference object
    fill_circle(&mut image, scene.object.center, scene.object.radius, OBJECT_COLOR);

    // 3. marker and its line to the object
    let marker = detection.point.map(|p| scene.to_display(p));
    if let Some(m) = marker {
        draw_line(&mut image, m, scene.object.center, MARKER_COLOR);
        fill_circle(&mut image, m, MARKER_RADIUS, MARKER_COLOR);
    }

    // 4. state overlay
    let flash = detection.state == HazardState::Danger && flash_lit(now_ms);
    if flash {
        blend(&mut image, FLASH_COLOR, FLASH_ALPHA);
    }

    Composition {
        image,
        overlay: Overlay {
            state: detection.state,
            label: overlay_label(detection.state),
            color: state_color(detection.state),
            marker,
            flash,
        },
    }
}

// Only the part of the disc inside the image is visited.
fn fill_circle(image: &mut RgbImage, center: (i32, i32), radius: u32, color: Rgb<u8>) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (cx, cy) = (center.0 as i64, center.1 as i64);
    let r = radius as i64;

    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= r * r {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Liang-Barsky: the part of the segment inside the image, if any
fn clip_segment(
    from: (i32, i32),
    to: (i32, i32),
    width: u32,
    height: u32,
) -> Option<((i64, i64), (i64, i64))> {
    if width == 0 || height == 0 {
        return None;
    }
    let (x0, y0) = (from.0 as f64, from.1 as f64);
    let (dx, dy) = (to.0 as f64 - x0, to.1 as f64 - y0);
    let (xmax, ymax) = ((width - 1) as f64, (height - 1) as f64);

    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [(-dx, x0), (dx, xmax - x0), (-dy, y0), (dy, ymax - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }

    let at = |t: f64| {
        (
            ((x0 + t * dx).round() as i64).clamp(0, xmax as i64),
            ((y0 + t * dy).round() as i64).clamp(0, ymax as i64),
        )
    };
    Some((at(t0), at(t1)))
}

// Bresenham over the clipped segment
fn draw_line(image: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>) {
    let Some(((mut x, mut y), end)) = clip_segment(from, to, image.width(), image.height()) else {
        return;
    };
    let dx = (end.0 - x).abs();
    let dy = -(end.1 - y).abs();
    let sx = if x < end.0 { 1 } else { -1 };
    let sy = if y < end.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        image.put_pixel(x as u32, y as u32, color);
        if (x, y) == end {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn blend(image: &mut RgbImage, color: Rgb<u8>, alpha: f32) {
    for pixel in image.pixels_mut() {
        for c in 0..3 {
            let mixed = pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
            pixel[c] = mixed.round() as u8;
        }
    }
}
