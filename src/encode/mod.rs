//! Downscaler: turns a native frame into the compressed payload the
//! detector receives.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use std::io::Cursor;
use thiserror::Error;

use crate::capture::Frame;
use crate::config::{SessionConfig, Size};

/// JPEG bytes at transmission resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub size: Size,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame is empty")]
    EmptyFrame,
    #[error("JPEG encode failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("encoder produced no bytes")]
    EmptyPayload,
}

#[derive(Debug, Clone, Copy)]
pub struct Downscaler {
    target: Size,
    quality: u8,
}

impl Downscaler {
    pub fn new(target: Size, quality: u8) -> Self {
        Self {
            target,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.transmission, config.jpeg_quality)
    }

    pub fn target(&self) -> Size {
        self.target
    }

    pub fn encode(&self, frame: &Frame) -> Result<Payload, EncodeError> {
        let src = frame.image();
        if src.width() == 0 || src.height() == 0 {
            return Err(EncodeError::EmptyFrame);
        }

        let resized;
        let img = if src.dimensions() == (self.target.width, self.target.height) {
            src
        } else {
            resized = imageops::resize(src, self.target.width, self.target.height, FilterType::Triangle);
            &resized
        };

        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        img.write_with_encoder(encoder)?;

        let bytes = buf.into_inner();
        if bytes.is_empty() {
            return Err(EncodeError::EmptyPayload);
        }
        Ok(Payload {
            size: self.target,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32) -> Frame {
        Frame::new(RgbImage::from_pixel(w, h, Rgb([200, 40, 40])))
    }

    #[test]
    fn test_encode_downscales_to_target() {
        let scaler = Downscaler::new(Size::new(320, 240), 90);
        let payload = scaler.encode(&solid(640, 480)).unwrap();

        // JPEG SOI marker
        assert_eq!(&payload.bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&payload.bytes).unwrap();
        assert_eq!(decoded.width(), 320);
        assert_eq!(decoded.height(), 240);
        assert_eq!(payload.size, Size::new(320, 240));
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let noisy = Frame::new(RgbImage::from_fn(640, 480, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }));
        let high = Downscaler::new(Size::new(320, 240), 95).encode(&noisy).unwrap();
        let low = Downscaler::new(Size::new(320, 240), 20).encode(&noisy).unwrap();
        assert!(low.bytes.len() < high.bytes.len());
    }

    #[test]
    fn test_empty_frame_is_an_error() {
        let scaler = Downscaler::new(Size::new(320, 240), 90);
        let err = scaler.encode(&Frame::new(RgbImage::new(0, 0))).unwrap_err();
        assert!(matches!(err, EncodeError::EmptyFrame));
    }
}
