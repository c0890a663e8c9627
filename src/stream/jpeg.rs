//! JPEG encoder for raster frames
//!
//! Wraps the `image` crate's baseline JPEG encoder and keeps one scratch
//! buffer per encoder so a conversion loop does not reallocate per frame.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::{DynamicImage, GenericImageView};
use thiserror::Error;

use crate::camera::RasterFrame;
use crate::error::CameraError;

/// Default JPEG quality, matching the usual library default
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("jpeg encoder failed: {0}")]
    Image(#[from] image::ImageError),
}

impl From<EncodeError> for CameraError {
    fn from(e: EncodeError) -> Self {
        CameraError::Encode(e.to_string())
    }
}

/// Raster to JPEG encoder
///
/// Not shared between tasks; each conversion loop owns one.
pub struct JpegEncoder {
    quality: u8,
    buffer: Vec<u8>,
}

impl JpegEncoder {
    /// Create an encoder, clamping quality to 1..=100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            buffer: Vec::new(),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode one raster frame
    ///
    /// RGB and grayscale frames are encoded as-is, anything else is converted
    /// to RGB first (JPEG has no alpha channel).
    pub fn encode(&mut self, frame: &RasterFrame) -> Result<Bytes, EncodeError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(EncodeError::EmptyFrame { width, height });
        }

        self.buffer.clear();
        {
            let mut encoder = ImageJpegEncoder::new_with_quality(&mut self.buffer, self.quality);
            match frame {
                DynamicImage::ImageRgb8(rgb) => encoder.encode_image(rgb)?,
                DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray)?,
                other => encoder.encode_image(&other.to_rgb8())?,
            }
        }

        Ok(Bytes::copy_from_slice(&self.buffer))
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}
