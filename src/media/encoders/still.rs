// SPDX-License-Identifier: MPL-2.0

//! Still image encoding
//!
//! Converts a filtered frame to RGB and encodes it as JPEG (or PNG for
//! lossless debugging output).

use crate::media::convert;
use crate::media::frame::FrameBuffer;
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info};

/// Supported still formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    /// JPEG format (lossy compression)
    Jpeg,
    /// PNG format (lossless compression)
    Png,
}

impl StillFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "jpg",
            StillFormat::Png => "png",
        }
    }
}

/// Encoded still ready for saving
pub struct EncodedStill {
    pub data: Vec<u8>,
    pub format: StillFormat,
    pub width: u32,
    pub height: u32,
}

/// One-shot still encoder
#[derive(Debug, Clone, Copy)]
pub struct StillEncoder {
    format: StillFormat,
    jpeg_quality: u8,
}

impl StillEncoder {
    pub fn jpeg(quality: u8) -> Self {
        Self {
            format: StillFormat::Jpeg,
            jpeg_quality: quality.clamp(1, 100),
        }
    }

    pub fn png() -> Self {
        Self {
            format: StillFormat::Png,
            jpeg_quality: 0,
        }
    }

    pub fn format(&self) -> StillFormat {
        self.format
    }

    /// Convert and encode a CPU frame
    pub fn encode(&self, frame: &FrameBuffer) -> Result<EncodedStill, String> {
        let image = frame
            .software()
            .ok_or_else(|| "Still encoding needs a CPU frame".to_string())?;
        let rgb = convert::to_rgb(image)?;

        info!(
            width = rgb.width(),
            height = rgb.height(),
            format = ?self.format,
            "Encoding still image"
        );

        let (width, height) = rgb.dimensions();
        let data = match self.format {
            StillFormat::Jpeg => Self::encode_jpeg(&rgb, self.jpeg_quality)?,
            StillFormat::Png => Self::encode_png(&rgb)?,
        };
        debug!(size = data.len(), "Still encoding complete");

        Ok(EncodedStill {
            data,
            format: self.format,
            width,
            height,
        })
    }

    fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, String> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);

        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
        encoder
            .encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| format!("JPEG encoding failed: {}", e))?;

        Ok(buffer)
    }

    fn encode_png(image: &RgbImage) -> Result<Vec<u8>, String> {
        let mut buffer = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .map_err(|e| format!("PNG encoding failed: {}", e))?;
        Ok(buffer)
    }
}

impl EncodedStill {
    pub fn save(&self, path: &Path) -> Result<(), String> {
        std::fs::write(path, &self.data)
            .map_err(|e| format!("Failed to save {}: {}", path.display(), e))?;
        info!(path = %path.display(), bytes = self.data.len(), "Still image saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::{PixelFormat, SoftwareImage};
    use crate::media::timebase::Rational;

    #[test]
    fn test_jpeg_decodes_back_to_same_size() {
        let image = SoftwareImage::blank(PixelFormat::Nv12, 64, 32).unwrap();
        let frame = FrameBuffer::from_software(image, 0, Rational::MICROS);

        let still = StillEncoder::jpeg(92).encode(&frame).unwrap();
        assert_eq!(&still.data[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&still.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }
}
