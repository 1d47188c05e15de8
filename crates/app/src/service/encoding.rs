//! Output codecs for annotated frames.

use std::{io::Cursor, path::Path};

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Formats the service writes results in.
pub enum OutputFormat {
    Jpeg,
    Png,
    Bmp,
    Tiff,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Tiff => "tiff",
        }
    }

    pub fn mime_type(self) -> &'static str {
        self.image_format().to_mime_type()
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Bmp => ImageFormat::Bmp,
            OutputFormat::Tiff => ImageFormat::Tiff,
        }
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            ImageFormat::Png => Some(OutputFormat::Png),
            ImageFormat::Bmp => Some(OutputFormat::Bmp),
            ImageFormat::Tiff => Some(OutputFormat::Tiff),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        ImageFormat::from_extension(ext).and_then(Self::from_image_format)
    }

    /// Format implied by a client supplied filename such as `a.JPG`.
    pub fn from_filename(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// Encode an RGB frame. `jpeg_quality` only affects JPEG output.
pub fn encode(image: &RgbImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let quality = jpeg_quality.clamp(1, 100);
            JpegEncoder::new_with_quality(&mut buffer, quality)
                .encode_image(image)
                .context("JPEG encode failed")?;
        }
        other => {
            image
                .write_to(&mut Cursor::new(&mut buffer), other.image_format())
                .with_context(|| format!("{other:?} encode failed"))?;
        }
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn filename_extension_selects_format() {
        assert_eq!(OutputFormat::from_filename("a.jpg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_filename("b.JPEG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_filename("c.png"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::from_filename("d.gif"), None);
        assert_eq!(OutputFormat::from_filename("noext"), None);
    }

    #[test]
    fn png_output_is_lossless() {
        let mut frame = RgbImage::new(4, 3);
        frame.put_pixel(1, 2, Rgb([10, 200, 30]));
        let bytes = encode(&frame, OutputFormat::Png, 95).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn jpeg_output_keeps_dimensions() {
        let frame = RgbImage::from_pixel(33, 17, Rgb([90, 90, 90]));
        let bytes = encode(&frame, OutputFormat::Jpeg, 80).unwrap();
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (33, 17));
    }
}
