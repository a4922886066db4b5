use std::borrow::Cow;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, ImageResult};
use serde::{Deserialize, Serialize};

const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Formats the service is known to deliver scrambled pages in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Jpeg,
    Png,
    Unknown,
}

impl SourceFormat {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(JPEG_SIGNATURE) {
            SourceFormat::Jpeg
        } else if bytes.starts_with(PNG_SIGNATURE) {
            SourceFormat::Png
        } else {
            SourceFormat::Unknown
        }
    }

    pub fn codec(self) -> Option<&'static dyn ImageCodec> {
        match self {
            SourceFormat::Jpeg => Some(&JpegCodec),
            SourceFormat::Png => Some(&PngCodec),
            SourceFormat::Unknown => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Png => "png",
            SourceFormat::Unknown => "unknown",
        }
    }
}

/// Decode/encode capability for one detected format.
pub trait ImageCodec: Sync {
    fn format(&self) -> ImageFormat;
    fn extension(&self) -> &'static str;
    fn mime_type(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> ImageResult<DynamicImage> {
        image::load_from_memory_with_format(bytes, self.format())
    }

    /// Reads the pixel size from the header only.
    fn dimensions(&self, bytes: &[u8]) -> ImageResult<(u32, u32)> {
        ImageReader::with_format(Cursor::new(bytes), self.format()).into_dimensions()
    }

    /// Encodes at the highest quality the format offers.
    fn encode(&self, image: &DynamicImage) -> ImageResult<Vec<u8>>;
}

pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Jpeg
    }

    fn extension(&self) -> &'static str {
        "jpg"
    }

    fn mime_type(&self) -> &'static str {
        "image/jpeg"
    }

    fn encode(&self, image: &DynamicImage) -> ImageResult<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buffer, 100);
        match image {
            DynamicImage::ImageLuma8(gray) => encoder.write_image(
                gray.as_raw(),
                gray.width(),
                gray.height(),
                ExtendedColorType::L8,
            )?,
            other => {
                let rgb = other.to_rgb8();
                encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?
            }
        }
        Ok(buffer)
    }
}

pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Png
    }

    fn extension(&self) -> &'static str {
        "png"
    }

    fn mime_type(&self) -> &'static str {
        "image/png"
    }

    fn encode(&self, image: &DynamicImage) -> ImageResult<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive);
        let image = match image {
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
                Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
            }
            other => Cow::Borrowed(other),
        };
        encoder.write_image(
            image.as_bytes(),
            image.width(),
            image.height(),
            image.color().into(),
        )?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Luma, Rgb, Rgba};

    #[test]
    fn detect_recognizes_magic_bytes() {
        assert_eq!(
            SourceFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]),
            SourceFormat::Jpeg
        );
        assert_eq!(
            SourceFormat::detect(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            SourceFormat::Png
        );
        assert_eq!(SourceFormat::detect(b"GIF89a"), SourceFormat::Unknown);
        assert_eq!(SourceFormat::detect(&[]), SourceFormat::Unknown);
        assert!(SourceFormat::Unknown.codec().is_none());
    }

    #[test]
    fn png_codec_round_trips_alpha_exactly() {
        let buffer = ImageBuffer::from_fn(40, 30, |x, y| Rgba([x as u8, y as u8, 7, 128]));
        let image = DynamicImage::ImageRgba8(buffer.clone());
        let codec = SourceFormat::Png.codec().expect("png codec");

        let bytes = codec.encode(&image).expect("encode png");
        assert_eq!(SourceFormat::detect(&bytes), SourceFormat::Png);
        assert_eq!(codec.dimensions(&bytes).expect("dimensions"), (40, 30));

        let decoded = codec.decode(&bytes).expect("decode png");
        assert_eq!(decoded.to_rgba8(), buffer);
    }

    #[test]
    fn jpeg_codec_keeps_grayscale_and_size() {
        let gray = ImageBuffer::from_fn(64, 48, |x, _| Luma([(x * 4) as u8]));
        let codec = SourceFormat::Jpeg.codec().expect("jpeg codec");
        let bytes = codec
            .encode(&DynamicImage::ImageLuma8(gray))
            .expect("encode gray jpeg");
        assert_eq!(SourceFormat::detect(&bytes), SourceFormat::Jpeg);
        let decoded = codec.decode(&bytes).expect("decode jpeg");
        assert_eq!(decoded.dimensions(), (64, 48));
        assert!(matches!(decoded, DynamicImage::ImageLuma8(_)));

        let rgb = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(16, 16, Rgb([10, 200, 30])));
        let bytes = codec.encode(&rgb).expect("encode rgb jpeg");
        assert_eq!(codec.dimensions(&bytes).expect("dimensions"), (16, 16));
        assert_eq!(codec.extension(), "jpg");
        assert_eq!(codec.mime_type(), "image/jpeg");
    }
}
