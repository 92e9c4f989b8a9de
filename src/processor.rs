//! Optional downscale-only resizing of fetched images
//!
//! Images no wider than the target width are passed through byte-for-byte.
//! Wider images are resized with a bilinear (triangle) filter to exactly the
//! target width and re-encoded in the destination's format.

use crate::config::ResizeConfig;
use crate::error::{FetchError, Result};
use crate::types::{EncodedImage, ProcessedImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::sync::OnceLock;

/// Decode ceiling on total pixels when none is configured
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 178_956_970;

static MAX_IMAGE_PIXELS: OnceLock<u64> = OnceLock::new();

/// Set the process-wide decode ceiling on total pixels
///
/// Must be called at most once, before the first image is decoded.
///
/// # Errors
/// Returns an error if the ceiling was already set or already read.
pub fn configure_max_image_pixels(limit: u64) -> Result<()> {
    MAX_IMAGE_PIXELS.set(limit).map_err(|_| {
        FetchError::invalid_config("Decode pixel ceiling can only be configured once")
    })
}

/// Current process-wide decode ceiling
#[must_use]
pub fn max_image_pixels() -> u64 {
    *MAX_IMAGE_PIXELS.get_or_init(|| DEFAULT_MAX_IMAGE_PIXELS)
}

/// Decodes, downscales and re-encodes image buffers
#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    target_width: u32,
    jpeg_quality: u8,
}

impl ImageProcessor {
    #[must_use]
    pub fn new(config: ResizeConfig) -> Self {
        Self {
            target_width: config.target_width,
            jpeg_quality: config.jpeg_quality,
        }
    }

    #[must_use]
    pub fn target_width(&self) -> u32 {
        self.target_width
    }

    /// Downscale `bytes` to the target width if they are wider
    ///
    /// `extension` is the destination file extension and selects the output
    /// format; when it is unknown the input format is kept.
    ///
    /// # Errors
    /// - `Decode` when the bytes are not a decodable image or exceed the pixel ceiling
    /// - `UnsupportedShape` for zero-sized images or unknown channel layouts
    /// - `Encode` when the resized image cannot be written in the output format
    pub fn maybe_resize(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<EncodedImage> {
        let (image, input_format) = decode(&bytes)?;
        let (width, height) = (image.width(), image.height());
        let channels = check_shape(&image)?;

        if width <= self.target_width {
            tracing::trace!(width, target_width = self.target_width, "No resize needed");
            return Ok(EncodedImage::Original(bytes));
        }

        let new_height = scaled_height(width, height, self.target_width);
        tracing::debug!(
            original_width = width,
            original_height = height,
            target_width = self.target_width,
            target_height = new_height,
            "Downscaling image"
        );

        let resized = image.resize_exact(self.target_width, new_height, FilterType::Triangle);

        let format = extension
            .and_then(ImageFormat::from_extension)
            .or(input_format)
            .ok_or_else(|| FetchError::encode("Cannot determine output image format"))?;

        let encoded = self.encode(&resized, channels, format)?;

        Ok(EncodedImage::Resized(ProcessedImage {
            width: self.target_width,
            height: new_height,
            channels,
            original_len: bytes.len(),
            encoded,
        }))
    }

    fn encode(&self, image: &DynamicImage, channels: u8, format: ImageFormat) -> Result<Vec<u8>> {
        let prepared = prepare_for_format(image, channels, format);
        let mut out = Cursor::new(Vec::new());

        let result = match format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
                prepared.write_with_encoder(encoder)
            },
            other => prepared.write_to(&mut out, other),
        };

        result.map_err(|e| FetchError::encode(format!("{:?}: {}", format, e)))?;
        Ok(out.into_inner())
    }
}

/// Height after scaling `width` to `target_width`, rounded, at least 1
#[must_use]
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scale = f64::from(target_width) / f64::from(width);
    (f64::from(height) * scale).round().max(1.0) as u32
}

fn decode(bytes: &[u8]) -> Result<(DynamicImage, Option<ImageFormat>)> {
    let probe = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FetchError::decode(e.to_string()))?;
    let format = probe.format();

    let (width, height) = probe
        .into_dimensions()
        .map_err(|e| FetchError::decode(e.to_string()))?;
    let pixels = u64::from(width) * u64::from(height);
    let limit = max_image_pixels();
    if pixels > limit {
        return Err(FetchError::decode(format!(
            "Image has {} pixels, above the {} pixel ceiling",
            pixels, limit
        )));
    }

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FetchError::decode(e.to_string()))?;
    // The pixel ceiling above replaces the allocation limit
    reader.no_limits();

    let image = reader
        .decode()
        .map_err(|e| FetchError::decode(e.to_string()))?;
    Ok((image, format))
}

/// Accept 2-D (grayscale) and 3-D (luma+alpha, RGB, RGBA) pixel grids
fn check_shape(image: &DynamicImage) -> Result<u8> {
    if image.width() == 0 || image.height() == 0 {
        return Err(FetchError::UnsupportedShape(format!(
            "{}x{}",
            image.width(),
            image.height()
        )));
    }

    match image.color().channel_count() {
        channels @ 1..=4 => Ok(channels),
        other => Err(FetchError::UnsupportedShape(format!(
            "{}x{}x{}",
            image.height(),
            image.width(),
            other
        ))),
    }
}

/// Convert to an 8-bit layout the output encoder accepts
fn prepare_for_format(image: &DynamicImage, channels: u8, format: ImageFormat) -> DynamicImage {
    match (format, channels) {
        (ImageFormat::Jpeg, 1 | 2) => DynamicImage::ImageLuma8(image.to_luma8()),
        (ImageFormat::Jpeg, _) => DynamicImage::ImageRgb8(image.to_rgb8()),
        (ImageFormat::WebP | ImageFormat::Gif, 2 | 4) => DynamicImage::ImageRgba8(image.to_rgba8()),
        (ImageFormat::WebP | ImageFormat::Gif, _) => DynamicImage::ImageRgb8(image.to_rgb8()),
        (_, 1) => DynamicImage::ImageLuma8(image.to_luma8()),
        (_, 2) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        (_, 3) => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => DynamicImage::ImageRgba8(image.to_rgba8()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    fn encode_rgb(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, format)
            .unwrap();
        out.into_inner()
    }

    fn processor(target_width: u32) -> ImageProcessor {
        ImageProcessor::new(ResizeConfig {
            target_width,
            jpeg_quality: 90,
        })
    }

    #[test]
    fn test_no_upscale_returns_original_bytes() {
        let bytes = encode_rgb(40, 30, ImageFormat::Png);
        let result = processor(100).maybe_resize(bytes.clone(), Some("png")).unwrap();
        assert_eq!(result, EncodedImage::Original(bytes.clone()));

        // Equal width is not resized either
        let result = processor(40).maybe_resize(bytes.clone(), Some("png")).unwrap();
        assert_eq!(result.bytes(), bytes.as_slice());
    }

    #[test]
    fn test_downscale_png_dimensions() {
        let bytes = encode_rgb(200, 100, ImageFormat::Png);
        let result = processor(50).maybe_resize(bytes.clone(), Some("png")).unwrap();

        let EncodedImage::Resized(processed) = result else {
            panic!("expected a resized image");
        };
        assert_eq!(processed.width, 50);
        assert_eq!(processed.height, 25);
        assert_eq!(processed.channels, 3);
        assert_eq!(processed.original_len, bytes.len());

        let decoded = image::load_from_memory(&processed.encoded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 25));
    }

    #[test]
    fn test_downscale_jpeg_rounds_height() {
        let bytes = encode_rgb(300, 101, ImageFormat::Jpeg);
        let result = processor(100).maybe_resize(bytes, Some("jpg")).unwrap();

        assert!(result.is_resized());
        let decoded = image::load_from_memory(result.bytes()).unwrap();
        assert_eq!(decoded.width(), 100);
        // 101 * 100 / 300 = 33.67
        assert_eq!(decoded.height(), 34);
        assert_eq!(
            image::guess_format(result.bytes()).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_grayscale_image_supported() {
        let gray = GrayImage::from_fn(64, 64, |x, _| image::Luma([(x * 4) as u8]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();

        let result = processor(16)
            .maybe_resize(out.into_inner(), Some("png"))
            .unwrap();
        let EncodedImage::Resized(processed) = result else {
            panic!("expected a resized image");
        };
        assert_eq!(processed.channels, 1);
        assert_eq!((processed.width, processed.height), (16, 16));
    }

    #[test]
    fn test_output_format_follows_extension() {
        let bytes = encode_rgb(100, 50, ImageFormat::Png);
        let result = processor(10).maybe_resize(bytes, Some("jpg")).unwrap();
        assert_eq!(
            image::guess_format(result.bytes()).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_garbage_bytes_fail_decode() {
        let err = processor(10)
            .maybe_resize(b"definitely not an image".to_vec(), Some("jpg"))
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_scaled_height() {
        assert_eq!(scaled_height(2048, 1536, 1024), 768);
        assert_eq!(scaled_height(3000, 1, 1024), 1);
        assert_eq!(scaled_height(1500, 1000, 1024), 683);
    }
}
