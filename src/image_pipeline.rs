//! Cover art preparation for embedding into audio tags.
//!
//! Downloaded bytes are checked by magic number, decoded (with a lenient JPEG
//! fallback for files other decoders reject), scaled to fit a maximum edge and
//! re-encoded as baseline JPEG.

use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView, ImageFormat,
};
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

/// Failure to turn downloaded bytes into an embeddable cover.
#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("downloaded data is not a supported image")]
    NotAnImage,
    #[error("image could not be decoded")]
    Decode,
    #[error("failed to encode cover: {0}")]
    Encode(#[from] image::ImageError),
}

/// Image container recognized from the leading bytes.
pub fn detect_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        Some(ImageFormat::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageFormat::Gif)
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some(ImageFormat::WebP)
    } else if bytes.starts_with(b"BM") {
        Some(ImageFormat::Bmp)
    } else {
        None
    }
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgb8(image))
}

fn decode_with_fallback(bytes: &[u8], format: ImageFormat) -> Option<DynamicImage> {
    image::load_from_memory_with_format(bytes, format)
        .ok()
        .or_else(|| {
            if format == ImageFormat::Jpeg {
                decode_jpeg_non_strict(bytes)
            } else {
                None
            }
        })
}

fn fit_to_max_edge(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }
    let clamped = max_edge.max(1);
    if width.max(height) <= clamped {
        return (width, height);
    }
    if width >= height {
        let scaled_height =
            ((u64::from(height) * u64::from(clamped)) + (u64::from(width) / 2)) / u64::from(width);
        (clamped, scaled_height.max(1) as u32)
    } else {
        let scaled_width =
            ((u64::from(width) * u64::from(clamped)) + (u64::from(height) / 2)) / u64::from(height);
        (scaled_width.max(1) as u32, clamped)
    }
}

fn downscale(decoded: DynamicImage, target_width: u32, target_height: u32) -> DynamicImage {
    let mut current = decoded;
    let mut current_dims = current.dimensions();

    // Halving first keeps large scans from aliasing in the final pass.
    while current_dims.0 > target_width.saturating_mul(2)
        || current_dims.1 > target_height.saturating_mul(2)
    {
        let next_w = (current_dims.0 / 2).max(target_width);
        let next_h = (current_dims.1 / 2).max(target_height);
        current = current.resize_exact(next_w, next_h, FilterType::Triangle);
        current_dims = current.dimensions();
    }

    if current_dims == (target_width, target_height) {
        return current;
    }
    current.resize_exact(target_width, target_height, FilterType::Lanczos3)
}

/// Re-encodes `bytes` as an RGB JPEG no larger than `max_edge` on either side.
pub fn prepare_cover(bytes: &[u8], max_edge: u32, quality: u8) -> Result<Vec<u8>, CoverError> {
    let format = detect_image_format(bytes).ok_or(CoverError::NotAnImage)?;
    let decoded = decode_with_fallback(bytes, format).ok_or(CoverError::Decode)?;

    let (width, height) = decoded.dimensions();
    let (target_width, target_height) = fit_to_max_edge(width, height, max_edge);
    let resized = if (target_width, target_height) == (width, height) {
        decoded
    } else {
        downscale(decoded, target_width, target_height)
    };

    let rgb = resized.to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::{detect_image_format, fit_to_max_edge, prepare_cover, CoverError};
    use image::{
        codecs::jpeg::JpegEncoder, DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgb,
        RgbImage, Rgba,
    };
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let source = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            width,
            height,
            Rgba([8, 16, 24, 128]),
        ));
        let mut cursor = Cursor::new(Vec::<u8>::new());
        source
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("png encoding should succeed");
        cursor.into_inner()
    }

    #[test]
    fn test_fit_to_max_edge_preserves_aspect_ratio() {
        assert_eq!(fit_to_max_edge(2000, 1000, 800), (800, 400));
        assert_eq!(fit_to_max_edge(1000, 2000, 800), (400, 800));
        assert_eq!(fit_to_max_edge(128, 64, 800), (128, 64));
    }

    #[test]
    fn test_detect_image_format_uses_magic_bytes() {
        assert_eq!(detect_image_format(&png_bytes(2, 2)), Some(ImageFormat::Png));
        assert_eq!(detect_image_format(b"GIF89a...."), Some(ImageFormat::Gif));
        assert_eq!(
            detect_image_format(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(ImageFormat::WebP)
        );
        assert_eq!(detect_image_format(b"<!DOCTYPE html>"), None);
    }

    #[test]
    fn test_large_png_becomes_bounded_jpeg() {
        let prepared = prepare_cover(&png_bytes(1600, 1000), 800, 90).expect("cover");
        assert_eq!(detect_image_format(&prepared), Some(ImageFormat::Jpeg));
        let decoded = image::load_from_memory(&prepared).expect("decodes");
        assert_eq!(decoded.dimensions(), (800, 500));
    }

    #[test]
    fn test_small_image_keeps_its_size() {
        let prepared = prepare_cover(&png_bytes(300, 300), 800, 90).expect("cover");
        let decoded = image::load_from_memory(&prepared).expect("decodes");
        assert_eq!(decoded.dimensions(), (300, 300));
    }

    #[test]
    fn test_jpeg_with_trailing_garbage_is_accepted() {
        let rgb = RgbImage::from_pixel(12, 9, Rgb([90, 140, 210]));
        let mut encoded = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut encoded, 85);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(rgb))
                .expect("jpeg encoding should succeed");
        }
        encoded.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let prepared = prepare_cover(&encoded, 800, 90).expect("cover");
        let decoded = image::load_from_memory(&prepared).expect("decodes");
        assert_eq!(decoded.dimensions(), (12, 9));
    }

    #[test]
    fn test_html_error_page_is_rejected() {
        assert!(matches!(
            prepare_cover(b"<html>Access denied</html>", 800, 90),
            Err(CoverError::NotAnImage)
        ));
    }
}
