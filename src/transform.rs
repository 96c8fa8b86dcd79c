//! Image transformation: raw bytes in, three byte variants out.
//!
//! | Variant | Produced by |
//! |---|---|
//! | **original** | the fetched bytes, untouched |
//! | **thumbnail** | `DynamicImage::thumbnail` into a fixed [`THUMBNAIL_MAX`] box (never upscaled), JPEG |
//! | **clean** | `DynamicImage::resize` (Lanczos3) into the [`ResizePolicy`] box, JPEG |
//!
//! The clean variant is the original bytes when the policy sets no bounds or the
//! image already fits. All encoders run with fixed settings, so the same input
//! always produces the same output bytes.

use crate::error::{Error, Result};
use crate::types::ResizePolicy;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

/// Bounding box (width and height) the thumbnail is scaled into
pub const THUMBNAIL_MAX: u32 = 90;

/// JPEG quality for re-encoded variants
const JPEG_QUALITY: u8 = 90;

/// The three variants of one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedImage {
    /// The bytes as fetched
    pub original_bytes: Vec<u8>,
    /// Small preview, JPEG
    pub thumbnail_bytes: Vec<u8>,
    /// Resized copy (JPEG), or the original bytes when no resize applied
    pub clean_bytes: Vec<u8>,
    /// Detected container format of the original
    pub original_format: ImageFormat,
    /// True when `clean_bytes` is a re-encoded JPEG rather than the original
    pub clean_reencoded: bool,
}

impl TransformedImage {
    /// File extension for the original variant
    pub fn original_extension(&self) -> &'static str {
        format_extension(self.original_format)
    }

    /// File extension for the clean variant
    pub fn clean_extension(&self) -> &'static str {
        if self.clean_reencoded {
            "jpg"
        } else {
            self.original_extension()
        }
    }
}

/// Preferred file extension for a detected format
pub fn format_extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::WebP => "webp",
        other => other.extensions_str().first().copied().unwrap_or("img"),
    }
}

/// Decode `raw_bytes` and build the thumbnail and clean variants.
///
/// Fails with [`Error::Decode`] when the bytes are not a supported image.
pub fn transform(raw_bytes: &[u8], resize_policy: &ResizePolicy) -> Result<TransformedImage> {
    let original_format = image::guess_format(raw_bytes)?;
    let img = image::load_from_memory_with_format(raw_bytes, original_format)?;

    // `thumbnail` would upscale small images
    let thumbnail_bytes = if img.width() <= THUMBNAIL_MAX && img.height() <= THUMBNAIL_MAX {
        encode_jpeg(&img)?
    } else {
        encode_jpeg(&img.thumbnail(THUMBNAIL_MAX, THUMBNAIL_MAX))?
    };

    let (clean_bytes, clean_reencoded) =
        match clean_dimensions(img.width(), img.height(), resize_policy) {
            Some((w, h)) => {
                let clean = img.resize(w, h, FilterType::Lanczos3);
                (encode_jpeg(&clean)?, true)
            }
            None => (raw_bytes.to_vec(), false),
        };

    Ok(TransformedImage {
        original_bytes: raw_bytes.to_vec(),
        thumbnail_bytes,
        clean_bytes,
        original_format,
        clean_reencoded,
    })
}

/// Bounding box for the clean variant, or `None` when the image already fits.
///
/// Missing bounds are treated as unconstrained. `DynamicImage::resize` keeps the
/// aspect ratio inside the box, so only the box is computed here.
fn clean_dimensions(width: u32, height: u32, policy: &ResizePolicy) -> Option<(u32, u32)> {
    if !policy.is_active() {
        return None;
    }
    let max_w = policy.max_width.unwrap_or(u32::MAX).max(1);
    let max_h = policy.max_height.unwrap_or(u32::MAX).max(1);
    if width <= max_w && height <= max_h {
        return None;
    }
    Some((max_w.min(width), max_h.min(height)))
}

/// Encode as baseline JPEG with a fixed quality. JPEG has no alpha, so the
/// image is flattened to RGB first.
fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| Error::Decode(format!("JPEG encode failed: {e}")))?;
    Ok(out)
}
