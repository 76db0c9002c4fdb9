//! Image codec helpers: decode, resample and re-encode page images.
//!
//! Sources arrive in several raster formats and a compression pass must
//! rewrite each file in its own format, in place. JPEG (and JFIF) honour the
//! quality knob; PNG is re-encoded with the strongest deflate setting; TIFF
//! and BMP are lossless and only shrink through resampling.

use crate::error::PdfImgError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Raster format of a page image, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Tiff,
    Bmp,
}

impl ImageKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "jfif" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tiff" | "tif" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }
}

/// Decode an image, sniffing the format from its content.
pub fn load_image(path: &Path) -> Result<DynamicImage, PdfImgError> {
    ImageReader::open(path)
        .map_err(|e| PdfImgError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| PdfImgError::io(path, e))?
        .decode()
        .map_err(|e| PdfImgError::image(path, e))
}

/// Read `(width, height)` in pixels from the image header only.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32), PdfImgError> {
    ImageReader::open(path)
        .map_err(|e| PdfImgError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| PdfImgError::io(path, e))?
        .into_dimensions()
        .map_err(|e| PdfImgError::image(path, e))
}

/// Target size after scaling `(width, height)` by `ratio`.
///
/// The height follows the width's actual scale so the aspect ratio holds
/// after truncation. Neither edge drops below one pixel.
pub fn scaled_dimensions(width: u32, height: u32, ratio: f32) -> (u32, u32) {
    // Undo f32 representation error so 0.9 behaves like 0.9, not 0.8999999.
    let ratio = (ratio as f64 * 1e6).round() / 1e6;
    let new_width = ((width as f64 * ratio) as u32).max(1);
    let new_height = (height as u64 * new_width as u64 / width.max(1) as u64) as u32;
    (new_width, new_height.max(1))
}

/// Resample with Lanczos3 by `ratio`, keeping the aspect ratio.
pub fn resample(img: &DynamicImage, ratio: f32) -> DynamicImage {
    let (w, h) = scaled_dimensions(img.width(), img.height(), ratio);
    if (w, h) == (img.width(), img.height()) {
        return img.clone();
    }
    img.resize_exact(w, h, FilterType::Lanczos3)
}

/// Encode `img` as `kind`. `quality` only affects JPEG.
pub fn encode_image(
    img: &DynamicImage,
    kind: ImageKind,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match kind {
        ImageKind::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
        }
        ImageKind::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Best,
                PngFilter::Adaptive,
            );
            img.write_with_encoder(encoder)?;
        }
        ImageKind::Tiff => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Tiff)?,
        ImageKind::Bmp => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Bmp)?;
        }
    }
    Ok(buf)
}

/// Write a page as an RGB JPEG at `quality`.
pub fn save_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> Result<u64, PdfImgError> {
    let bytes = encode_image(img, ImageKind::Jpeg, quality).map_err(|e| PdfImgError::image(path, e))?;
    write_atomic(path, &bytes)?;
    Ok(bytes.len() as u64)
}

/// One compression step for a single file: resample by `ratio`, re-encode
/// in the file's own format at `quality`, replace the file.
///
/// Returns the new size in bytes.
pub fn recompress_in_place(path: &Path, ratio: f32, quality: u8) -> Result<u64, PdfImgError> {
    let kind = ImageKind::from_path(path).ok_or_else(|| PdfImgError::UnsupportedImage {
        path: path.to_path_buf(),
    })?;
    let img = load_image(path)?;
    let resized = resample(&img, ratio);
    let bytes = encode_image(&resized, kind, quality).map_err(|e| PdfImgError::image(path, e))?;
    write_atomic(path, &bytes)?;
    debug!(
        "Recompressed {} → {}x{} q{} ({} bytes)",
        path.display(),
        resized.width(),
        resized.height(),
        quality,
        bytes.len()
    );
    Ok(bytes.len() as u64)
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PdfImgError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, bytes).map_err(|e| PdfImgError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| PdfImgError::io(path, e))
}
