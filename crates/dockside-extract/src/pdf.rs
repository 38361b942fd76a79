//! PDF page-image extraction.
//!
//! OCR consumes images, so a PDF is reduced to one raster image per page
//! before recognition. Embedded page rasters are pulled with `lopdf`:
//! JPEG (`DCTDecode`) and JPEG 2000 (`JPXDecode`) streams pass through
//! unchanged, `FlateDecode` streams are decompressed and re-encoded as
//! PNG. Pages carrying several images contribute their largest one, which
//! for scanned documents is the full-page raster.

use dockside_core::ExtractError;
use flate2::read::ZlibDecoder;
use lopdf::Document;
use std::io::Read;
use tracing::{debug, warn};

/// Upper bound on total image bytes pulled from one document.
const MAX_TOTAL_BYTES: usize = 50 * 1024 * 1024;
/// Images smaller than this on either axis are decoration, not pages.
const MIN_DIMENSION: i64 = 50;

/// One page's raster image.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Page number, 1-based.
    pub page: u32,
    /// Encoded image bytes (JPEG, PNG, or JPEG 2000).
    pub data: Vec<u8>,
}

/// Extract one raster image per page from a PDF.
///
/// Pages without a usable raster are skipped; the page count is returned
/// alongside so callers can report the gap.
pub fn page_images(bytes: &[u8]) -> Result<(Vec<PageImage>, u32), ExtractError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| ExtractError::Parse(format!("pdf load failed: {e}")))?;

    let pages = doc.get_pages();
    let page_count = pages.len() as u32;
    let mut images = Vec::new();
    let mut total_bytes = 0usize;

    for (page_num, page_id) in pages {
        if total_bytes >= MAX_TOTAL_BYTES {
            warn!(page = page_num, "image byte limit reached, stopping");
            break;
        }

        let page_images = match doc.get_page_images(page_id) {
            Ok(list) => list,
            Err(e) => {
                debug!(page = page_num, error = %e, "no images on page");
                continue;
            }
        };

        // The full-page raster is the largest image on the page.
        let best = page_images
            .iter()
            .filter(|img| img.width >= MIN_DIMENSION && img.height >= MIN_DIMENSION)
            .max_by_key(|img| img.width * img.height);

        if let Some(pdf_image) = best {
            if let Some(data) = decode_pdf_image(pdf_image) {
                total_bytes += data.len();
                images.push(PageImage {
                    page: page_num,
                    data,
                });
            }
        }
    }

    debug!(
        pages = page_count,
        rasters = images.len(),
        bytes = total_bytes,
        "extracted page images"
    );
    Ok((images, page_count))
}

/// Decode one PDF image stream to encoded bytes OCR can consume.
fn decode_pdf_image(pdf_image: &lopdf::xobject::PdfImage) -> Option<Vec<u8>> {
    let filters = pdf_image.filters.as_ref()?;

    if filters.iter().any(|f| f == "DCTDecode") {
        // JPEG, usable as-is.
        return Some(pdf_image.content.to_vec());
    }
    if filters.iter().any(|f| f == "JPXDecode") {
        // JPEG 2000, usable as-is.
        return Some(pdf_image.content.to_vec());
    }
    if filters.iter().any(|f| f == "FlateDecode") {
        return match decode_flate_image(pdf_image) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!(error = %e, "failed to decode FlateDecode image");
                None
            }
        };
    }

    debug!(?filters, "unsupported image filter");
    None
}

/// Decompress a `FlateDecode` stream and re-encode it as PNG.
fn decode_flate_image(pdf_image: &lopdf::xobject::PdfImage) -> Result<Vec<u8>, String> {
    let mut decoder = ZlibDecoder::new(pdf_image.content);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| format!("decompression failed: {e}"))?;

    let color_space = pdf_image.color_space.as_deref().unwrap_or("DeviceRGB");
    let width = pdf_image.width as u32;
    let height = pdf_image.height as u32;

    let img = match color_space {
        "DeviceRGB" | "RGB" => image::RgbImage::from_raw(width, height, decompressed)
            .map(image::DynamicImage::ImageRgb8),
        "DeviceGray" | "Gray" => image::GrayImage::from_raw(width, height, decompressed)
            .map(image::DynamicImage::ImageLuma8),
        "DeviceCMYK" | "CMYK" => {
            let rgb = cmyk_to_rgb(&decompressed);
            image::RgbImage::from_raw(width, height, rgb).map(image::DynamicImage::ImageRgb8)
        }
        other => {
            debug!(color_space = other, "unknown color space, attempting RGB");
            image::RgbImage::from_raw(width, height, decompressed)
                .map(image::DynamicImage::ImageRgb8)
        }
    }
    .ok_or_else(|| "raw data does not match image dimensions".to_string())?;

    let mut png = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut png),
        image::ImageFormat::Png,
    )
    .map_err(|e| format!("png encoding failed: {e}"))?;
    Ok(png)
}

/// Convert packed CMYK bytes to RGB.
fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((cmyk.len() / 4) * 3);
    for chunk in cmyk.chunks_exact(4) {
        let c = f32::from(chunk[0]) / 255.0;
        let m = f32::from(chunk[1]) / 255.0;
        let y = f32::from(chunk[2]) / 255.0;
        let k = f32::from(chunk[3]) / 255.0;

        rgb.push((255.0 * (1.0 - c) * (1.0 - k)) as u8);
        rgb.push((255.0 * (1.0 - m) * (1.0 - k)) as u8);
        rgb.push((255.0 * (1.0 - y) * (1.0 - k)) as u8);
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pdf_is_parse_error() {
        let err = page_images(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));
    }

    #[test]
    fn test_cmyk_conversion_black() {
        // Full K channel is black regardless of CMY.
        let rgb = cmyk_to_rgb(&[0, 0, 0, 255]);
        assert_eq!(rgb, vec![0, 0, 0]);
    }

    #[test]
    fn test_cmyk_conversion_white() {
        let rgb = cmyk_to_rgb(&[0, 0, 0, 0]);
        assert_eq!(rgb, vec![255, 255, 255]);
    }

    #[test]
    fn test_cmyk_ignores_trailing_partial_pixel() {
        let rgb = cmyk_to_rgb(&[0, 0, 0, 0, 9, 9]);
        assert_eq!(rgb.len(), 3);
    }
}
