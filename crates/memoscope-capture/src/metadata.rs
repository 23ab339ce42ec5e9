//! WebP encode plus metadata embedding/extraction (`6`: "Metadata is a
//! single UTF-8 JSON object stored in the container's description/EXIF
//! field"). Encoding via the `webp` crate; container chunk read/write via
//! `img-parts`, the ecosystem-standard RIFF/JPEG/PNG metadata crate (no
//! pack example writes container metadata — `kamadak-exif` elsewhere in
//! the corpus is read-only — so this is a grounded ecosystem substitution,
//! documented in DESIGN.md).

use bytes::Bytes;
use img_parts::{ImageEXIF, ImageICC};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

pub const WEBP_QUALITY: f32 = 85.0;

/// Metadata embedded in every captured frame (`6`). Extended with
/// `is_thumbnail`/`ocr_result`/`<model>_result` keys after ingestion
/// processing — those live in the catalog's `entity_metadata` table, not
/// here; this struct models only what the Capture Loop itself writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub timestamp: String,
    pub active_app: String,
    pub active_window: String,
    pub screen_name: String,
    pub sequence: u64,
}

/// Encodes `image` as a lossy WebP at `WEBP_QUALITY` and embeds `metadata`
/// as a UTF-8 JSON blob in the container's EXIF chunk.
pub fn encode_with_metadata(image: &image::RgbImage, metadata: &CaptureMetadata) -> Result<Vec<u8>> {
    let encoder = webp::Encoder::from_rgb(image.as_raw(), image.width(), image.height());
    let webp_bytes = encoder.encode(WEBP_QUALITY);

    let mut container = img_parts::webp::WebP::from_bytes(Bytes::copy_from_slice(&webp_bytes))
        .map_err(|e| CaptureError::Capture(format!("failed to parse encoded webp container: {e}")))?;

    let json = serde_json::to_vec(metadata)?;
    container.set_exif(Some(Bytes::from(json)));

    Ok(container.encoder().bytes().to_vec())
}

/// Reads back the embedded metadata JSON from a WebP file's EXIF chunk.
pub fn read_metadata(bytes: &[u8]) -> Result<CaptureMetadata> {
    let container = img_parts::webp::WebP::from_bytes(Bytes::copy_from_slice(bytes))
        .map_err(|e| CaptureError::Capture(format!("failed to parse webp container: {e}")))?;
    let exif = container
        .exif()
        .ok_or_else(|| CaptureError::Capture("no embedded metadata chunk".to_string()))?;
    Ok(serde_json::from_slice(&exif)?)
}

/// Reads back raw embedded JSON without binding it to `CaptureMetadata`'s
/// fixed schema, used by the ingestion pipeline which must also read the
/// `is_thumbnail`/`ocr_result`/plugin keys added after capture time.
pub fn read_raw_metadata(bytes: &[u8]) -> Result<serde_json::Value> {
    let container = img_parts::webp::WebP::from_bytes(Bytes::copy_from_slice(bytes))
        .map_err(|e| CaptureError::Capture(format!("failed to parse webp container: {e}")))?;
    let exif = container
        .exif()
        .ok_or_else(|| CaptureError::Capture("no embedded metadata chunk".to_string()))?;
    Ok(serde_json::from_slice(&exif)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample_image() -> image::RgbImage {
        let mut img = image::RgbImage::new(16, 16);
        for p in img.pixels_mut() {
            *p = Rgb([128, 64, 32]);
        }
        img
    }

    #[test]
    fn roundtrip_preserves_metadata() {
        let metadata = CaptureMetadata {
            timestamp: "20260101-120000".to_string(),
            active_app: "Editor".to_string(),
            active_window: "main.rs".to_string(),
            screen_name: "main".to_string(),
            sequence: 7,
        };
        let bytes = encode_with_metadata(&sample_image(), &metadata).unwrap();
        let back = read_metadata(&bytes).unwrap();
        assert_eq!(back, metadata);
    }
}
