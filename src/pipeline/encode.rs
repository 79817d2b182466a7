//! Image encoding: extracted region → base64 `ImageData` for the model.
//!
//! Regions are extracted as PNG (lossless keeps small text in charts and
//! tables legible). `detail: "high"` asks GPT-4-class models for the full
//! tile budget instead of a single low-resolution overview.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a cropped region as PNG bytes.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap PNG bytes as a base64 image attachment.
pub fn encode_png(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded region image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
