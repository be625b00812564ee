//! Image encoding: rendered page → PNG bytes → base64 `ImageData`.
//!
//! PNG is lossless; JPEG artefacts around pen strokes make handwriting harder
//! for vision models to read, and form pages compress well as PNG anyway.

use crate::pipeline::render::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap a page's PNG as a base64 image attachment for the provider request.
///
/// `detail: "high"` lets tiling models look at the full-resolution page;
/// the low-detail overview loses small handwriting.
pub fn to_image_data(page: &PageImage) -> ImageData {
    let b64 = STANDARD.encode(&page.png);
    debug!("Page {}: encoded image → {} bytes base64", page.page_num, b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
