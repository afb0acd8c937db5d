//! In-process image work: WebP transcoding and base64 wrapping.
//!
//! pdftoppm has no WebP writer, so WebP pages are rendered as PNG and
//! re-encoded here. The `image` crate's WebP encoder is lossless, which keeps
//! rendered text crisp at the cost of larger files than a lossy encoder would
//! produce.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use tracing::debug;

/// Base64 (standard alphabet, padded) for JSON payloads.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Re-encode a PNG page as WebP.
pub fn png_to_webp(png: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory_with_format(png, image::ImageFormat::Png)?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::WebP)?;
    debug!("Transcoded page {} bytes PNG → {} bytes WebP", png.len(), buf.len());
    Ok(buf)
}
