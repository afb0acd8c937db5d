//! Format classification: decide what to do with an upload from its name.
//!
//! Classification is pure and case-insensitive. The extension decides first;
//! the declared content type is only consulted when the extension is missing
//! or unknown, and only for the two pass-through families (`application/pdf`,
//! `image/*`). Anything else is rejected instead of being handed to an engine
//! on the off chance it can read it.

use crate::error::ConvertError;
use serde::Serialize;
use std::path::Path;

/// Office, Hangul and OpenDocument formats converted by the document engine.
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &[
    // Microsoft Office
    "doc", "docx", "ppt", "pptx", "xls", "xlsx",
    // Hangul (HWP)
    "hwp", "hwpx",
    // OpenDocument
    "odt", "odp", "ods",
];

/// Returned unchanged by `/convert`.
pub const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// Returned unchanged by every endpoint.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp"];

/// What the orchestrator should do with an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    /// Already a PDF.
    PassThroughDocument,
    /// A raster image.
    PassThroughImage,
    /// Needs the document engine.
    ConvertibleDocument,
}

impl FormatClass {
    pub fn is_pass_through(self) -> bool {
        !matches!(self, FormatClass::ConvertibleDocument)
    }
}

/// Lower-cased extension of `filename`, without the dot.
pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Classify by extension only. `None` when the extension is not allow-listed.
pub fn classify_extension(ext: &str) -> Option<FormatClass> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    if PDF_EXTENSIONS.contains(&ext.as_str()) {
        Some(FormatClass::PassThroughDocument)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FormatClass::PassThroughImage)
    } else if CONVERTIBLE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FormatClass::ConvertibleDocument)
    } else {
        None
    }
}

/// Classify an upload by filename, falling back to its declared content type.
pub fn classify(filename: &str, content_type: Option<&str>) -> Result<FormatClass, ConvertError> {
    if let Some(class) = extension(filename).as_deref().and_then(classify_extension) {
        return Ok(class);
    }

    let mime = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    if mime == "application/pdf" {
        Ok(FormatClass::PassThroughDocument)
    } else if mime.starts_with("image/") {
        Ok(FormatClass::PassThroughImage)
    } else {
        Err(ConvertError::UnsupportedFormat {
            filename: filename.to_string(),
        })
    }
}

/// MIME type used when returning a pass-through file as raw bytes.
pub fn mime_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// MIME type of a pass-through upload: from the extension when it is known,
/// otherwise from the declared content type the upload was classified by.
pub fn pass_through_mime(filename: &str, content_type: Option<&str>, class: FormatClass) -> &'static str {
    if class == FormatClass::PassThroughDocument {
        return "application/pdf";
    }
    let by_name = mime_type(filename);
    if by_name != "application/octet-stream" {
        return by_name;
    }
    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    ["image/png", "image/jpeg", "image/gif", "image/bmp", "image/tiff", "image/webp"]
        .into_iter()
        .find(|m| *m == declared)
        .unwrap_or("application/octet-stream")
}

/// Extension lists published by `GET /supported-formats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportedFormats {
    /// Sorted, dotted extensions handled by the document engine.
    pub convertible: Vec<String>,
    /// Sorted, dotted extensions returned unchanged.
    pub passthrough: Vec<String>,
}

pub fn supported_formats() -> SupportedFormats {
    fn dotted<'a>(exts: impl Iterator<Item = &'a &'a str>) -> Vec<String> {
        let mut out: Vec<String> = exts.map(|e| format!(".{e}")).collect();
        out.sort();
        out
    }

    SupportedFormats {
        convertible: dotted(CONVERTIBLE_EXTENSIONS.iter()),
        passthrough: dotted(PDF_EXTENSIONS.iter().chain(IMAGE_EXTENSIONS.iter())),
    }
}
