//! Request and result types.

use crate::error::{ConvertError, ErrorCode};
use crate::format;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Characters kept verbatim in on-disk filenames. Letters and digits in any
/// script survive so Hangul names stay readable.
static UNSAFE_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\p{L}\p{N}\p{M} ._()\-+\[\]]").expect("static regex is valid")
});

/// One upload, as received.
///
/// The client's filename is kept as sent (minus any directory part) and is
/// echoed back in responses. [`sanitize_filename`] is applied only where the
/// name becomes a path inside a workspace.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    filename: String,
    content: Vec<u8>,
    content_type: Option<String>,
    extension: Option<String>,
}

impl ConversionRequest {
    /// Wrap an upload. Only the final component of `filename` is kept; a
    /// missing or empty name becomes `document`.
    pub fn new(filename: Option<&str>, content: Vec<u8>, content_type: Option<&str>) -> Self {
        let filename = last_component(filename.unwrap_or(""));
        let extension = format::extension(&filename);
        Self {
            filename,
            content,
            content_type: content_type.map(str::to_string),
            extension,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Lower-cased extension, if the filename has one.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Name the upload is stored under inside a workspace.
    pub fn stored_filename(&self) -> String {
        sanitize_filename(&self.filename)
    }

    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}

/// Whatever follows the last separator; clients send both kinds.
fn last_component(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if last.is_empty() {
        "document".to_string()
    } else {
        last.to_string()
    }
}

/// Reduce a client-supplied filename to something safe to create on disk.
pub fn sanitize_filename(raw: &str) -> String {
    let last = last_component(raw);
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(&last, "_");
    let cleaned = cleaned.trim_start_matches(['.', '-']);
    if cleaned.is_empty() || Path::new(cleaned).file_stem().is_none() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

/// A finished `/convert` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDocument {
    /// `<stem>.pdf` when converted, the uploaded name otherwise.
    pub filename: String,
    pub content: Vec<u8>,
    /// `false` for pass-through inputs.
    pub converted: bool,
    /// MIME type of `content`.
    pub mime_type: &'static str,
}

impl ConvertedDocument {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// One rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed.
    pub page: usize,
    pub content: Vec<u8>,
}

/// All pages of a rendered document, in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImages {
    pub pages: Vec<PageImage>,
    pub mime_type: &'static str,
}

impl PageImages {
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }
}

/// Failure half of a [`ConversionOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&ConvertError> for ConversionFailure {
    fn from(err: &ConvertError) -> Self {
        Self {
            code: err.code(),
            message: err.public_message(),
        }
    }
}

/// Result of one orchestration: exactly one variant, never partially filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome<T = ConvertedDocument> {
    Success(T),
    Failure(ConversionFailure),
}

impl<T> ConversionOutcome<T> {
    /// `ErrorCode::Success` for successes.
    pub fn code(&self) -> ErrorCode {
        match self {
            ConversionOutcome::Success(_) => ErrorCode::Success,
            ConversionOutcome::Failure(f) => f.code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<T, ConversionFailure> {
        match self {
            ConversionOutcome::Success(v) => Ok(v),
            ConversionOutcome::Failure(f) => Err(f),
        }
    }
}

impl<T> From<Result<T, ConvertError>> for ConversionOutcome<T> {
    fn from(result: Result<T, ConvertError>) -> Self {
        match result {
            Ok(v) => ConversionOutcome::Success(v),
            Err(e) => ConversionOutcome::Failure(ConversionFailure::from(&e)),
        }
    }
}
