//! Error types and the wire-level error-code taxonomy.
//!
//! Three layers, outermost first:
//!
//! * [`ErrorCode`] — the closed, numeric taxonomy that appears on the wire.
//!   Codes are grouped by hundreds: 1xx input validation, 2xx document
//!   engine, 3xx image engine, 5xx system.
//!
//! * [`ConvertError`] — **fatal per request**: everything that can stop a
//!   conversion. [`ConvertError::code`] is the single, exhaustive mapping
//!   onto [`ErrorCode`]; adding a variant without extending the match is a
//!   compile error, so no fault can reach the HTTP layer unmapped.
//!
//! * [`EngineError`] — what the subprocess runner observed about one engine
//!   invocation. It does not know which engine it ran; the orchestrator
//!   wraps it in [`ConvertError::DocumentEngine`] or
//!   [`ConvertError::ImageEngine`], and that wrapper decides the code.

use serde::{Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Numeric error codes returned in the `code` field of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,

    // ── 1xx: input validation ─────────────────────────────────────────────
    EmptyFile = 101,
    UnsupportedFormat = 102,
    InvalidRequest = 103,

    // ── 2xx: document engine (LibreOffice) ────────────────────────────────
    ConversionFailed = 201,
    ConversionOutputNotFound = 202,
    ConversionTimeout = 203,
    LibreofficeNotFound = 204,

    // ── 3xx: image engine (Poppler) ───────────────────────────────────────
    ImageConversionFailed = 301,
    PopplerNotFound = 302,

    // ── 5xx: system ───────────────────────────────────────────────────────
    InternalError = 501,
}

impl ErrorCode {
    /// Every code, in ascending order.
    pub const ALL: [ErrorCode; 11] = [
        ErrorCode::Success,
        ErrorCode::EmptyFile,
        ErrorCode::UnsupportedFormat,
        ErrorCode::InvalidRequest,
        ErrorCode::ConversionFailed,
        ErrorCode::ConversionOutputNotFound,
        ErrorCode::ConversionTimeout,
        ErrorCode::LibreofficeNotFound,
        ErrorCode::ImageConversionFailed,
        ErrorCode::PopplerNotFound,
        ErrorCode::InternalError,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Upper-snake name, as used in logs and documentation.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::EmptyFile => "EMPTY_FILE",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ConversionFailed => "CONVERSION_FAILED",
            ErrorCode::ConversionOutputNotFound => "CONVERSION_OUTPUT_NOT_FOUND",
            ErrorCode::ConversionTimeout => "CONVERSION_TIMEOUT",
            ErrorCode::LibreofficeNotFound => "LIBREOFFICE_NOT_FOUND",
            ErrorCode::ImageConversionFailed => "IMAGE_CONVERSION_FAILED",
            ErrorCode::PopplerNotFound => "POPPLER_NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn from_u16(value: u16) -> Option<ErrorCode> {
        Self::ALL.into_iter().find(|c| c.as_u16() == value)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

/// Everything that can end a conversion request unsuccessfully.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded payload has zero bytes.
    #[error("Empty file uploaded")]
    EmptyFile,

    /// Neither the extension nor the declared content type is recognised.
    #[error("Unsupported file format: '{filename}'")]
    UnsupportedFormat { filename: String },

    /// Malformed upload or invalid options.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The document engine could not be run, failed, or timed out.
    #[error("LibreOffice {0}")]
    DocumentEngine(#[source] EngineError),

    /// The document engine exited 0 but left no PDF behind.
    #[error("Conversion completed but output file not found: {expected}")]
    OutputNotFound { expected: String },

    /// The image engine could not be run, failed, or timed out.
    #[error("PDF rendering {0}")]
    ImageEngine(#[source] EngineError),

    /// The image engine ran but its output is unusable.
    #[error("Failed to convert PDF to images: {0}")]
    ImageOutput(String),

    // ── System errors ─────────────────────────────────────────────────────
    /// Workspace directory could not be created or written.
    #[error("Workspace error: {context}: {source}")]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal fault (closed semaphore, panicked task, …).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Map this error onto the wire taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            ConvertError::EmptyFile => ErrorCode::EmptyFile,
            ConvertError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            ConvertError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ConvertError::DocumentEngine(e) => match e {
                EngineError::NotFound { .. } | EngineError::Spawn { .. } => {
                    ErrorCode::LibreofficeNotFound
                }
                EngineError::Failed { .. } | EngineError::Wait { .. } => {
                    ErrorCode::ConversionFailed
                }
                EngineError::TimedOut { .. } => ErrorCode::ConversionTimeout,
            },
            ConvertError::OutputNotFound { .. } => ErrorCode::ConversionOutputNotFound,
            ConvertError::ImageEngine(e) => match e {
                EngineError::NotFound { .. } | EngineError::Spawn { .. } => {
                    ErrorCode::PopplerNotFound
                }
                EngineError::Failed { .. }
                | EngineError::Wait { .. }
                | EngineError::TimedOut { .. } => ErrorCode::ImageConversionFailed,
            },
            ConvertError::ImageOutput(_) => ErrorCode::ImageConversionFailed,
            ConvertError::Workspace { .. }
            | ConvertError::InvalidConfig(_)
            | ConvertError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message suitable for the response envelope.
    ///
    /// System faults are reported generically; their detail goes to the log.
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::InternalError => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub(crate) fn workspace(context: impl Into<String>, source: std::io::Error) -> Self {
        ConvertError::Workspace {
            context: context.into(),
            source,
        }
    }
}

/// Failure of one external engine invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The executable could not be located.
    #[error("is not installed ('{program}' not found on PATH)")]
    NotFound { program: String },

    /// The executable exists but the OS refused to start it.
    #[error("could not be launched ('{program}'): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited non-zero or was killed by a signal.
    #[error("conversion failed (exit {}): {stderr_tail}", exit_label(*exit_code))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// The deadline elapsed; the process group was killed.
    #[error("conversion timed out after {}s", after.as_secs())]
    TimedOut { program: String, after: Duration },

    /// Waiting on the child failed at the OS level.
    #[error("wait failed for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// File name of an expected-but-missing output, for messages.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
