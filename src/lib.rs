//! # parsekit-converter
//!
//! Turn uploaded office, Hangul and OpenDocument files into PDF, and PDFs
//! into page images, by driving headless LibreOffice and Poppler's
//! `pdftoppm` as subprocesses.
//!
//! ## Why subprocesses?
//!
//! No Rust library renders `.docx`, `.pptx` or `.hwp` with LibreOffice's
//! fidelity. The engines are treated as untrusted, slow and crash-prone:
//! every call runs in its own scratch directory, in its own process group,
//! under a hard deadline, and every failure maps onto one stable numeric
//! code that API clients switch on.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Classify   empty? pass-through (PDF, image)? convertible? else 102
//!  ├─ 2. Workspace  input/ output/ profile/ pages/ under a temp root
//!  ├─ 3. Document   libreoffice --headless --convert-to pdf   (deadline)
//!  ├─ 4. Render     pdftoppm -png|-jpeg|-tiff -r <dpi>         (deadline)
//!  └─ 5. Respond    {code, message, data} envelope, raw stream or NDJSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parsekit_converter::{ConversionRequest, Converter, ConverterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConverterConfig::builder().build()?);
//!     let bytes = std::fs::read("report.docx")?;
//!     let request = ConversionRequest::new(Some("report.docx"), bytes, None);
//!     match converter.convert(request).await.into_result() {
//!         Ok(doc) => std::fs::write(&doc.filename, &doc.content)?,
//!         Err(failure) => eprintln!("[{}] {}", failure.code, failure.message),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum router in [`http`] |
//! | `cli`    | on      | The `parsekit-converter` binary (clap + anyhow + tracing-subscriber) |
//!
//! Library-only users can drop both:
//! ```toml
//! parsekit-converter = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod format;
#[cfg(feature = "server")]
pub mod http;
pub mod output;
pub mod pipeline;
pub mod runner;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder, ImageFormat, ImageOptions};
pub use convert::Converter;
pub use error::{ConvertError, EngineError, ErrorCode};
pub use format::{classify, supported_formats, FormatClass, SupportedFormats};
pub use output::{
    ConversionFailure, ConversionOutcome, ConversionRequest, ConvertedDocument, PageImage, PageImages,
};
pub use runner::{EngineInvocation, EngineOutput, InvocationState};
pub use workspace::{spawn_sweeper, sweep_orphans, Workspace};
