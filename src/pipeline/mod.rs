//! Engine-facing pipeline stages.
//!
//! Each submodule drives exactly one external step inside a request's
//! [`crate::workspace::Workspace`]. The orchestrator in [`crate::convert`]
//! sequences them and owns the workspace.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ document ──▶ render ──▶ encode
//!            (soffice)   (pdftoppm)  (WebP, base64)
//! ```
//!
//! 1. [`document`] — run headless LibreOffice and pick up `<stem>.pdf`
//! 2. [`render`]   — run `pdftoppm` over a PDF and collect pages in order
//! 3. [`encode`]   — in-process image transcoding and base64 wrapping

pub mod document;
pub mod encode;
pub mod render;
