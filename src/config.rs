//! Configuration for the conversion service.
//!
//! Every knob lives in [`ConverterConfig`], built via
//! [`ConverterConfigBuilder`]. The engines are configured by program name
//! or path, which is also how tests substitute fake engines that hang, fail,
//! or produce nothing.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::Converter`].
///
/// # Example
/// ```rust
/// use parsekit_converter::ConverterConfig;
/// use std::time::Duration;
///
/// let config = ConverterConfig::builder()
///     .office_program("soffice")
///     .document_timeout(Duration::from_secs(60))
///     .max_concurrent_conversions(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.document_timeout, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Document engine executable, bare name or path. Default: `libreoffice`.
    pub office_program: String,

    /// Page renderer executable. Default: `pdftoppm`.
    pub renderer_program: String,

    /// Hard deadline for one document-engine run. Default: 120 s.
    pub document_timeout: Duration,

    /// Hard deadline for rendering all pages of one PDF. Default: 120 s.
    pub image_timeout: Duration,

    /// Engine runs allowed at once across all requests. Default: 4.
    ///
    /// Each LibreOffice instance costs a few hundred MB of RAM plus its
    /// workspace on disk. Pass-through requests do not count against it.
    pub max_concurrent_conversions: usize,

    /// Parent directory of per-request workspaces. Default: the OS temp dir.
    pub workspace_root: PathBuf,

    /// Name prefix of workspace directories; the orphan sweep only touches
    /// entries carrying it. Default: `parsekit-`.
    pub workspace_prefix: String,

    /// Workspaces older than this are treated as orphans. Default: 1 h.
    pub orphan_max_age: Duration,

    /// How often the orphan sweep runs. Default: 10 min.
    pub sweep_interval: Duration,

    /// Largest accepted upload in bytes. Default: 100 MiB.
    pub max_upload_bytes: usize,

    /// Default rendering resolution for page images. Default: 150.
    pub default_dpi: u32,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            office_program: "libreoffice".to_string(),
            renderer_program: "pdftoppm".to_string(),
            document_timeout: Duration::from_secs(120),
            image_timeout: Duration::from_secs(120),
            max_concurrent_conversions: 4,
            workspace_root: std::env::temp_dir(),
            workspace_prefix: "parsekit-".to_string(),
            orphan_max_age: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            max_upload_bytes: 100 * 1024 * 1024,
            default_dpi: 150,
        }
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn office_program(mut self, program: impl Into<String>) -> Self {
        self.config.office_program = program.into();
        self
    }

    pub fn renderer_program(mut self, program: impl Into<String>) -> Self {
        self.config.renderer_program = program.into();
        self
    }

    pub fn document_timeout(mut self, timeout: Duration) -> Self {
        self.config.document_timeout = timeout;
        self
    }

    pub fn image_timeout(mut self, timeout: Duration) -> Self {
        self.config.image_timeout = timeout;
        self
    }

    pub fn max_concurrent_conversions(mut self, n: usize) -> Self {
        self.config.max_concurrent_conversions = n;
        self
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = root.into();
        self
    }

    pub fn workspace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.workspace_prefix = prefix.into();
        self
    }

    pub fn orphan_max_age(mut self, age: Duration) -> Self {
        self.config.orphan_max_age = age;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.config.default_dpi = ImageOptions::clamp_dpi(dpi);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        if c.office_program.trim().is_empty() || c.renderer_program.trim().is_empty() {
            return Err(invalid("engine program names must not be empty"));
        }
        if c.document_timeout.is_zero() || c.image_timeout.is_zero() {
            return Err(invalid("engine timeouts must be > 0"));
        }
        if c.max_concurrent_conversions == 0 {
            return Err(invalid("max_concurrent_conversions must be ≥ 1"));
        }
        if c.workspace_prefix.is_empty() {
            return Err(invalid("workspace_prefix must not be empty"));
        }
        let longest = c.document_timeout + c.image_timeout;
        if c.orphan_max_age <= longest {
            return Err(invalid(format!(
                "orphan_max_age ({}s) must exceed the longest engine run ({}s)",
                c.orphan_max_age.as_secs(),
                longest.as_secs()
            )));
        }
        if c.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval must be > 0"));
        }
        if c.max_upload_bytes == 0 {
            return Err(invalid("max_upload_bytes must be > 0"));
        }
        Ok(self.config)
    }
}

fn invalid(msg: impl Into<String>) -> ConvertError {
    ConvertError::InvalidConfig(msg.into())
}

// ── Image options ────────────────────────────────────────────────────────

/// Raster format for rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Tiff,
    Webp,
}

impl ImageFormat {
    /// Parse a user-supplied name (`png`, `jpg`, `jpeg`, `tiff`, `webp`).
    pub fn parse(name: &str) -> Option<ImageFormat> {
        match name.trim().to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "tif" | "tiff" => Some(ImageFormat::Tiff),
            "webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    /// File extension pdftoppm writes for this format (WebP is rendered as PNG).
    pub fn rendered_extension(self) -> &'static str {
        match self {
            ImageFormat::Png | ImageFormat::Webp => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Tiff => "tif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Options for rendering a document's pages as images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    pub format: ImageFormat,
    /// Rendering DPI. Range: 72–400.
    pub dpi: u32,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            dpi: 150,
        }
    }
}

impl ImageOptions {
    pub const MIN_DPI: u32 = 72;
    pub const MAX_DPI: u32 = 400;

    /// Build options from raw query values, clamping the DPI.
    pub fn from_query(format: Option<&str>, dpi: Option<u32>, default_dpi: u32) -> Result<Self, ConvertError> {
        let format = match format {
            None => ImageFormat::Png,
            Some(name) => ImageFormat::parse(name).ok_or_else(|| {
                ConvertError::InvalidRequest(format!(
                    "unsupported image format '{name}' (expected png, jpg, jpeg, tiff or webp)"
                ))
            })?,
        };
        Ok(Self {
            format,
            dpi: Self::clamp_dpi(dpi.unwrap_or(default_dpi)),
        })
    }

    pub fn clamp_dpi(dpi: u32) -> u32 {
        dpi.clamp(Self::MIN_DPI, Self::MAX_DPI)
    }
}
