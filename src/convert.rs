//! Conversion orchestrator: classify, then run the engines in a workspace.
//!
//! ## Request lifecycle
//!
//! ```text
//! Start → Classified ─┬─▶ Done                                  (pass-through)
//!                     └─▶ WorkspaceReady → DocumentConverting
//!                           → DocumentConverted → [ImageRendering → ImageRendered] → Done
//! any state ──▶ Failed(code)
//! ```
//!
//! Every failure is terminal and carries exactly one [`ErrorCode`]. The
//! public methods never return `Err`; they return a [`ConversionOutcome`]
//! that is either a full result or a failure, never both.
//!
//! Engine paths hold a semaphore permit for their whole duration, which caps
//! how many LibreOffice / pdftoppm processes run at once. Pass-through paths
//! touch no engine and skip the semaphore.

use crate::config::{ConverterConfig, ImageOptions};
use crate::error::{ConvertError, ErrorCode};
use crate::format::{self, FormatClass};
use crate::output::{
    ConversionFailure, ConversionOutcome, ConversionRequest, ConvertedDocument, PageImage, PageImages,
};
use crate::pipeline::{document, render};
use crate::workspace::Workspace;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

/// Shared entry point for all conversions. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Converter {
    config: Arc<ConverterConfig>,
    permits: Arc<Semaphore>,
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_conversions));
        Self {
            config: Arc::new(config),
            permits,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Permits currently free; equals `max_concurrent_conversions` when idle.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Convert an upload to PDF, or hand pass-through files back unchanged.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionOutcome {
        let filename = request.filename().to_string();
        guarded(&filename, self.convert_inner(request)).await
    }

    /// Render every page of an upload as images.
    ///
    /// Convertible documents go through LibreOffice first; PDFs are rendered
    /// directly; image uploads come back unchanged as a single page.
    pub async fn convert_to_images(
        &self,
        request: ConversionRequest,
        options: ImageOptions,
    ) -> ConversionOutcome<PageImages> {
        let filename = request.filename().to_string();
        guarded(&filename, self.images_inner(request, options)).await
    }

    async fn convert_inner(&self, request: ConversionRequest) -> Result<ConvertedDocument, ConvertError> {
        let started = Instant::now();
        let class = classify(&request)?;

        if class.is_pass_through() {
            info!("Pass-through {} ({} bytes)", request.filename(), request.content().len());
            let filename = request.filename().to_string();
            let mime_type = format::pass_through_mime(&filename, request.content_type(), class);
            return Ok(ConvertedDocument {
                filename,
                content: request.into_content(),
                converted: false,
                mime_type,
            });
        }

        let _permit = self.acquire_permit().await?;
        let workspace = self.workspace()?;
        debug!("State: WorkspaceReady → DocumentConverting ({})", request.filename());
        let pdf = document::convert_document(&self.config, &workspace, &request).await?;
        release(workspace);

        info!(
            "Converted {} in {}ms",
            request.filename(),
            started.elapsed().as_millis()
        );
        Ok(ConvertedDocument {
            filename: format!("{}.pdf", request.stem()),
            content: pdf,
            converted: true,
            mime_type: "application/pdf",
        })
    }

    async fn images_inner(
        &self,
        request: ConversionRequest,
        options: ImageOptions,
    ) -> Result<PageImages, ConvertError> {
        let started = Instant::now();
        let class = classify(&request)?;

        if class == FormatClass::PassThroughImage {
            info!("Image upload {} returned as a single page", request.filename());
            let mime_type = format::pass_through_mime(request.filename(), request.content_type(), class);
            return Ok(PageImages {
                pages: vec![PageImage {
                    page: 1,
                    content: request.into_content(),
                }],
                mime_type,
            });
        }

        let _permit = self.acquire_permit().await?;
        let workspace = self.workspace()?;

        let pdf_path = match class {
            FormatClass::ConvertibleDocument => {
                debug!("State: WorkspaceReady → DocumentConverting ({})", request.filename());
                document::convert_in_workspace(&self.config, &workspace, &request).await?
            }
            _ => workspace
                .write_input(request.filename(), request.content())
                .await
                .map_err(|e| ConvertError::workspace("write upload", e))?,
        };

        debug!("State: DocumentConverted → ImageRendering ({})", request.filename());
        let images = render::render_pages(&self.config, &workspace, &pdf_path, options).await?;
        release(workspace);

        info!(
            "Rendered {} as {} page(s) in {}ms",
            request.filename(),
            images.total_pages(),
            started.elapsed().as_millis()
        );
        Ok(images)
    }

    async fn acquire_permit(&self) -> Result<SemaphorePermit<'_>, ConvertError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ConvertError::Internal("conversion semaphore closed".to_string()))
    }

    fn workspace(&self) -> Result<Workspace, ConvertError> {
        Workspace::acquire(&self.config.workspace_root, &self.config.workspace_prefix)
            .map_err(|e| ConvertError::workspace("create workspace", e))
    }
}

fn classify(request: &ConversionRequest) -> Result<FormatClass, ConvertError> {
    if request.content().is_empty() {
        return Err(ConvertError::EmptyFile);
    }
    let class = format::classify(request.filename(), request.content_type())?;
    debug!("State: Start → Classified ({} as {:?})", request.filename(), class);
    Ok(class)
}

/// Removal failures are logged by the workspace; the result is already in
/// memory and the sweeper will retry the directory.
fn release(workspace: Workspace) {
    let _ = workspace.release();
}

/// Run one orchestration, turning errors and panics into a failure outcome.
async fn guarded<T, F>(filename: &str, fut: F) -> ConversionOutcome<T>
where
    F: Future<Output = Result<T, ConvertError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => ConversionOutcome::Success(value),
        Ok(Err(err)) => {
            log_failure(filename, &err);
            ConversionOutcome::from(Err(err))
        }
        Err(panic) => {
            error!("Conversion of {} panicked: {}", filename, panic_message(&*panic));
            ConversionOutcome::Failure(ConversionFailure {
                code: ErrorCode::InternalError,
                message: "Internal server error".to_string(),
            })
        }
    }
}

fn log_failure(filename: &str, err: &ConvertError) {
    let code = err.code();
    match code.as_u16() {
        100..=199 => info!("Rejected {}: [{}] {}", filename, code, err),
        200..=399 => warn!("Conversion of {} failed: [{}] {}", filename, code, err),
        _ => error!("Conversion of {} failed: [{}] {:?}", filename, code, err),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
