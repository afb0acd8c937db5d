//! PDF rasterisation: render every page of a PDF via Poppler's `pdftoppm`.
//!
//! `pdftoppm -png -r 150 in.pdf pages/page` writes `pages/page-1.png`,
//! `pages/page-2.png`, … and zero-pads the number to the width of the page
//! count (`page-01.png` for a ten-page file). Pages are therefore ordered by
//! the parsed number, never by file name.
//!
//! ## Why spawn_blocking for WebP?
//!
//! Decoding and re-encoding a 300 DPI page is CPU-bound for tens of
//! milliseconds. It runs on the blocking pool so Tokio worker threads keep
//! serving other requests.

use crate::config::{ConverterConfig, ImageFormat, ImageOptions};
use crate::error::ConvertError;
use crate::output::{PageImage, PageImages};
use crate::pipeline::encode;
use crate::runner::EngineInvocation;
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Output prefix handed to pdftoppm inside `pages/`.
const PAGE_PREFIX: &str = "page";

/// Build the pdftoppm command for `pdf_path`.
pub fn renderer_invocation(
    config: &ConverterConfig,
    workspace: &Workspace,
    pdf_path: &Path,
    options: ImageOptions,
) -> EngineInvocation {
    let format_flag = match options.format {
        ImageFormat::Png | ImageFormat::Webp => "-png",
        ImageFormat::Jpeg => "-jpeg",
        ImageFormat::Tiff => "-tiff",
    };
    EngineInvocation::new(&config.renderer_program, workspace.path(), config.image_timeout)
        .arg(format_flag)
        .arg("-r")
        .arg(options.dpi.to_string())
        .arg(pdf_path)
        .arg(workspace.pages_dir().join(PAGE_PREFIX))
}

/// Render all pages of the PDF at `pdf_path` and return them in page order.
pub async fn render_pages(
    config: &ConverterConfig,
    workspace: &Workspace,
    pdf_path: &Path,
    options: ImageOptions,
) -> Result<PageImages, ConvertError> {
    let mut invocation = renderer_invocation(config, workspace, pdf_path, options);
    invocation.run().await.map_err(ConvertError::ImageEngine)?;

    let files = collect_pages(&workspace.pages_dir(), options.format.rendered_extension())
        .map_err(|e| ConvertError::workspace("list rendered pages", e))?;
    if files.is_empty() {
        warn!("pdftoppm produced no pages; stderr: {}", invocation.stderr_tail());
        return Err(ConvertError::ImageOutput("no pages were rendered".to_string()));
    }

    let mut pages = Vec::with_capacity(files.len());
    for (page, path) in files {
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| ConvertError::workspace("read rendered page", e))?;
        pages.push(PageImage { page, content });
    }

    if options.format == ImageFormat::Webp {
        pages = tokio::task::spawn_blocking(move || transcode_to_webp(pages))
            .await
            .map_err(|e| ConvertError::Internal(format!("WebP task panicked: {e}")))??;
    }

    info!(
        "Rendered {} page(s) as {:?} at {} DPI ({}ms)",
        pages.len(),
        options.format,
        options.dpi,
        invocation.elapsed().as_millis()
    );
    Ok(PageImages {
        pages,
        mime_type: options.format.mime_type(),
    })
}

fn transcode_to_webp(pages: Vec<PageImage>) -> Result<Vec<PageImage>, ConvertError> {
    pages
        .into_iter()
        .map(|p| {
            let content = encode::png_to_webp(&p.content)
                .map_err(|e| ConvertError::ImageOutput(format!("page {}: WebP encoding failed: {e}", p.page)))?;
            Ok(PageImage { page: p.page, content })
        })
        .collect()
}

/// Find `page-N.<ext>` files in `dir`, sorted by N.
fn collect_pages(dir: &Path, ext: &str) -> std::io::Result<Vec<(usize, PathBuf)>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match page_number(name, ext) {
            Some(n) => pages.push((n, path)),
            None => debug!("Ignoring unexpected file in pages/: {}", name),
        }
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages)
}

fn page_number(name: &str, ext: &str) -> Option<usize> {
    let rest = name.strip_prefix(PAGE_PREFIX)?.strip_prefix('-')?;
    let digits = rest.strip_suffix(ext)?.strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
