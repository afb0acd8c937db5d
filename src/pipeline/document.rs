//! Document conversion: office / Hangul / OpenDocument → PDF via LibreOffice.
//!
//! LibreOffice refuses to run two instances against one user profile; the
//! second silently hands its job to the first or exits. Each request passes
//! its own `profile/` directory through `-env:UserInstallation`, which makes
//! concurrent conversions independent.
//!
//! On success LibreOffice writes `<input stem>.pdf` into `--outdir`. A zero
//! exit without that file (unreadable input, filter crash) is a distinct
//! failure from a non-zero exit.

use crate::config::ConverterConfig;
use crate::error::{display_name, ConvertError};
use crate::output::ConversionRequest;
use crate::runner::EngineInvocation;
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Build the LibreOffice command for `input` inside `workspace`.
pub fn office_invocation(config: &ConverterConfig, workspace: &Workspace, input: &Path) -> EngineInvocation {
    EngineInvocation::new(&config.office_program, workspace.path(), config.document_timeout)
        .args(["--headless", "--norestore", "--nologo", "--nolockcheck"])
        .arg(format!("-env:UserInstallation={}", file_url(&workspace.profile_dir())))
        .args(["--convert-to", "pdf", "--outdir"])
        .arg(workspace.output_dir())
        .arg(input)
}

/// Where LibreOffice will write the PDF for `request`: the stem of the
/// stored (sanitised) input, not of the client's name.
pub fn expected_output(workspace: &Workspace, request: &ConversionRequest) -> PathBuf {
    let stored = request.stored_filename();
    let stem = Path::new(&stored)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    workspace.output_dir().join(format!("{stem}.pdf"))
}

/// Run LibreOffice on `request` and return the path of the produced PDF.
///
/// A zero exit without a non-empty `<stem>.pdf` is reported as
/// [`ConvertError::OutputNotFound`].
pub async fn convert_in_workspace(
    config: &ConverterConfig,
    workspace: &Workspace,
    request: &ConversionRequest,
) -> Result<PathBuf, ConvertError> {
    let input = workspace
        .write_input(request.filename(), request.content())
        .await
        .map_err(|e| ConvertError::workspace("write upload", e))?;

    let mut invocation = office_invocation(config, workspace, &input);
    invocation.run().await.map_err(ConvertError::DocumentEngine)?;

    let pdf_path = expected_output(workspace, request);
    match tokio::fs::metadata(&pdf_path).await {
        // A zero-byte PDF is as useless as a missing one.
        Ok(meta) if meta.is_file() && meta.len() > 0 => {}
        Ok(_) => return Err(missing_output(&pdf_path, &invocation)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(missing_output(&pdf_path, &invocation))
        }
        Err(e) => return Err(ConvertError::workspace("stat converted PDF", e)),
    }

    info!(
        "LibreOffice converted {} ({}ms)",
        request.filename(),
        invocation.elapsed().as_millis()
    );
    Ok(pdf_path)
}

/// Convert `request` to PDF and return the PDF bytes.
///
/// The bytes are read out of the workspace before returning; the caller is
/// free to release it immediately afterwards.
pub async fn convert_document(
    config: &ConverterConfig,
    workspace: &Workspace,
    request: &ConversionRequest,
) -> Result<Vec<u8>, ConvertError> {
    let pdf_path = convert_in_workspace(config, workspace, request).await?;
    tokio::fs::read(&pdf_path)
        .await
        .map_err(|e| ConvertError::workspace("read converted PDF", e))
}

fn missing_output(pdf_path: &Path, invocation: &EngineInvocation) -> ConvertError {
    debug!("LibreOffice exited cleanly without output; stderr: {}", invocation.stderr_tail());
    ConvertError::OutputNotFound {
        expected: display_name(pdf_path),
    }
}

/// `file://` URL for a local directory, percent-encoding anything outside
/// the unreserved set so paths with spaces or non-ASCII names survive.
pub fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut url = String::from("file://");
    if !raw.starts_with('/') {
        url.push('/');
    }
    for byte in raw.replace('\\', "/").bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' | b':' => {
                url.push(byte as char)
            }
            other => url.push_str(&format!("%{other:02X}")),
        }
    }
    url
}
