//! HTTP surface for the converter.
//!
//! - `GET  /health`             liveness, independent of the engines
//! - `GET  /supported-formats`  extension allow-lists
//! - `POST /convert`            JSON envelope with base64 content
//! - `POST /convert/raw`        raw bytes streamed in 64 KiB chunks
//! - `POST /convert/images`     NDJSON, one line per rendered page
//!
//! Conversion failures are reported inside the `{code, message, data}`
//! envelope with HTTP 200; clients switch on `code`, not on the status. A
//! panic anywhere in a handler becomes the same envelope with code 501.

use crate::config::ImageOptions;
use crate::convert::{panic_message, Converter};
use crate::error::{ConvertError, ErrorCode};
use crate::format::{supported_formats, SupportedFormats};
use crate::output::{ConversionFailure, ConversionOutcome, ConversionRequest, ConvertedDocument, PageImages};
use crate::pipeline::encode;
use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::any::Any as PanicPayload;
use std::convert::Infallible;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Size of each chunk on `/convert/raw`.
pub const RAW_CHUNK_SIZE: usize = 64 * 1024;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// Build the application router around `converter`.
pub fn router(converter: Converter) -> Router {
    let body_limit = converter.config().max_upload_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/supported-formats", get(handle_supported_formats))
        .route("/convert", post(handle_convert))
        .route("/convert/raw", post(handle_convert_raw))
        .route("/convert/images", post(handle_convert_images))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(converter)
}

// ── Wire types ───────────────────────────────────────────────────────────

/// Response envelope shared by every conversion endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: ErrorCode,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ErrorCode::Success,
            message: None,
            data: Some(data),
        }
    }

    pub fn failure(failure: ConversionFailure) -> Self {
        Self {
            code: failure.code,
            message: Some(failure.message),
            data: None,
        }
    }
}

/// `data` of a successful `/convert`.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub filename: String,
    /// Base64, standard alphabet.
    pub content: String,
    pub size: usize,
    pub converted: bool,
}

impl From<ConvertedDocument> for ConvertResponse {
    fn from(doc: ConvertedDocument) -> Self {
        Self {
            size: doc.size(),
            content: encode::to_base64(&doc.content),
            filename: doc.filename,
            converted: doc.converted,
        }
    }
}

/// One NDJSON line of `/convert/images`.
#[derive(Debug, Serialize)]
pub struct PageLine {
    pub page: usize,
    pub content: String,
    pub size: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Query string of `/convert/images`. Kept as raw strings so bad values
/// land in the envelope as 103 instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    pub format: Option<String>,
    pub dpi: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn handle_supported_formats() -> Json<SupportedFormats> {
    Json(supported_formats())
}

async fn handle_convert(
    State(converter): State<Converter>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<ApiResponse<ConvertResponse>> {
    let request = match read_upload(multipart).await {
        Ok(request) => request,
        Err(e) => return Json(ApiResponse::failure(ConversionFailure::from(&e))),
    };
    let outcome = converter.convert(request).await;
    Json(match outcome {
        ConversionOutcome::Success(doc) => ApiResponse::success(ConvertResponse::from(doc)),
        ConversionOutcome::Failure(f) => ApiResponse::failure(f),
    })
}

async fn handle_convert_raw(
    State(converter): State<Converter>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request = match read_upload(multipart).await {
        Ok(request) => request,
        Err(e) => return envelope_error(&e),
    };
    match converter.convert(request).await {
        ConversionOutcome::Success(doc) => raw_response(doc),
        ConversionOutcome::Failure(f) => Json(ApiResponse::<()>::failure(f)).into_response(),
    }
}

async fn handle_convert_images(
    State(converter): State<Converter>,
    Query(query): Query<ImageQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let options = match image_options(&query, converter.config().default_dpi) {
        Ok(options) => options,
        Err(e) => return envelope_error(&e),
    };
    let request = match read_upload(multipart).await {
        Ok(request) => request,
        Err(e) => return envelope_error(&e),
    };
    match converter.convert_to_images(request, options).await {
        ConversionOutcome::Success(images) => ndjson_response(images),
        ConversionOutcome::Failure(f) => Json(ApiResponse::<()>::failure(f)).into_response(),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Pull the `file` field out of a multipart body.
async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<ConversionRequest, ConvertError> {
    let mut multipart =
        multipart.map_err(|e| ConvertError::InvalidRequest(format!("expected multipart/form-data: {e}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ConvertError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ConvertError::InvalidRequest(format!("failed to read upload: {e}")))?;
        return Ok(ConversionRequest::new(
            filename.as_deref(),
            bytes.to_vec(),
            content_type.as_deref(),
        ));
    }
    Err(ConvertError::InvalidRequest(format!("missing multipart field '{FILE_FIELD}'")))
}

fn image_options(query: &ImageQuery, default_dpi: u32) -> Result<ImageOptions, ConvertError> {
    let dpi = match query.dpi.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| ConvertError::InvalidRequest(format!("dpi must be a positive integer, got '{raw}'")))?,
        ),
    };
    ImageOptions::from_query(query.format.as_deref(), dpi, default_dpi)
}

fn envelope_error(err: &ConvertError) -> Response {
    Json(ApiResponse::<()>::failure(ConversionFailure::from(err))).into_response()
}

/// 501 envelope for a handler that panicked.
fn panic_response(panic: Box<dyn PanicPayload + Send + 'static>) -> Response {
    error!("Request handler panicked: {}", panic_message(&*panic));
    Json(ApiResponse::<()>::failure(ConversionFailure {
        code: ErrorCode::InternalError,
        message: "Internal server error".to_string(),
    }))
    .into_response()
}

fn raw_response(doc: ConvertedDocument) -> Response {
    let disposition = content_disposition(&doc.filename);
    let body = Body::from_stream(chunked(Bytes::from(doc.content)));
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(doc.mime_type));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

fn ndjson_response(images: PageImages) -> Response {
    let total_pages = images.total_pages();
    let lines: Vec<Result<Bytes, Infallible>> = images
        .pages
        .into_iter()
        .map(|p| {
            let line = PageLine {
                page: p.page,
                size: p.content.len(),
                content: encode::to_base64(&p.content),
                total_pages,
            };
            // Serialising plain strings and integers cannot fail.
            let mut json = serde_json::to_vec(&line).unwrap_or_default();
            json.push(b'\n');
            Ok(Bytes::from(json))
        })
        .collect();

    let mut response = (StatusCode::OK, Body::from_stream(futures::stream::iter(lines))).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    response
}

/// Split `bytes` into `RAW_CHUNK_SIZE` slices without copying.
fn chunked(bytes: Bytes) -> futures::stream::Iter<std::vec::IntoIter<Result<Bytes, Infallible>>> {
    let chunks: Vec<Result<Bytes, Infallible>> = (0..bytes.len())
        .step_by(RAW_CHUNK_SIZE)
        .map(|start| Ok(bytes.slice(start..(start + RAW_CHUNK_SIZE).min(bytes.len()))))
        .collect();
    futures::stream::iter(chunks)
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' { c } else { '_' })
        .collect();
    if fallback == filename {
        return format!("attachment; filename=\"{filename}\"");
    }
    let mut encoded = String::new();
    for byte in filename.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => encoded.push(byte as char),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn disposition_plain_ascii() {
        assert_eq!(content_disposition("report.pdf"), "attachment; filename=\"report.pdf\"");
    }

    #[test]
    fn disposition_non_ascii_gets_utf8_name() {
        let value = content_disposition("보고서.pdf");
        assert!(value.starts_with("attachment; filename=\"___.pdf\"; filename*=UTF-8''%EB%B3%B4"), "{value}");
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    #[tokio::test]
    async fn chunks_are_bounded() {
        let data = Bytes::from(vec![7u8; RAW_CHUNK_SIZE * 2 + 10]);
        let sizes: Vec<usize> = chunked(data)
            .map(|c| c.map(|b| b.len()).unwrap_or(0))
            .collect()
            .await;
        assert_eq!(sizes, vec![RAW_CHUNK_SIZE, RAW_CHUNK_SIZE, 10]);
    }

    #[test]
    fn image_query_rejects_bad_dpi_and_clamps_good_ones() {
        let bad = ImageQuery {
            format: None,
            dpi: Some("lots".into()),
        };
        assert_eq!(image_options(&bad, 150).unwrap_err().code(), ErrorCode::InvalidRequest);

        let high = ImageQuery {
            format: Some("jpg".into()),
            dpi: Some("9000".into()),
        };
        assert_eq!(image_options(&high, 150).unwrap().dpi, ImageOptions::MAX_DPI);
        assert_eq!(image_options(&ImageQuery::default(), 200).unwrap().dpi, 200);
    }

    #[tokio::test]
    async fn handler_panic_becomes_501_envelope() {
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        async fn explode() -> &'static str {
            panic!("handler exploded")
        }
        let app = Router::new()
            .route("/explode", get(explode))
            .layer(CatchPanicLayer::custom(panic_response));

        let response = app
            .oneshot(axum::http::Request::get("/explode").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": 501, "message": "Internal server error", "data": null})
        );
    }

    #[test]
    fn envelope_serialises_code_as_number() {
        let json = serde_json::to_value(ApiResponse::<()>::failure(ConversionFailure {
            code: ErrorCode::EmptyFile,
            message: "Empty file uploaded".into(),
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({"code": 101, "message": "Empty file uploaded", "data": null}));
    }
}
