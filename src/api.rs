//! Transport-neutral request handlers.
//!
//! Each handler turns a decoded request into an [`ApiResponse`] (status,
//! headers, body) that an HTTP layer can write out unchanged. Failures become
//! the JSON [`ErrorResponse`] envelope; the detailed error goes to the log,
//! not to the caller.

use serde::{Deserialize, Serialize};

use crate::{
    audit::AuditRecord,
    error::QrApiError,
    pipeline::{CallerId, GenerateRequest, Pipeline},
    render::RasterImage,
};

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Error envelope returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// User-level status message.
    pub status: String,
    /// Application-specific error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Application-level error message, for debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&QrApiError> for ErrorResponse {
    fn from(err: &QrApiError) -> Self {
        // Only client errors echo the detail; server-side paths and sources stay in the log.
        let error = err.is_client_error().then(|| err.to_string());
        Self { status: err.status_text().to_owned(), code: Some(err.app_code()), error }
    }
}

/// Body of a listing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Records in append order.
    pub list: Vec<AuditRecord>,
}

/// A fully formed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` and `Content-Length`.
    pub headers: Vec<(&'static str, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        let headers =
            vec![("Content-Type", content_type.to_owned()), ("Content-Length", body.len().to_string())];
        Self { status, headers, body }
    }

    fn png(image: RasterImage) -> Self {
        Self::new(200, RasterImage::CONTENT_TYPE, image.into_bytes())
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, JSON, body),
            Err(e) => Self::error(&QrApiError::internal(format!("response serialization failed: {e}"))),
        }
    }

    /// Renders `err` as the JSON envelope with its HTTP status.
    pub fn error(err: &QrApiError) -> Self {
        if err.is_client_error() {
            tracing::info!(error = %err, "request rejected");
        } else {
            tracing::error!(error = %err, "request failed");
        }
        let envelope = ErrorResponse::from(err);
        // The envelope only holds strings and an integer.
        let body = serde_json::to_vec(&envelope).unwrap_or_default();
        Self::new(err.status_code(), JSON, body)
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Generates a QR code from a JSON body on behalf of an authenticated caller.
pub async fn handle_generate(pipeline: &Pipeline, body: &[u8], caller: CallerId) -> ApiResponse {
    let request: GenerateRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return ApiResponse::error(&QrApiError::invalid_body(e.to_string())),
    };
    match pipeline.generate(request, caller).await {
        Ok(image) => ApiResponse::png(image),
        Err(err) => ApiResponse::error(&err),
    }
}

/// Lists audit records in append order.
pub async fn handle_list(pipeline: &Pipeline, limit: Option<usize>) -> ApiResponse {
    match pipeline.list(limit).await {
        Ok(list) => ApiResponse::json(200, &ListResponse { list }),
        Err(err) => ApiResponse::error(&err),
    }
}

/// Unauthenticated demo image. Nothing is stored or audited.
pub fn handle_root(pipeline: &Pipeline) -> ApiResponse {
    match pipeline.render_demo() {
        Ok(image) => ApiResponse::png(image),
        Err(err) => ApiResponse::error(&err),
    }
}

/// Liveness check.
pub fn handle_ping() -> ApiResponse {
    ApiResponse::new(200, TEXT, b".".to_vec())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        artifact::MemoryArtifactStore, audit::MemoryAuditLog, clock::FixedClock,
        config::ServiceConfig,
    };

    fn pipeline() -> Pipeline {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 6, 0, 0).unwrap();
        Pipeline::new(
            ServiceConfig::default(),
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(FixedClock(now)),
        )
    }

    #[tokio::test]
    async fn generate_returns_png_with_headers() {
        let p = pipeline();
        let resp =
            handle_generate(&p, br#"{"target":"https://example.com/"}"#, "123".into()).await;

        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("content-type"), Some("image/png"));
        assert_eq!(resp.header("Content-Length"), Some(resp.body.len().to_string().as_str()));
        assert!(resp.body.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn missing_target_is_invalid_request() {
        let resp = handle_generate(&pipeline(), b"{}", "123".into()).await;

        assert_eq!(resp.status, 400);
        let envelope: ErrorResponse = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(envelope.status, "Invalid request.");
        assert_eq!(envelope.code, Some(1001));
    }

    #[tokio::test]
    async fn undecodable_body_is_invalid_request() {
        let resp = handle_generate(&pipeline(), b"target=x", "123".into()).await;

        assert_eq!(resp.status, 400);
        let envelope: ErrorResponse = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(envelope.status, "Invalid request.");
        assert_eq!(envelope.code, Some(1002));
    }

    #[tokio::test]
    async fn list_serializes_records() {
        let p = pipeline();
        handle_generate(&p, br#"{"url":"https://example.com/"}"#, "123".into()).await;

        let resp = handle_list(&p, None).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"list": [{
                "created_at": "2024-05-10T06:00:00Z",
                "caller_id": "123",
                "target": "https://example.com/",
            }]})
        );
    }

    #[test]
    fn server_errors_hide_details() {
        let err = QrApiError::io("/srv/qrcreate.log", std::io::Error::other("disk full"));
        let envelope = ErrorResponse::from(&err);
        assert_eq!(envelope.status, "Internal server error.");
        assert_eq!(envelope.error, None);
        assert_eq!(serde_json::to_string(&envelope).unwrap(), r#"{"status":"Internal server error.","code":2001}"#);
    }

    #[test]
    fn ping_and_root() {
        let ping = handle_ping();
        assert_eq!((ping.status, ping.body.as_slice()), (200, b".".as_slice()));

        let root = handle_root(&pipeline());
        assert_eq!(root.status, 200);
        assert_eq!(root.header("Content-Type"), Some("image/png"));
    }
}
