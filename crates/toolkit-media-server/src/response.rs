//! HTTP response construction.
//!
//! This module provides [`ApiResponse`] and the mapping from
//! [`MediaError`] to HTTP status codes.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};

use toolkit_media_common::MediaError;

/// Response status, headers and body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as key-value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Create a simple text response.
    pub fn text(status: u16, body: &str) -> Self {
        Self::bytes(status, "text/plain; charset=utf-8", body.as_bytes().to_vec())
    }

    /// Create a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::bytes(status, "application/json", body.to_string().into_bytes())
    }

    /// Create an HTML response.
    pub fn html(status: u16, body: String) -> Self {
        Self::bytes(status, "text/html; charset=utf-8", body.into_bytes())
    }

    /// Create a binary response.
    pub fn bytes(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body,
        }
    }

    /// Create an error response with JSON body.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// Add a header to the response.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Convert to Axum response.
    pub fn into_axum_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().append(name, value);
            }
        }

        response
    }
}

impl axum::response::IntoResponse for ApiResponse {
    fn into_response(self) -> axum::response::Response {
        self.into_axum_response()
    }
}

/// Convert a [`MediaError`] to an HTTP response.
///
/// Job failures are the caller's to fix (422); an unusable environment is
/// reported as 501 and a terminated or unavailable engine as 503.
pub fn error_to_response(error: &MediaError) -> ApiResponse {
    match error {
        MediaError::JobFailed { message } => ApiResponse::error(422, message),
        MediaError::Vfs(_) | MediaError::Trap { .. } | MediaError::HostFunction(_) => {
            ApiResponse::error(422, &error.to_string())
        }
        MediaError::Unsupported { .. } => ApiResponse::error(501, &error.to_string()),
        MediaError::Terminated => ApiResponse::error(503, "Engine terminated"),
        MediaError::LoadFailed { .. }
        | MediaError::ArtifactFetch { .. }
        | MediaError::CompilationFailed { .. } => ApiResponse::error(503, &error.to_string()),
        MediaError::InvalidConfig { .. } | MediaError::Io(_) => {
            ApiResponse::error(500, "Internal server error")
        }
    }
}
