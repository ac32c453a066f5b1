//! Job request parsing.
//!
//! The image job endpoint takes the input image as the raw request body and
//! its parameters in the query string.

use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use serde::Deserialize;

use toolkit_media_core::{OutputFormat, ResizeParams};

/// Largest accepted dimension in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

/// Query parameters of `POST /api/tools/image-resizer/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResizeQuery {
    /// Target width in pixels.
    pub width: Option<u32>,
    /// Target height in pixels.
    pub height: Option<u32>,
    /// Keep the source aspect ratio (default `true`).
    pub keep_aspect: Option<bool>,
    /// Output format extension; defaults to the input's format.
    pub format: Option<String>,
    /// Output quality 1-100.
    pub quality: Option<u8>,
}

impl ResizeQuery {
    /// Validate and convert to resize parameters.
    ///
    /// `input_format` is used when no output format is requested.
    pub fn into_params(self, input_format: Option<OutputFormat>) -> Result<ResizeParams, String> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            match value {
                Some(0) => return Err(format!("{name} must be at least 1")),
                Some(v) if v > MAX_DIMENSION => {
                    return Err(format!("{name} must be at most {MAX_DIMENSION}"));
                }
                _ => {}
            }
        }

        let format = match self.format.as_deref() {
            Some(ext) => OutputFormat::from_extension(ext)
                .ok_or_else(|| format!("Unsupported output format: {ext}"))?,
            None => input_format.unwrap_or(OutputFormat::Png),
        };

        Ok(ResizeParams {
            width: self.width,
            height: self.height,
            maintain_aspect_ratio: self.keep_aspect.unwrap_or(true),
            format,
            quality: self.quality,
        })
    }
}

/// Input file extension derived from the request's `Content-Type`.
///
/// Unknown types map to `bin`; the engine sniffs the actual container.
pub fn input_extension(headers: &HeaderMap) -> &'static str {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase());

    match content_type.as_deref() {
        Some("image/png") => "png",
        Some("image/jpeg" | "image/jpg") => "jpg",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        Some("image/bmp") => "bmp",
        _ => "bin",
    }
}
