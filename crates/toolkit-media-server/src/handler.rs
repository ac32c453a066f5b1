//! Request handlers for tool pages and the media engine API.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use toolkit_media_common::MediaError;
use toolkit_media_core::{
    LoadState, OutputFormat, ProcessingJob, ReportedEnvironment, detect_capabilities,
};

use crate::request::{ResizeQuery, input_extension};
use crate::response::{ApiResponse, error_to_response};
use crate::shell::{FeatureAvailability, render_tool_page};
use crate::state::AppState;
use crate::tools::Tool;

fn state_message(state: &LoadState) -> Option<&str> {
    match state {
        LoadState::Error(message) => Some(message),
        _ => None,
    }
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// The server accepts jobs in every loader state except a settled error,
/// which only an admin reset clears.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let load_state = state.loader().state();
    let status = if matches!(load_state, LoadState::Error(_)) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = serde_json::json!({
        "status": if status.is_success() { "ready" } else { "degraded" },
        "engine": load_state.as_str(),
    });

    (status, Json(body))
}

/// Render a tool page.
#[instrument(skip(state))]
pub async fn tool_page(State(state): State<AppState>, Path(slug): Path<String>) -> impl IntoResponse {
    render_page(&state, &slug, &format!("/tools/{slug}"))
}

/// Render a localized tool page.
///
/// The locale only affects the URL; the gate treats `/:locale/tools/:slug`
/// exactly like the unprefixed page.
#[instrument(skip(state))]
pub async fn localized_tool_page(
    State(state): State<AppState>,
    Path((locale, slug)): Path<(String, String)>,
) -> impl IntoResponse {
    render_page(&state, &slug, &format!("/{locale}/tools/{slug}"))
}

fn render_page(state: &AppState, slug: &str, path: &str) -> ApiResponse {
    match Tool::from_slug(slug) {
        Some(tool) => ApiResponse::html(200, render_tool_page(tool, path, state.ads())),
        None => ApiResponse::error(404, &format!("Tool not found: {slug}")),
    }
}

/// Engine status.
///
/// # Response
///
/// ```json
/// {
///   "state": "ready",
///   "message": null,
///   "progress": 0,
///   "backend": "cpu",
///   "build": null,
///   "pendingJobs": 0
/// }
/// ```
pub async fn engine_status(State(state): State<AppState>) -> impl IntoResponse {
    let loader = state.loader();
    let load_state = loader.state();
    let handle = loader.handle();

    Json(serde_json::json!({
        "state": load_state.as_str(),
        "message": state_message(&load_state),
        "progress": loader.progress(),
        "backend": handle.as_ref().map(|h| h.backend()),
        "build": handle.as_ref().and_then(|h| h.build()),
        "pendingJobs": handle.as_ref().map_or(0, |h| h.queue().pending()),
    }))
}

/// Query parameters of `POST /api/capabilities`.
#[derive(Debug, Default, Deserialize)]
pub struct CapabilityQuery {
    /// Page the client is running on.
    pub path: Option<String>,
}

/// Rank backends for a client-reported environment.
///
/// # Request
///
/// `POST /api/capabilities?path=/tools/image-resizer`
///
/// ```json
/// {"wasm": true, "simd": true, "sharedMemory": true, "crossOriginIsolated": true}
/// ```
#[instrument(skip(state, reported))]
pub async fn capabilities(
    State(state): State<AppState>,
    Query(query): Query<CapabilityQuery>,
    Json(reported): Json<ReportedEnvironment>,
) -> impl IntoResponse {
    let caps = detect_capabilities(&reported).await;
    let prefer_multi_thread = state.loader().options().prefer_multi_thread;

    let expects_isolation = query
        .path
        .as_deref()
        .is_some_and(|path| state.gate().is_isolated_path(path));
    let availability =
        FeatureAvailability::for_page(expects_isolation, reported.cross_origin_isolated);

    Json(serde_json::json!({
        "capabilities": caps,
        "best": caps.best(),
        "recommendedBuild": caps.recommended_build(prefer_multi_thread),
        "availability": availability,
    }))
}

/// Run an image resize job.
///
/// The request body is the input image. The engine loads on first use and
/// the response body is the encoded output.
///
/// # Request
///
/// `POST /api/tools/image-resizer/jobs?width=200&format=jpg&quality=80`
#[instrument(skip(state, headers, body), fields(input_len = body.len()))]
pub async fn resize_job(
    State(state): State<AppState>,
    Query(query): Query<ResizeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.is_empty() {
        return ApiResponse::error(400, "Empty input file");
    }

    let input_ext = input_extension(&headers);
    let params = match query.into_params(OutputFormat::from_extension(input_ext)) {
        Ok(params) => params,
        Err(msg) => {
            warn!(error = %msg, "Rejected resize parameters");
            return ApiResponse::error(400, &msg);
        }
    };

    let loader = state.loader();
    if !loader.load().await {
        return match loader.error() {
            Some(e) => {
                error!(error = %e, "Media engine unavailable");
                error_to_response(&e)
            }
            None => ApiResponse::error(503, "Engine not available"),
        };
    }
    let Some(handle) = loader.handle() else {
        return error_to_response(&MediaError::Terminated);
    };

    let job = ProcessingJob::resize(input_ext, &params);
    let Ok(result) = tokio::time::timeout(state.job_timeout(), handle.submit(body, &job)).await else {
        warn!(
            timeout_ms = state.job_timeout().as_millis(),
            handle = %handle.id(),
            "Resize job timed out, resetting engine"
        );
        if let Err(e) = state.reset_loader() {
            error!(error = %e, "Engine reset failed");
        }
        return ApiResponse::error(408, "Job timed out");
    };

    match result {
        Ok(output) => {
            info!(
                backend = %handle.backend(),
                output_len = output.bytes.len(),
                duration_ms = output.duration.as_millis(),
                "Resize job completed"
            );
            ApiResponse::bytes(200, output.mime(), output.bytes.to_vec())
                .with_header(
                    "content-disposition",
                    &format!("inline; filename=\"output.{}\"", output.extension()),
                )
                .with_header("x-job-duration-ms", &output.duration.as_millis().to_string())
                .with_header("x-engine-backend", handle.backend().as_str())
        }
        Err(e) => {
            warn!(error = %e, "Resize job failed");
            error_to_response(&e)
        }
    }
}
