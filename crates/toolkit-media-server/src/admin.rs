//! Admin API handlers for engine management.
//!
//! # Authentication
//!
//! All Admin API endpoints require the `X-Admin-Token` header
//! to match the configured admin token.
//!
//! # Endpoints
//!
//! - `GET /admin/engine` - Loader state and handle details
//! - `POST /admin/engine/reset` - Tear down the loader and start over

use axum::{
    Extension, Json, Router,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use crate::response::error_to_response;
use crate::state::AppState;

/// Admin API state containing app state and auth token.
#[derive(Clone)]
pub struct AdminState {
    /// Application state.
    pub app_state: AppState,
    /// Expected admin token for authentication.
    pub admin_token: String,
}

/// Build the Admin API router.
///
/// Returns a router that uses Extension to pass the admin state,
/// allowing it to be nested into routers with different state types.
pub fn build_admin_router(admin_state: AdminState) -> Router<AppState> {
    Router::new()
        .route("/engine", get(engine_info))
        .route("/engine/reset", post(reset_engine))
        .layer(Extension(admin_state))
}

/// Verify the admin token from request headers.
fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), (StatusCode, &'static str)> {
    match headers.get("X-Admin-Token") {
        Some(token) => {
            if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
                Ok(())
            } else {
                Err((StatusCode::UNAUTHORIZED, "Invalid admin token"))
            }
        }
        None => Err((StatusCode::UNAUTHORIZED, "Missing X-Admin-Token header")),
    }
}

/// Reset the media engine.
///
/// The current handle is terminated (in-flight jobs fail with
/// `Engine terminated`) and a fresh idle loader takes its place. This is the
/// only way out of a settled load error.
///
/// # Request
///
/// `POST /admin/engine/reset`
///
/// # Response
///
/// ```json
/// {
///   "previous_state": "error",
///   "state": "idle",
///   "message": "Engine reset"
/// }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn reset_engine(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        warn!("Rejected admin request");
        return e.into_response();
    }

    let previous = admin_state.app_state.loader().state();
    match admin_state.app_state.reset_loader() {
        Ok(fresh) => {
            info!(previous_state = previous.as_str(), "Engine reset via admin API");
            Json(serde_json::json!({
                "previous_state": previous.as_str(),
                "state": fresh.state().as_str(),
                "message": "Engine reset"
            }))
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Engine reset failed");
            error_to_response(&e).into_response()
        }
    }
}

/// Get engine details.
///
/// # Request
///
/// `GET /admin/engine`
///
/// # Response
///
/// ```json
/// {
///   "state": "ready",
///   "handle": "6f1c...",
///   "backend": "wasm-simd",
///   "build": "single-threaded",
///   "uptime_secs": 42,
///   "pending_jobs": 0
/// }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn engine_info(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let loader = admin_state.app_state.loader();
    let handle = loader.handle();

    Json(serde_json::json!({
        "state": loader.state(),
        "handle": handle.as_ref().map(|h| h.id().to_string()),
        "backend": handle.as_ref().map(|h| h.backend()),
        "build": handle.as_ref().and_then(|h| h.build()),
        "uptime_secs": handle.as_ref().map(|h| h.loaded_at().elapsed().as_secs()),
        "pending_jobs": handle.as_ref().map_or(0, |h| h.queue().pending()),
    }))
    .into_response()
}
