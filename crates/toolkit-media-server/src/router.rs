//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use toolkit_media_common::gate::ENGINE_ASSET_PREFIX;

use crate::admin::{AdminState, build_admin_router};
use crate::gate::apply_route_gate;
use crate::handler::{
    capabilities, engine_status, health_check, localized_tool_page, readiness_check, resize_job,
    tool_page,
};
use crate::state::AppState;

/// Default upload limit for job inputs.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Admin API configuration for router.
pub struct AdminRouterConfig {
    /// Admin API prefix (e.g., "/admin").
    pub prefix: String,
    /// Admin authentication token.
    pub token: String,
}

/// Router options beyond the application state.
pub struct RouterOptions {
    /// Request timeout, job execution included.
    pub request_timeout: Duration,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Directory served under `/ffmpeg`.
    pub engine_asset_dir: Option<PathBuf>,
    /// Optional Admin API.
    pub admin: Option<AdminRouterConfig>,
}

impl RouterOptions {
    /// Options with the given timeout and nothing else configured.
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            engine_asset_dir: None,
            admin: None,
        }
    }
}

/// Build the main application router.
///
/// Routes:
/// - `GET /tools/:slug` - Tool page
/// - `GET /:locale/tools/:slug` - Localized tool page
/// - `POST /api/tools/image-resizer/jobs` - Run a resize job
/// - `POST /api/capabilities` - Rank backends for a reported environment
/// - `GET /api/engine` - Engine status
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    build_router_with_options(state, RouterOptions::new(request_timeout))
}

/// Build the main application router with engine assets and optional Admin API.
pub fn build_router_with_options(state: AppState, options: RouterOptions) -> Router {
    let page_routes = Router::new()
        .route("/tools/:slug", get(tool_page))
        .route("/:locale/tools/:slug", get(localized_tool_page));

    let api_routes = Router::new()
        .route("/api/tools/image-resizer/jobs", post(resize_job))
        .route("/api/capabilities", post(capabilities))
        .route("/api/engine", get(engine_status))
        .layer(DefaultBodyLimit::max(options.max_upload_bytes));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    let mut router = Router::new()
        .merge(page_routes)
        .merge(api_routes)
        .merge(health_routes);

    if let Some(dir) = options.engine_asset_dir {
        router = router.nest_service(ENGINE_ASSET_PREFIX, ServeDir::new(dir));
    }

    // Add Admin API if configured
    if let Some(config) = options.admin {
        let admin_state = AdminState {
            app_state: state.clone(),
            admin_token: config.token,
        };
        let admin_router = build_admin_router(admin_state);
        router = router.nest(&config.prefix, admin_router);
    }

    // The gate sits outside the timeout so a 408 still carries the headers.
    router
        .layer(TimeoutLayer::new(options.request_timeout))
        .layer(from_fn_with_state(
            state.gate().clone(),
            apply_route_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
