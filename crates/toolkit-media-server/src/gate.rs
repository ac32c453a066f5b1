//! Route gate middleware.
//!
//! The only place isolation headers are attached. Every response, including
//! errors and static engine assets, passes through [`apply_route_gate`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::trace;

use toolkit_media_common::RouteGate;

/// Attach the gate's headers for the request path to the response.
pub async fn apply_route_gate(
    State(gate): State<Arc<RouteGate>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;

    let headers = gate.headers_for(&path);
    if !headers.is_empty() {
        trace!(path = %path, count = headers.len(), "Applying isolation headers");
    }
    for &(name, value) in headers {
        response.headers_mut().insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    response
}
