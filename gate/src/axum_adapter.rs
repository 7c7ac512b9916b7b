//! Mounts a `PaidRequestHandler` as a ready-made `axum` handler, so a host
//! service can do `Router::new().route("/tools/:id", any(paid_tool_handler))
//! .with_state(handler)` without touching `http::Request`/`Response` glue
//! directly.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::Request;

use crate::handler::{PaidRequestHandler, RequestMeta};

/// A generous absolute cap on bytes read off the wire, independent of
/// `HandlerConfig::max_request_body_bytes` (which governs the strict
/// request-binding check, spec §4.7 S2). Guards against unbounded reads on
/// paths where the offer turns out not to require strict binding at all.
const ABSOLUTE_BODY_READ_CAP: usize = 16 * 1024 * 1024;

pub async fn paid_tool_handler(
    State(handler): State<Arc<PaidRequestHandler>>,
    req: Request<Body>,
) -> Response {
    let (parts, body) = req.into_parts();
    let meta = RequestMeta {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
    };

    let body_bytes: Bytes = match axum::body::to_bytes(body, ABSOLUTE_BODY_READ_CAP).await {
        Ok(b) => b,
        Err(err) => {
            return (
                http::StatusCode::PAYLOAD_TOO_LARGE,
                format!("failed to read request body: {err}"),
            )
                .into_response()
        }
    };

    let response = handler.handle(meta, body_bytes).await;
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::from(body))
}
