//! Request middleware: correlation scope and optional bearer authentication.
use super::ConsoleState;
use crate::trace;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// Response header carrying the request's correlation id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Runs the rest of the request inside a fresh correlation scope.
///
/// Every audit entry written while handling the request carries the same id,
/// which is also returned to the client in `x-trace-id`.
pub async fn correlate(request: Request, next: Next) -> Response {
    let trace_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = trace::scope_with(trace_id, next.run(request))
        .instrument(span)
        .await;

    if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Rejects requests without the configured bearer token.
///
/// Passes everything through when no API key is configured.
pub async fn require_api_key(
    State(state): State<Arc<ConsoleState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(api_key) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if let Some(token) = auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
        if constant_time_eq(token.as_bytes(), api_key.as_bytes()) {
            return Ok(next.run(request).await);
        }
    }

    Err(StatusCode::UNAUTHORIZED)
}

/// Compares without exiting early on the first differing byte.
///
/// Only the length is observable through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
