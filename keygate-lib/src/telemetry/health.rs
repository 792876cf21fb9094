use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use hyper::StatusCode;
use serde_json::json;

use crate::error::{GateError, Result};

type RespBody = BoxBody<Bytes, hyper::Error>;

fn json_response(status: StatusCode, body: serde_json::Value) -> Result<Response<RespBody>> {
    let body_bytes = serde_json::to_vec(&body)
        .map_err(|e| GateError::Http(format!("Failed to serialize health response: {e}")))?;

    let body = Full::new(Bytes::from(body_bytes))
        .map_err(|never| match never {})
        .boxed();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .map_err(|e| GateError::Http(format!("Failed to build health response: {e}")))
}

/// Health check response - always returns 200 if process is running
pub fn health_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, json!({"status": "healthy"}))
}

/// Readiness check - verifies that a backend is configured
/// Returns 200 when there is a backend to forward to, 503 otherwise
pub fn ready_check_response(backend: &str) -> Result<Response<RespBody>> {
    if backend.trim().is_empty() {
        json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"status": "not_ready", "reason": "no_backend_configured"}),
        )
    } else {
        json_response(StatusCode::OK, json!({"status": "ready"}))
    }
}

/// Liveness check - always returns 200 if process is running
pub fn live_check_response() -> Result<Response<RespBody>> {
    json_response(StatusCode::OK, json!({"status": "alive"}))
}
