//! JSON envelopes for the control plane (spec §6): `{ok:true, ...}` on
//! success, `{ok:false, error:{code,message,details?}}` on failure, with
//! `ErrorKind::http_status()` driving the status code and a `Retry-After`
//! header on `rate_limited`.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{ErrorKind, OrchestratorError};

pub fn error_json(err: &OrchestratorError) -> Response {
    let status = StatusCode::from_u16(err.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "ok": false,
        "error": {
            "code": err.code(),
            "message": err.message,
        }
    });
    if let Some(details) = &err.details {
        body["error"]["details"] = details.clone();
    }
    let mut resp = (status, Json(body)).into_response();
    if err.kind == ErrorKind::RateLimited {
        resp.headers_mut().insert("Retry-After", HeaderValue::from_static("5"));
    }
    resp
}

pub fn ok_json(mut body: serde_json::Value) -> Response {
    if !body.is_object() {
        body = json!({ "value": body });
    }
    body["ok"] = json!(true);
    Json(body).into_response()
}
