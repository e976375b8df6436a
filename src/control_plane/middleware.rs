//! HMAC-verifying axum middleware. Structural shape follows a bearer-auth
//! middleware elsewhere in the pack (`State`/`Request`/`Next` extraction,
//! 401 on rejection) generalized to the signed-body scheme this crate
//! actually needs (spec §6).

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error_response::error_json;
use super::state::AppState;
use crate::error::OrchestratorError;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub async fn hmac_auth_mw(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();

    let auth_header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let Some(auth_header) = auth_header else {
        return error_json(&OrchestratorError::auth("missing Authorization header")).into_response();
    };

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let path = parts.uri.path();
    if let Err(e) = crate::control_plane::hmac_auth::verify(
        &state.control_plane.api_secret,
        &auth_header,
        parts.method.as_str(),
        path,
        &bytes,
        state.control_plane.max_skew,
    ) {
        return error_json(&e).into_response();
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}
