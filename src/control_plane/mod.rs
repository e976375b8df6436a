//! HMAC-signed control-plane API (spec §4.9, §6): call origination and
//! control, inbound call screening, multi-channel delivery, and an SSE
//! event gateway. Routing/middleware shape is axum's own idiom; the
//! authentication scheme is grounded in `provider::twilio`'s
//! `Hmac<Sha256>` webhook-signature pattern, generalized with a
//! timestamp + nonce (`hmac_auth`).

mod error_response;
mod handlers;
mod hmac_auth;
mod middleware;
mod sse;
mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the full control-plane router: HMAC-guarded RPC surface plus
/// the token-authenticated SSE gateway mounted unguarded (it checks its
/// own `token` query param since `EventSource` can't set headers).
pub fn router(state: AppState) -> Router {
    let privileged = Router::new()
        .route("/calls", post(handlers::originate_call).get(handlers::list_calls))
        .route("/calls/:id", get(handlers::get_call))
        .route("/calls/:id/events", get(handlers::get_call_events))
        .route("/calls/:id/script", post(handlers::inject_script))
        .route("/calls/:id/end", post(handlers::end_call))
        .route("/calls/:id/stream/retry", post(handlers::stream_retry))
        .route("/calls/:id/stream/fallback", post(handlers::stream_fallback))
        .route("/inbound/:id/answer", post(handlers::answer_inbound))
        .route("/inbound/:id/decline", post(handlers::decline_inbound))
        .route("/sms", post(handlers::send_sms))
        .route("/sms/bulk", post(handlers::send_sms_bulk))
        .route("/emails", post(handlers::send_email))
        .route("/emails/bulk", post(handlers::send_email_bulk))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), middleware::hmac_auth_mw));

    Router::new()
        .merge(privileged)
        .route("/webapp/sse", get(sse::sse_gateway))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
