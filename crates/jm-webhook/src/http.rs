//! The bridge-scoped webhook HTTP surface (§6.4), following the
//! reference router's handler shape: one `AppState`, thin handlers that
//! map a typed outcome/error straight to `(StatusCode, Json(body))`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::{route_webhook, WebhookDeps, WebhookError, WebhookOutcome};

#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<WebhookDeps>,
    pub request_timeout_ms: u64,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: &'static str,
}

fn error_response(status: StatusCode, reason: &'static str) -> Response {
    (status, Json(ErrorResponse { ok: false, error: reason })).into_response()
}

/// Builds the webhook router, mounted at `/webhooks/:bridge_id`. CORS and
/// request tracing mirror the reference router's layering
/// (`TraceLayer` + permissive `CorsLayer`); the OpenAPI/Swagger hosting
/// the reference router also carries was dropped (see DESIGN.md).
pub fn create_router(deps: Arc<WebhookDeps>, request_timeout_ms: u64, max_body_bytes: usize, cors_origins: &[String]) -> Router {
    let state = AppState { deps, request_timeout_ms };

    let cors = if cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/webhooks/:bridge_id", post(webhook_handler))
        .route("/healthz", axum::routing::get(healthz))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(OkResponse { ok: true }))
}

/// `POST /webhooks/:bridge_id` (§6.4). Body read/parse happens here so
/// the 400 `invalid_json` / `request_body_read_failed` split is explicit
/// rather than folded into axum's default rejection handling.
async fn webhook_handler(State(state): State<AppState>, Path(bridge_id): Path<String>, headers: HeaderMap, body: Bytes) -> Response {
    let run = async {
        let payload: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid_json"),
        };

        let header_map: HashMap<String, String> =
            headers.iter().filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))).collect();

        match route_webhook(&state.deps, &bridge_id, &body, &header_map, &payload).await {
            Ok(WebhookOutcome::Noop) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
            Ok(WebhookOutcome::Duplicate(event)) => (StatusCode::OK, Json(serde_json::json!({ "ok": true, "duplicate": true, "event": event }))).into_response(),
            Ok(WebhookOutcome::Event(event)) => (StatusCode::OK, Json(serde_json::json!({ "ok": true, "event": event }))).into_response(),
            Ok(WebhookOutcome::Message { message, .. }) => (StatusCode::OK, Json(serde_json::json!({ "ok": true, "message_id": message.id }))).into_response(),
            Err(err) => webhook_error_response(err),
        }
    };

    match tokio::time::timeout(Duration::from_millis(state.request_timeout_ms.max(1)), run).await {
        Ok(response) => response,
        Err(_) => error_response(StatusCode::REQUEST_TIMEOUT, "timeout"),
    }
}

/// Maps §4.11/§7 failure reasons to HTTP status. The five codes named
/// verbatim by §6.4 (`invalid_json`, `request_body_read_failed`,
/// `invalid_signature`, `timeout`, `too_large`, `missing_instance_module`)
/// keep their exact reason strings; `bridge_not_found`/`bridge_disabled`
/// aren't enumerated there, so they get the conventional HTTP codes for
/// "resource absent"/"resource inert" (404/403) rather than overloading
/// 500 (an Open Question decision, recorded in DESIGN.md).
fn webhook_error_response(err: WebhookError) -> Response {
    match err {
        WebhookError::BridgeNotFound => error_response(StatusCode::NOT_FOUND, "bridge_not_found"),
        WebhookError::BridgeDisabled => error_response(StatusCode::FORBIDDEN, "bridge_disabled"),
        WebhookError::MissingInstanceModule => error_response(StatusCode::INTERNAL_SERVER_ERROR, "missing_instance_module"),
        WebhookError::InvalidSignature => error_response(StatusCode::UNAUTHORIZED, "invalid_signature"),
        WebhookError::Ingest(fabric_err) => fabric_error_response(fabric_err),
    }
}

fn fabric_error_response(err: jm_core::error::FabricError) -> Response {
    use jm_core::error::FabricError;
    match err {
        FabricError::PolicyDenied(denied) => error_response_owned(StatusCode::FORBIDDEN, format!("policy_denied:{}", denied.reason)),
        FabricError::SecurityDenied(denied) => error_response_owned(StatusCode::FORBIDDEN, format!("security_denied:{}", denied.reason)),
        FabricError::NotFound => error_response(StatusCode::NOT_FOUND, "not_found"),
        FabricError::Ambiguous => error_response(StatusCode::CONFLICT, "ambiguous"),
        FabricError::RevisionConflict(_) => error_response(StatusCode::CONFLICT, "revision_conflict"),
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn error_response_owned(status: StatusCode, reason: String) -> Response {
    (status, Json(serde_json::json!({ "ok": false, "error": reason }))).into_response()
}
