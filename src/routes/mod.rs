//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router carries the REST object/board endpoints, the realtime
//! websocket at `/api/ws`, and a health check. Every REST failure leaves as
//! a JSON body `{code, message, details?}` built from the `ErrorCode` of a
//! `GatewayError`.

pub mod auth;
pub mod boards;
pub mod objects;
pub mod ws;

use axum::Router;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use frames::ErrorCode;
use serde_json::{Map, Value};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::services::gateway::GatewayError;
use crate::state::AppState;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/boards", get(boards::list_boards).post(boards::create_board))
        .route(
            "/api/boards/{id}/objects",
            get(objects::list_objects).post(objects::create_object),
        )
        .route("/api/boards/{id}/objects/batch", post(objects::create_batch))
        .route("/api/boards/{id}/objects/batch-delete", post(objects::delete_batch))
        .route(
            "/api/boards/{id}/objects/{object_id}",
            patch(objects::patch_object).delete(objects::delete_object),
        )
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

pub(crate) fn gateway_error_to_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
        GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
        GatewayError::BoardNotFound(_) | GatewayError::ObjectNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
        GatewayError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = gateway_error_to_status(&self);
        if status.is_server_error() {
            error!(error = %self, "rest: request failed");
        }

        let mut body = Map::new();
        body.insert("code".into(), Value::String(self.error_code().to_owned()));
        body.insert("message".into(), Value::String(self.to_string()));
        if let Some(details) = self.details() {
            body.insert("details".into(), details);
        }
        let mut response = (status, Json(Value::Object(body))).into_response();
        if let GatewayError::RateLimited(e) = &self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(e.retry_after_secs));
        }
        response
    }
}
