//! Object REST routes. Every write goes through the mutation gateway, so
//! REST callers and websocket peers see the same broadcasts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use frames::{
    BatchCreateRequest, BatchCreateResult, BatchDeleteRequest, BatchDeleteResult, CanvasObject, ObjectId,
    ObjectInput, ObjectPatch,
};
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::gateway::{self, GatewayError};
use crate::state::AppState;

/// `GET /api/boards/{id}/objects`
pub async fn list_objects(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Vec<CanvasObject>>, GatewayError> {
    Ok(Json(gateway::list_objects(&state, board_id).await?))
}

/// `POST /api/boards/{id}/objects`
pub async fn create_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(input): Json<ObjectInput>,
) -> Result<(StatusCode, Json<CanvasObject>), GatewayError> {
    let object = gateway::create_object(&state, board_id, auth.identity.user_id, &input).await?;
    Ok((StatusCode::CREATED, Json(object)))
}

/// `PATCH /api/boards/{id}/objects/{object_id}`
pub async fn patch_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, object_id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<ObjectPatch>,
) -> Result<Json<CanvasObject>, GatewayError> {
    let object =
        gateway::update_object(&state, board_id, auth.identity.user_id, ObjectId::Server(object_id), &patch).await?;
    Ok(Json(object))
}

/// `DELETE /api/boards/{id}/objects/{object_id}`
pub async fn delete_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, object_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, GatewayError> {
    gateway::delete_object(&state, board_id, auth.identity.user_id, ObjectId::Server(object_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/boards/{id}/objects/batch`
pub async fn create_batch(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<BatchCreateRequest>,
) -> Result<Json<BatchCreateResult>, GatewayError> {
    let result = gateway::create_batch(&state, board_id, auth.identity.user_id, &body.objects).await?;
    Ok(Json(result))
}

/// `POST /api/boards/{id}/objects/batch-delete`
pub async fn delete_batch(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteResult>, GatewayError> {
    let result = gateway::delete_batch(&state, board_id, auth.identity.user_id, &body.ids).await?;
    Ok(Json(result))
}

#[cfg(test)]
#[path = "objects_test.rs"]
mod tests;
