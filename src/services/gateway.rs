//! Mutation gateway: the single write path for board objects.
//!
//! DESIGN
//! ======
//! REST handlers and websocket frames both land here. Each operation:
//! 1. checks the board exists and the actor owns it,
//! 2. validates the payload (field errors are returned, never broadcast),
//! 3. persists through the `ObjectStore`, which stamps `updated_at` at
//!    commit time,
//! 4. broadcasts the committed result to the board's room and returns it.
//!
//! The caller waits for persistence only. Broadcast is best-effort and does
//! not affect the result.
//!
//! Batches share one authorization check and then run item by item. Each
//! item persists and broadcasts on its own, so partial success is normal
//! and reported per item.

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;

use frames::{
    BatchCreateResult, BatchDeleteResult, BoardEvent, CanvasObject, CreateOutcome, DeleteOutcome, ErrorCode,
    FieldError, ObjectChanged, ObjectDeleted, ObjectId, ObjectInput, ObjectPatch, now_ms,
};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::store::StoreError;
use crate::rate_limit::RateLimitError;
use crate::state::AppState;

/// Longest accepted object type name.
pub const MAX_KIND_LEN: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing or invalid credential")]
    Unauthorized,
    #[error("board not found: {0}")]
    BoardNotFound(Uuid),
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("not permitted on board {0}")]
    Forbidden(Uuid),
    #[error("validation failed")]
    ValidationFailed(Vec<FieldError>),
    #[error("batch of {size} exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "E_UNAUTHORIZED",
            Self::BoardNotFound(_) => "E_BOARD_NOT_FOUND",
            Self::ObjectNotFound(_) => "E_OBJECT_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::ValidationFailed(_) => "E_VALIDATION",
            Self::BatchTooLarge { .. } => "E_BATCH_TOO_LARGE",
            Self::RateLimited(_) => "E_RATE_LIMITED",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::RateLimited(_))
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::ValidationFailed(errors) => serde_json::to_value(errors).ok(),
            Self::RateLimited(e) => Some(serde_json::json!({ "retry_after_secs": e.retry_after_secs })),
            _ => None,
        }
    }
}

// =============================================================================
// AUTHORIZATION + VALIDATION
// =============================================================================

/// The board must exist. Used for reads and joins, which any
/// authenticated user may do.
///
/// # Errors
///
/// Returns `BoardNotFound` or a store error.
pub async fn require_board(state: &AppState, board_id: Uuid) -> Result<Uuid, GatewayError> {
    state
        .store
        .board_owner(board_id)
        .await?
        .ok_or(GatewayError::BoardNotFound(board_id))
}

/// The board must exist and `actor` must own it.
///
/// # Errors
///
/// Returns `BoardNotFound`, `Forbidden`, or a store error.
pub async fn authorize(state: &AppState, board_id: Uuid, actor: Uuid) -> Result<(), GatewayError> {
    let owner = require_board(state, board_id).await?;
    if owner != actor {
        return Err(GatewayError::Forbidden(board_id));
    }
    Ok(())
}

fn check_finite(errors: &mut Vec<FieldError>, field: &str, value: f64) {
    if !value.is_finite() {
        errors.push(FieldError::new(field, "must be a finite number"));
    }
}

fn check_size(errors: &mut Vec<FieldError>, field: &str, value: Option<f64>) {
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 {
            errors.push(FieldError::new(field, "must be a finite, non-negative number"));
        }
    }
}

fn check_kind(errors: &mut Vec<FieldError>, kind: &str) {
    if kind.trim().is_empty() {
        errors.push(FieldError::new("type", "must not be empty"));
    } else if kind.len() > MAX_KIND_LEN {
        errors.push(FieldError::new("type", format!("must be at most {MAX_KIND_LEN} characters")));
    }
}

fn check_data(errors: &mut Vec<FieldError>, data: &Value) {
    if !data.is_object() {
        errors.push(FieldError::new("data", "must be an object"));
    }
}

/// Field-level problems with a create payload; empty when valid.
#[must_use]
pub fn validate_input(input: &ObjectInput) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_kind(&mut errors, &input.kind);
    check_data(&mut errors, &input.data);
    check_finite(&mut errors, "x", input.x);
    check_finite(&mut errors, "y", input.y);
    check_size(&mut errors, "width", input.width);
    check_size(&mut errors, "height", input.height);
    check_finite(&mut errors, "rotation", input.rotation);
    errors
}

/// Field-level problems with an update payload; empty when valid.
#[must_use]
pub fn validate_patch(patch: &ObjectPatch) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if patch.is_empty() {
        errors.push(FieldError::new("patch", "no fields to update"));
        return errors;
    }
    if let Some(kind) = &patch.kind {
        check_kind(&mut errors, kind);
    }
    if let Some(data) = &patch.data {
        check_data(&mut errors, data);
    }
    if let Some(x) = patch.x {
        check_finite(&mut errors, "x", x);
    }
    if let Some(y) = patch.y {
        check_finite(&mut errors, "y", y);
    }
    check_size(&mut errors, "width", patch.width.flatten());
    check_size(&mut errors, "height", patch.height.flatten());
    if let Some(rotation) = patch.rotation {
        check_finite(&mut errors, "rotation", rotation);
    }
    errors
}

fn reject_invalid(errors: Vec<FieldError>) -> Result<(), GatewayError> {
    if errors.is_empty() { Ok(()) } else { Err(GatewayError::ValidationFailed(errors)) }
}

fn server_id(id: ObjectId) -> Result<Uuid, GatewayError> {
    id.as_server().ok_or(GatewayError::ObjectNotFound(id))
}

// =============================================================================
// BROADCAST
// =============================================================================

async fn announce(state: &AppState, board_id: Uuid, event: BoardEvent) {
    state.rooms.broadcast(board_id, &event.to_frame(board_id)).await;
}

async fn announce_created(state: &AppState, object: &CanvasObject, client_ref: Option<ObjectId>) {
    let event = ObjectChanged { object: object.clone(), board_id: object.board_id, timestamp: now_ms(), client_ref };
    announce(state, object.board_id, BoardEvent::ObjectCreated(event)).await;
}

async fn announce_deleted(state: &AppState, board_id: Uuid, id: Uuid) {
    let event = ObjectDeleted { id: ObjectId::Server(id), board_id, timestamp: now_ms() };
    announce(state, board_id, BoardEvent::ObjectDeleted(event)).await;
}

// =============================================================================
// SINGLE OPERATIONS
// =============================================================================

/// All objects on a board, for any authenticated caller.
///
/// # Errors
///
/// Returns `BoardNotFound` or a store error.
pub async fn list_objects(state: &AppState, board_id: Uuid) -> Result<Vec<CanvasObject>, GatewayError> {
    require_board(state, board_id).await?;
    Ok(state.store.list_by_board(board_id).await?)
}

/// # Errors
///
/// Returns `BoardNotFound`, `Forbidden`, `ValidationFailed`, or a store error.
pub async fn create_object(
    state: &AppState,
    board_id: Uuid,
    actor: Uuid,
    input: &ObjectInput,
) -> Result<CanvasObject, GatewayError> {
    authorize(state, board_id, actor).await?;
    reject_invalid(validate_input(input))?;

    let object = state.store.create(board_id, input, actor).await?;
    info!(%board_id, object_id = %object.id, kind = %object.kind, "gateway: object created");
    announce_created(state, &object, input.client_ref).await;
    Ok(object)
}

/// # Errors
///
/// Returns `ObjectNotFound` (including for placeholder ids), `BoardNotFound`,
/// `Forbidden`, `ValidationFailed`, or a store error.
pub async fn update_object(
    state: &AppState,
    board_id: Uuid,
    actor: Uuid,
    id: ObjectId,
    patch: &ObjectPatch,
) -> Result<CanvasObject, GatewayError> {
    let object_id = server_id(id)?;
    authorize(state, board_id, actor).await?;
    reject_invalid(validate_patch(patch))?;

    let object = state
        .store
        .update(board_id, object_id, patch)
        .await?
        .ok_or(GatewayError::ObjectNotFound(id))?;

    let event = ObjectChanged { object: object.clone(), board_id, timestamp: now_ms(), client_ref: None };
    announce(state, board_id, BoardEvent::ObjectUpdated(event)).await;
    Ok(object)
}

/// # Errors
///
/// Returns `ObjectNotFound`, `BoardNotFound`, `Forbidden`, or a store error.
pub async fn delete_object(state: &AppState, board_id: Uuid, actor: Uuid, id: ObjectId) -> Result<(), GatewayError> {
    let object_id = server_id(id)?;
    authorize(state, board_id, actor).await?;

    if !state.store.delete(board_id, object_id).await? {
        return Err(GatewayError::ObjectNotFound(id));
    }
    info!(%board_id, %object_id, "gateway: object deleted");
    announce_deleted(state, board_id, object_id).await;
    Ok(())
}

// =============================================================================
// BATCH OPERATIONS
// =============================================================================

fn check_batch(state: &AppState, size: usize) -> Result<(), GatewayError> {
    let limit = state.config.batch_limit;
    if size > limit {
        return Err(GatewayError::BatchTooLarge { size, limit });
    }
    Ok(())
}

/// Create many objects; each item succeeds or fails on its own.
///
/// # Errors
///
/// Fails as a whole only for `BatchTooLarge`, `BoardNotFound`, `Forbidden`,
/// or a store error during authorization.
pub async fn create_batch(
    state: &AppState,
    board_id: Uuid,
    actor: Uuid,
    inputs: &[ObjectInput],
) -> Result<BatchCreateResult, GatewayError> {
    check_batch(state, inputs.len())?;
    authorize(state, board_id, actor).await?;

    let mut results = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let errors = validate_input(input);
        if !errors.is_empty() {
            results.push(CreateOutcome::Rejected { index, errors });
            continue;
        }
        match state.store.create(board_id, input, actor).await {
            Ok(object) => {
                announce_created(state, &object, input.client_ref).await;
                results.push(CreateOutcome::Created { object });
            }
            Err(e) => {
                warn!(%board_id, index, error = %e, "gateway: batch create item failed");
                results.push(CreateOutcome::Failed { index, message: e.to_string() });
            }
        }
    }

    let created = results
        .iter()
        .filter(|r| matches!(r, CreateOutcome::Created { .. }))
        .count();
    info!(%board_id, requested = inputs.len(), created, "gateway: batch create");
    Ok(BatchCreateResult { results })
}

/// Delete many objects; each item succeeds or fails on its own.
///
/// # Errors
///
/// Fails as a whole only for `BatchTooLarge`, `BoardNotFound`, `Forbidden`,
/// or a store error during authorization.
pub async fn delete_batch(
    state: &AppState,
    board_id: Uuid,
    actor: Uuid,
    ids: &[ObjectId],
) -> Result<BatchDeleteResult, GatewayError> {
    check_batch(state, ids.len())?;
    authorize(state, board_id, actor).await?;

    let mut results = Vec::with_capacity(ids.len());
    let mut deleted = 0;
    for &id in ids {
        let Some(object_id) = id.as_server() else {
            results.push(DeleteOutcome::NotFound { id });
            continue;
        };
        match state.store.delete(board_id, object_id).await {
            Ok(true) => {
                deleted += 1;
                announce_deleted(state, board_id, object_id).await;
                results.push(DeleteOutcome::Deleted { id });
            }
            Ok(false) => results.push(DeleteOutcome::NotFound { id }),
            Err(e) => {
                warn!(%board_id, %object_id, error = %e, "gateway: batch delete item failed");
                results.push(DeleteOutcome::Failed { id, message: e.to_string() });
            }
        }
    }

    info!(%board_id, requested = ids.len(), deleted, "gateway: batch delete");
    Ok(BatchDeleteResult { deleted, results })
}
