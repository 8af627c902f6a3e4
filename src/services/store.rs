//! Object store seam: durable boards and objects.
//!
//! DESIGN
//! ======
//! `ObjectStore` is the only way the gateway touches persistence. The
//! Postgres adapter lives in `pg_store`; tests use the in-memory store in
//! `state::test_helpers`.
//!
//! Every successful write returns the row as committed, including the
//! `updated_at` the store stamped. Stamps never move backward per object.

use async_trait::async_trait;
use frames::{CanvasObject, ErrorCode, ObjectInput, ObjectPatch};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// Row returned from board queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardRow {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Owner of `board_id`, or `None` when the board does not exist.
    async fn board_owner(&self, board_id: Uuid) -> Result<Option<Uuid>, StoreError>;

    async fn create_board(&self, name: &str, owner_id: Uuid) -> Result<BoardRow, StoreError>;

    /// Boards owned by `owner_id`, newest first.
    async fn list_boards(&self, owner_id: Uuid) -> Result<Vec<BoardRow>, StoreError>;

    async fn create(&self, board_id: Uuid, input: &ObjectInput, created_by: Uuid) -> Result<CanvasObject, StoreError>;

    async fn get(&self, board_id: Uuid, id: Uuid) -> Result<Option<CanvasObject>, StoreError>;

    /// All objects on a board in draw order.
    async fn list_by_board(&self, board_id: Uuid) -> Result<Vec<CanvasObject>, StoreError>;

    /// Apply `patch`; `None` when the object is not on this board.
    async fn update(&self, board_id: Uuid, id: Uuid, patch: &ObjectPatch) -> Result<Option<CanvasObject>, StoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, board_id: Uuid, id: Uuid) -> Result<bool, StoreError>;
}
