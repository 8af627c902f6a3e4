//! Postgres-backed `ObjectStore`.
//!
//! Timestamps are stamped by the database at commit (`clock_timestamp()`),
//! not at request arrival, and updates use
//! `GREATEST(clock_timestamp(), updated_at)` so a row's stamp never moves
//! backward even if the database clock does. Values leave the database as
//! epoch milliseconds.

use async_trait::async_trait;
use frames::{CanvasObject, ObjectId, ObjectInput, ObjectPatch};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::store::{BoardRow, ObjectStore, StoreError};

const OBJECT_COLUMNS: &str = "id, board_id, kind, data, x, y, width, height, rotation, z_index, \
     (extract(epoch FROM created_at) * 1000)::bigint AS created_ms, \
     (extract(epoch FROM updated_at) * 1000)::bigint AS updated_ms";

const BOARD_COLUMNS: &str = "id, name, owner_id, (extract(epoch FROM created_at) * 1000)::bigint AS created_ms";

#[derive(Clone)]
pub struct PgObjectStore {
    pool: PgPool,
}

impl PgObjectStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn object_from_row(row: &PgRow) -> Result<CanvasObject, sqlx::Error> {
    Ok(CanvasObject {
        id: ObjectId::Server(row.try_get("id")?),
        board_id: row.try_get("board_id")?,
        kind: row.try_get("kind")?,
        data: row.try_get("data")?,
        x: row.try_get("x")?,
        y: row.try_get("y")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        rotation: row.try_get("rotation")?,
        z_index: row.try_get("z_index")?,
        created_at: row.try_get("created_ms")?,
        updated_at: row.try_get("updated_ms")?,
    })
}

fn board_from_row(row: &PgRow) -> Result<BoardRow, sqlx::Error> {
    Ok(BoardRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_ms")?,
    })
}

#[async_trait]
impl ObjectStore for PgObjectStore {
    async fn board_owner(&self, board_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let owner = sqlx::query_scalar::<_, Uuid>("SELECT owner_id FROM boards WHERE id = $1")
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner)
    }

    async fn create_board(&self, name: &str, owner_id: Uuid) -> Result<BoardRow, StoreError> {
        let sql = format!("INSERT INTO boards (id, name, owner_id) VALUES ($1, $2, $3) RETURNING {BOARD_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(board_from_row(&row)?)
    }

    async fn list_boards(&self, owner_id: Uuid) -> Result<Vec<BoardRow>, StoreError> {
        let sql = format!("SELECT {BOARD_COLUMNS} FROM boards WHERE owner_id = $1 ORDER BY created_at DESC");
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(board_from_row).collect::<Result<_, _>>()?)
    }

    async fn create(&self, board_id: Uuid, input: &ObjectInput, created_by: Uuid) -> Result<CanvasObject, StoreError> {
        let sql = format!(
            "INSERT INTO board_objects
                 (id, board_id, kind, data, x, y, width, height, rotation, z_index, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {OBJECT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(board_id)
            .bind(&input.kind)
            .bind(&input.data)
            .bind(input.x)
            .bind(input.y)
            .bind(input.width)
            .bind(input.height)
            .bind(input.rotation)
            .bind(input.z_index)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await?;
        Ok(object_from_row(&row)?)
    }

    async fn get(&self, board_id: Uuid, id: Uuid) -> Result<Option<CanvasObject>, StoreError> {
        let sql = format!("SELECT {OBJECT_COLUMNS} FROM board_objects WHERE board_id = $1 AND id = $2");
        let row = sqlx::query(&sql)
            .bind(board_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(object_from_row).transpose()?)
    }

    async fn list_by_board(&self, board_id: Uuid) -> Result<Vec<CanvasObject>, StoreError> {
        let sql = format!("SELECT {OBJECT_COLUMNS} FROM board_objects WHERE board_id = $1 ORDER BY z_index, id");
        let rows = sqlx::query(&sql)
            .bind(board_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(object_from_row).collect::<Result<_, _>>()?)
    }

    async fn update(&self, board_id: Uuid, id: Uuid, patch: &ObjectPatch) -> Result<Option<CanvasObject>, StoreError> {
        // width/height: the flag says whether the patch touches the column,
        // so an explicit null can clear it.
        let sql = format!(
            "UPDATE board_objects SET
                 kind = COALESCE($3, kind),
                 data = COALESCE($4, data),
                 x = COALESCE($5, x),
                 y = COALESCE($6, y),
                 width = CASE WHEN $7 THEN $8 ELSE width END,
                 height = CASE WHEN $9 THEN $10 ELSE height END,
                 rotation = COALESCE($11, rotation),
                 z_index = COALESCE($12, z_index),
                 updated_at = GREATEST(clock_timestamp(), updated_at)
             WHERE board_id = $1 AND id = $2
             RETURNING {OBJECT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(board_id)
            .bind(id)
            .bind(patch.kind.as_deref())
            .bind(patch.data.as_ref())
            .bind(patch.x)
            .bind(patch.y)
            .bind(patch.width.is_some())
            .bind(patch.width.flatten())
            .bind(patch.height.is_some())
            .bind(patch.height.flatten())
            .bind(patch.rotation)
            .bind(patch.z_index)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(object_from_row).transpose()?)
    }

    async fn delete(&self, board_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM board_objects WHERE board_id = $1 AND id = $2")
            .bind(board_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
