//! Board bootstrap routes: create and list the caller's boards.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::info;

use crate::routes::auth::AuthUser;
use crate::services::gateway::GatewayError;
use crate::services::store::BoardRow;
use crate::state::AppState;

const DEFAULT_BOARD_NAME: &str = "Untitled Board";

#[derive(Deserialize, Default)]
pub struct CreateBoardBody {
    #[serde(default)]
    pub name: Option<String>,
}

fn board_name(body: &CreateBoardBody) -> &str {
    body.name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_BOARD_NAME)
}

/// `POST /api/boards`. The caller becomes the owner.
pub async fn create_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateBoardBody>,
) -> Result<(StatusCode, Json<BoardRow>), GatewayError> {
    let owner_id = auth.identity.user_id;
    let row = state.store.create_board(board_name(&body), owner_id).await?;
    info!(board_id = %row.id, %owner_id, "rest: board created");
    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/boards`: boards the caller owns.
pub async fn list_boards(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<BoardRow>>, GatewayError> {
    Ok(Json(state.store.list_boards(auth.identity.user_id).await?))
}

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
