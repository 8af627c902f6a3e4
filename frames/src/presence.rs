//! Presence and cursor payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is on a board and how to draw them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceDescriptor {
    pub user_id: Uuid,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Hex colour, e.g. `#3b82f6`.
    pub color: String,
}

/// A peer's pointer position in board coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub user_id: Uuid,
    pub x: f64,
    pub y: f64,
    pub display_name: String,
    pub color: String,
}
