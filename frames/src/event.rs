//! Syscall names and typed payloads for the board sync protocol.
//!
//! Requests flow client → server; events flow server → client as
//! `Status::Request` frames with no parent. `BoardEvent` is the closed set
//! of events a client must handle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::object::{CanvasObject, FieldError, ObjectId, ObjectInput, ObjectPatch};
use crate::presence::{CursorState, PresenceDescriptor};
use crate::Frame;

// =============================================================================
// SYSCALLS
// =============================================================================

pub const SESSION_CONNECTED: &str = "session:connected";

pub const BOARD_JOIN: &str = "board:join";
pub const BOARD_LEAVE: &str = "board:leave";
pub const CURSOR_MOVE: &str = "cursor:move";

pub const OBJECT_CREATE: &str = "object:create";
pub const OBJECT_UPDATE: &str = "object:update";
pub const OBJECT_DELETE: &str = "object:delete";
pub const OBJECT_CREATE_BATCH: &str = "object:create:batch";
pub const OBJECT_DELETE_BATCH: &str = "object:delete:batch";

pub const OBJECTS_LIST: &str = "objects:list";
pub const OBJECT_CREATED: &str = "object:created";
pub const OBJECT_UPDATED: &str = "object:updated";
pub const OBJECT_DELETED: &str = "object:deleted";
pub const USERS_LIST: &str = "users:list";
pub const USER_JOINED: &str = "user:joined";
pub const USER_LEFT: &str = "user:left";
pub const CURSOR_UPDATE: &str = "cursor:update";

// =============================================================================
// REQUEST PAYLOADS
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub board_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub board_id: Uuid,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorMove {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: ObjectId,
    #[serde(flatten)]
    pub patch: ObjectPatch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: ObjectId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchCreateRequest {
    pub objects: Vec<ObjectInput>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<ObjectId>,
}

// =============================================================================
// BATCH RESULTS
// =============================================================================

/// Per-item result of a batch create.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CreateOutcome {
    Created { object: CanvasObject },
    Rejected { index: usize, errors: Vec<FieldError> },
    Failed { index: usize, message: String },
}

/// Per-item result of a batch delete.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted { id: ObjectId },
    NotFound { id: ObjectId },
    Failed { id: ObjectId, message: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchCreateResult {
    pub results: Vec<CreateOutcome>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchDeleteResult {
    pub deleted: usize,
    pub results: Vec<DeleteOutcome>,
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectsList {
    pub objects: Vec<CanvasObject>,
    pub board_id: Uuid,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectChanged {
    pub object: CanvasObject,
    pub board_id: Uuid,
    pub timestamp: i64,
    /// Placeholder id from the originating create, if it sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<ObjectId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectDeleted {
    pub id: ObjectId,
    pub board_id: Uuid,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsersList {
    pub users: Vec<PresenceDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserJoined {
    pub user: PresenceDescriptor,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserLeft {
    pub user_id: Uuid,
}

/// Every server → client event.
#[derive(Clone, Debug, PartialEq)]
pub enum BoardEvent {
    ObjectsList(ObjectsList),
    ObjectCreated(ObjectChanged),
    ObjectUpdated(ObjectChanged),
    ObjectDeleted(ObjectDeleted),
    UsersList(UsersList),
    UserJoined(UserJoined),
    UserLeft(UserLeft),
    CursorUpdate(CursorState),
}

impl BoardEvent {
    #[must_use]
    pub fn syscall(&self) -> &'static str {
        match self {
            Self::ObjectsList(_) => OBJECTS_LIST,
            Self::ObjectCreated(_) => OBJECT_CREATED,
            Self::ObjectUpdated(_) => OBJECT_UPDATED,
            Self::ObjectDeleted(_) => OBJECT_DELETED,
            Self::UsersList(_) => USERS_LIST,
            Self::UserJoined(_) => USER_JOINED,
            Self::UserLeft(_) => USER_LEFT,
            Self::CursorUpdate(_) => CURSOR_UPDATE,
        }
    }

    fn payload(&self) -> Value {
        let value = match self {
            Self::ObjectsList(p) => serde_json::to_value(p),
            Self::ObjectCreated(p) | Self::ObjectUpdated(p) => serde_json::to_value(p),
            Self::ObjectDeleted(p) => serde_json::to_value(p),
            Self::UsersList(p) => serde_json::to_value(p),
            Self::UserJoined(p) => serde_json::to_value(p),
            Self::UserLeft(p) => serde_json::to_value(p),
            Self::CursorUpdate(p) => serde_json::to_value(p),
        };
        value.unwrap_or_default()
    }

    /// Wrap the event in a push frame scoped to `board_id`.
    #[must_use]
    pub fn to_frame(&self, board_id: Uuid) -> Frame {
        Frame::request(self.syscall(), self.payload()).with_board_id(board_id)
    }

    /// Parse an inbound frame. `Ok(None)` means the syscall is not an event
    /// (for example a reply to one of our own requests).
    ///
    /// # Errors
    ///
    /// Returns the serde error when the syscall is known but the payload
    /// does not match its shape.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>, serde_json::Error> {
        let data = frame.data.clone();
        let event = match frame.syscall.as_str() {
            OBJECTS_LIST => Self::ObjectsList(serde_json::from_value(data)?),
            OBJECT_CREATED => Self::ObjectCreated(serde_json::from_value(data)?),
            OBJECT_UPDATED => Self::ObjectUpdated(serde_json::from_value(data)?),
            OBJECT_DELETED => Self::ObjectDeleted(serde_json::from_value(data)?),
            USERS_LIST => Self::UsersList(serde_json::from_value(data)?),
            USER_JOINED => Self::UserJoined(serde_json::from_value(data)?),
            USER_LEFT => Self::UserLeft(serde_json::from_value(data)?),
            CURSOR_UPDATE => Self::CursorUpdate(serde_json::from_value(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
