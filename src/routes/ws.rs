//! WebSocket handler: realtime board sync over protobuf frames.
//!
//! DESIGN
//! ======
//! On upgrade, resolves the bearer credential, generates a client id and
//! enters a `select!` loop:
//! - Incoming binary frames → decode + dispatch by syscall
//! - Frames queued for this connection by rooms → forward to client
//!
//! Object mutations go through the mutation gateway, which broadcasts the
//! committed result to the room (the sender included). Handlers return an
//! `Outcome` describing only the direct reply to the sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade (401 without a valid token) → send `session:connected`
//! 2. `board:join` → room + presence membership, roster and full object list
//! 3. Client sends frames → dispatch → reply
//! 4. Close → for every joined board: room leave, presence leave, `user:left`

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use frames::{
    BOARD_JOIN, BOARD_LEAVE, BatchCreateRequest, BatchDeleteRequest, BoardEvent, CURSOR_MOVE, CursorMove,
    CursorState, DeleteRequest, FieldError, Frame, OBJECT_CREATE, OBJECT_CREATE_BATCH, OBJECT_DELETE,
    OBJECT_DELETE_BATCH, OBJECT_UPDATE, ObjectInput, ObjectsList, SESSION_CONNECTED, Status, UpdateRequest,
    UserJoined, UserLeft, UsersList, now_ms,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::routes::auth::{authenticate, bearer_token};
use crate::services::gateway::{self, GatewayError};
use crate::services::presence::resolve_descriptor;
use crate::services::session::Identity;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

/// What the sender gets back for one request.
enum Outcome {
    /// `done` carrying a payload.
    Reply(Value),
    /// Empty `done`.
    Done,
    /// Several frames in order, the first normally the `done`.
    Frames(Vec<Frame>),
    /// Nothing. Cursor moves never reply.
    Silent,
}

/// Per-connection state owned by the connection task.
struct Connection {
    client_id: Uuid,
    identity: Identity,
    tx: mpsc::Sender<Frame>,
    joined: HashSet<Uuid>,
}

impl Connection {
    fn user_id(&self) -> Uuid {
        self.identity.user_id
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .get("token")
        .map(String::as_str)
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers));

    let identity = match authenticate(&state, token).await {
        Ok(identity) => identity,
        Err(GatewayError::Unauthorized) => return (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response(),
        Err(e) => {
            error!(error = %e, "ws: credential resolution failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "credential resolution error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity) {
    let client_id = Uuid::new_v4();
    let user_id = identity.user_id;
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);

    let welcome = Frame::request(
        SESSION_CONNECTED,
        serde_json::json!({ "client_id": client_id, "user_id": user_id }),
    );
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(%client_id, %user_id, "ws: client connected");

    let mut conn = Connection { client_id, identity, tx: client_tx, joined: HashSet::new() };

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        for frame in process_inbound(&state, &mut conn, &bytes).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Text(_) => {
                        let err = Frame::request("gateway:error", serde_json::json!({ "message": "binary frames required" }));
                        let _ = send_frame(&mut socket, &err).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, &mut conn).await;
    info!(%client_id, %user_id, "ws: client disconnected");
}

/// Leave every joined board. Runs on clean and abrupt disconnects alike.
async fn disconnect(state: &AppState, conn: &mut Connection) {
    for board_id in std::mem::take(&mut conn.joined) {
        leave_board(state, board_id, conn.client_id, conn.user_id()).await;
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and process one inbound binary frame and return frames for the sender.
async fn process_inbound(state: &AppState, conn: &mut Connection, bytes: &[u8]) -> Vec<Frame> {
    let mut req = match frames::decode_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", serde_json::json!({ "message": format!("invalid frame: {e}") }));
            return vec![err];
        }
    };
    req.from = Some(conn.user_id().to_string());

    let is_cursor = req.syscall == CURSOR_MOVE;
    if !is_cursor {
        info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match req.syscall.as_str() {
        BOARD_JOIN => handle_join(state, conn, &req).await,
        BOARD_LEAVE => handle_leave(state, conn, &req).await,
        CURSOR_MOVE => Ok(handle_cursor(state, conn, &req).await),
        OBJECT_CREATE | OBJECT_UPDATE | OBJECT_DELETE | OBJECT_CREATE_BATCH | OBJECT_DELETE_BATCH => {
            handle_object(state, conn, &req).await
        }
        other => Err(req.error(format!("unknown syscall: {other}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Frames(frames)) => frames,
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

fn parse_data<T: DeserializeOwned>(req: &Frame) -> Result<T, Frame> {
    serde_json::from_value(req.data.clone()).map_err(|e| {
        let err = GatewayError::ValidationFailed(vec![FieldError::new("data", e.to_string())]);
        req.error_from(&err)
    })
}

fn require_board_id(req: &Frame) -> Result<Uuid, Frame> {
    req.board_uuid().ok_or_else(|| req.error("board_id required"))
}

// =============================================================================
// BOARD HANDLERS
// =============================================================================

async fn handle_join(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    let board_id = require_board_id(req)?;
    gateway::require_board(state, board_id)
        .await
        .map_err(|e| req.error_from(&e))?;

    // Join the room before reading the snapshot. Replies are written before
    // the connection channel is drained, so the snapshot precedes any
    // broadcast queued since the join. A repeated join only resynchronizes.
    let newly_joined = conn.joined.insert(board_id);
    if newly_joined {
        let name = req.data.get("display_name").and_then(Value::as_str);
        let color = req.data.get("color").and_then(Value::as_str);
        let descriptor = resolve_descriptor(&conn.identity, name, color);

        state.rooms.join(board_id, conn.client_id, conn.tx.clone()).await;
        let newly_present = state.presence.join(board_id, descriptor.clone());

        let roster = BoardEvent::UsersList(UsersList { users: state.presence.list(board_id) }).to_frame(board_id);
        state.rooms.broadcast_except(board_id, &roster, Some(conn.client_id)).await;
        if newly_present {
            let joined = BoardEvent::UserJoined(UserJoined { user: descriptor }).to_frame(board_id);
            state.rooms.broadcast_except(board_id, &joined, Some(conn.client_id)).await;
        }
    }

    let objects = match gateway::list_objects(state, board_id).await {
        Ok(objects) => objects,
        Err(e) => {
            if newly_joined {
                conn.joined.remove(&board_id);
                leave_board(state, board_id, conn.client_id, conn.user_id()).await;
            }
            return Err(req.error_from(&e));
        }
    };
    if newly_joined {
        info!(client_id = %conn.client_id, user_id = %conn.user_id(), %board_id, count = objects.len(), "ws: joined board");
    }

    let roster = BoardEvent::UsersList(UsersList { users: state.presence.list(board_id) });
    let list = BoardEvent::ObjectsList(ObjectsList { objects, board_id, timestamp: now_ms() });
    Ok(Outcome::Frames(vec![
        req.done_with(serde_json::json!({ "board_id": board_id })),
        roster.to_frame(board_id),
        list.to_frame(board_id),
    ]))
}

async fn handle_leave(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    let board_id = require_board_id(req)?;
    if conn.joined.remove(&board_id) {
        leave_board(state, board_id, conn.client_id, conn.user_id()).await;
    }
    Ok(Outcome::Done)
}

/// Room leave, presence leave, and `user:left` once the user's last
/// connection on the board is gone.
async fn leave_board(state: &AppState, board_id: Uuid, client_id: Uuid, user_id: Uuid) {
    state.rooms.leave(board_id, client_id).await;
    if state.presence.leave(board_id, user_id) {
        let left = BoardEvent::UserLeft(UserLeft { user_id }).to_frame(board_id);
        state.rooms.broadcast(board_id, &left).await;
    }
    info!(%client_id, %user_id, %board_id, "ws: left board");
}

// =============================================================================
// CURSOR HANDLER
// =============================================================================

async fn handle_cursor(state: &AppState, conn: &Connection, req: &Frame) -> Outcome {
    let Some(board_id) = req.board_uuid().filter(|b| conn.joined.contains(b)) else {
        return Outcome::Silent;
    };
    let Some(descriptor) = state.presence.get(board_id, conn.user_id()) else {
        return Outcome::Silent;
    };
    let Ok(pos) = serde_json::from_value::<CursorMove>(req.data.clone()) else {
        debug!(client_id = %conn.client_id, "ws: malformed cursor move dropped");
        return Outcome::Silent;
    };

    let cursor = CursorState {
        user_id: descriptor.user_id,
        x: pos.x,
        y: pos.y,
        display_name: descriptor.display_name,
        color: descriptor.color,
    };
    let frame = BoardEvent::CursorUpdate(cursor).to_frame(board_id);
    state.rooms.broadcast_except(board_id, &frame, Some(conn.client_id)).await;
    Outcome::Silent
}

// =============================================================================
// OBJECT HANDLERS
// =============================================================================

fn reply<T: serde::Serialize>(value: &T) -> Outcome {
    Outcome::Reply(serde_json::to_value(value).unwrap_or_default())
}

async fn handle_object(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let board_id = require_board_id(req)?;
    let actor = conn.user_id();
    state
        .rate_limiter
        .check_and_record(actor)
        .map_err(|e| req.error_from(&GatewayError::from(e)))?;

    let outcome = match req.syscall.as_str() {
        OBJECT_CREATE => {
            let input: ObjectInput = parse_data(req)?;
            gateway::create_object(state, board_id, actor, &input).await.map(|o| reply(&o))
        }
        OBJECT_UPDATE => {
            let body: UpdateRequest = parse_data(req)?;
            gateway::update_object(state, board_id, actor, body.id, &body.patch)
                .await
                .map(|o| reply(&o))
        }
        OBJECT_DELETE => {
            let body: DeleteRequest = parse_data(req)?;
            gateway::delete_object(state, board_id, actor, body.id)
                .await
                .map(|()| reply(&body))
        }
        OBJECT_CREATE_BATCH => {
            let body: BatchCreateRequest = parse_data(req)?;
            gateway::create_batch(state, board_id, actor, &body.objects).await.map(|r| reply(&r))
        }
        OBJECT_DELETE_BATCH => {
            let body: BatchDeleteRequest = parse_data(req)?;
            gateway::delete_batch(state, board_id, actor, &body.ids).await.map(|r| reply(&r))
        }
        other => return Err(req.error(format!("unknown object op: {other}"))),
    };
    outcome.map_err(|e| req.error_from(&e))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let is_cursor = frame.syscall.starts_with("cursor:");
    if !is_cursor {
        if frame.status == Status::Error {
            let code = frame.error_code().unwrap_or("-");
            let message = frame
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
        } else {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    socket
        .send(Message::Binary(frames::encode_frame(frame).into()))
        .await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
