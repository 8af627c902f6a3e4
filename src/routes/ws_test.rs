use super::*;
use std::sync::Arc;

use crate::services::rooms::RoomBroadcaster;
use crate::services::store::{BoardRow, ObjectStore, StoreError};
use crate::state::test_helpers::{
    MemoryStore, StaticCredentials, TestApp, identity, login, seed_board, sticky_input, test_app, test_app_with,
    test_config,
};
use crate::config::ServerConfig;
use frames::{
    CURSOR_UPDATE, CanvasObject, OBJECT_CREATED, OBJECT_DELETED, OBJECTS_LIST, ObjectChanged, ObjectId, ObjectInput,
    ObjectPatch, USER_JOINED, USER_LEFT, USERS_LIST,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn connection(identity: Identity) -> (Connection, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(64);
    let conn = Connection { client_id: Uuid::new_v4(), identity, tx, joined: HashSet::new() };
    (conn, rx)
}

fn request_bytes(board_id: Uuid, syscall: &str, data: Value) -> Vec<u8> {
    frames::encode_frame(&Frame::request(syscall, data).with_board_id(board_id))
}

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("broadcast receive timed out")
        .expect("broadcast channel closed unexpectedly")
}

async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no broadcast frame"
    );
}

async fn join(state: &AppState, conn: &mut Connection, board_id: Uuid) -> Vec<Frame> {
    process_inbound(state, conn, &request_bytes(board_id, BOARD_JOIN, json!({ "board_id": board_id }))).await
}

struct Board {
    app: TestApp,
    board_id: Uuid,
    owner: Identity,
    guest: Identity,
}

async fn board() -> Board {
    let app = test_app();
    let owner = login(&app, "owner-token", "Ada");
    let guest = login(&app, "guest-token", "Grace");
    let board_id = seed_board(&app.state, owner.user_id).await;
    Board { app, board_id, owner, guest }
}

// =============================================================================
// JOIN / LEAVE / DISCONNECT
// =============================================================================

#[tokio::test]
async fn join_replies_done_roster_and_full_object_list() {
    let b = board().await;
    let state = &b.app.state;
    gateway::create_object(state, b.board_id, b.owner.user_id, &sticky_input(1.0, 2.0))
        .await
        .unwrap();
    let (mut conn, _rx) = connection(b.owner.clone());

    let frames = join(state, &mut conn, b.board_id).await;
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].syscall, BOARD_JOIN);

    let BoardEvent::UsersList(roster) = BoardEvent::from_frame(&frames[1]).unwrap().unwrap() else {
        panic!("expected users:list");
    };
    assert_eq!(roster.users.len(), 1);
    assert_eq!(roster.users[0].display_name, "Ada");

    assert_eq!(frames[2].syscall, OBJECTS_LIST);
    let BoardEvent::ObjectsList(list) = BoardEvent::from_frame(&frames[2]).unwrap().unwrap() else {
        panic!("expected objects:list");
    };
    assert_eq!(list.board_id, b.board_id);
    assert_eq!(list.objects.len(), 1);
    assert_eq!(state.rooms.member_count(b.board_id).await, 1);
}

/// Commits and broadcasts a new object right after the board snapshot is
/// read, the way a concurrent writer would.
struct CreateDuringList {
    inner: Arc<MemoryStore>,
    rooms: RoomBroadcaster,
    writer: Uuid,
}

#[async_trait::async_trait]
impl ObjectStore for CreateDuringList {
    async fn board_owner(&self, board_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        self.inner.board_owner(board_id).await
    }

    async fn create_board(&self, name: &str, owner_id: Uuid) -> Result<BoardRow, StoreError> {
        self.inner.create_board(name, owner_id).await
    }

    async fn list_boards(&self, owner_id: Uuid) -> Result<Vec<BoardRow>, StoreError> {
        self.inner.list_boards(owner_id).await
    }

    async fn create(&self, board_id: Uuid, input: &ObjectInput, created_by: Uuid) -> Result<CanvasObject, StoreError> {
        self.inner.create(board_id, input, created_by).await
    }

    async fn get(&self, board_id: Uuid, id: Uuid) -> Result<Option<CanvasObject>, StoreError> {
        self.inner.get(board_id, id).await
    }

    async fn list_by_board(&self, board_id: Uuid) -> Result<Vec<CanvasObject>, StoreError> {
        let snapshot = self.inner.list_by_board(board_id).await?;
        let object = self.inner.create(board_id, &sticky_input(5.5, 5.5), self.writer).await?;
        let event = BoardEvent::ObjectCreated(ObjectChanged { board_id, timestamp: now_ms(), object, client_ref: None });
        self.rooms.broadcast(board_id, &event.to_frame(board_id)).await;
        Ok(snapshot)
    }

    async fn update(&self, board_id: Uuid, id: Uuid, patch: &ObjectPatch) -> Result<Option<CanvasObject>, StoreError> {
        self.inner.update(board_id, id, patch).await
    }

    async fn delete(&self, board_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(board_id, id).await
    }
}

#[tokio::test]
async fn object_created_while_snapshot_is_read_reaches_joiner() {
    let inner = Arc::new(MemoryStore::default());
    let owner = identity("Ada");
    let board_id = inner.create_board("Race", owner.user_id).await.unwrap().id;
    let rooms = RoomBroadcaster::new();
    let store = Arc::new(CreateDuringList { inner, rooms: rooms.clone(), writer: owner.user_id });
    let state = AppState::new(store, Arc::new(StaticCredentials::default()), rooms, test_config());
    let (mut conn, mut rx) = connection(owner);

    let frames = join(&state, &mut conn, board_id).await;
    let BoardEvent::ObjectsList(list) = BoardEvent::from_frame(&frames[2]).unwrap().unwrap() else {
        panic!("expected objects:list");
    };
    assert!(list.objects.is_empty());
    assert_eq!(recv_frame(&mut rx).await.syscall, OBJECT_CREATED);
}

#[tokio::test]
async fn join_missing_board_errors() {
    let b = board().await;
    let (mut conn, _rx) = connection(b.owner.clone());
    let frames = join(&b.app.state, &mut conn, Uuid::new_v4()).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].error_code(), Some("E_BOARD_NOT_FOUND"));
    assert!(conn.joined.is_empty());
}

#[tokio::test]
async fn join_open_to_non_owner() {
    let b = board().await;
    let (mut conn, _rx) = connection(b.guest.clone());
    let frames = join(&b.app.state, &mut conn, b.board_id).await;
    assert_eq!(frames[0].status, Status::Done);
}

#[tokio::test]
async fn join_uses_requested_name_and_color() {
    let b = board().await;
    let (mut conn, _rx) = connection(b.owner.clone());
    let data = json!({ "board_id": b.board_id, "display_name": "Captain", "color": "#000000" });
    process_inbound(&b.app.state, &mut conn, &request_bytes(b.board_id, BOARD_JOIN, data)).await;

    let descriptor = b.app.state.presence.get(b.board_id, b.owner.user_id).unwrap();
    assert_eq!(descriptor.display_name, "Captain");
    assert_eq!(descriptor.color, "#000000");
}

#[tokio::test]
async fn second_user_join_notifies_first() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, mut a_rx) = connection(b.owner.clone());
    let (mut g, _g_rx) = connection(b.guest.clone());

    join(state, &mut a, b.board_id).await;
    assert_no_frame(&mut a_rx).await;

    let frames = join(state, &mut g, b.board_id).await;
    let BoardEvent::UsersList(roster) = BoardEvent::from_frame(&frames[1]).unwrap().unwrap() else {
        panic!("expected users:list");
    };
    assert_eq!(roster.users.len(), 2);

    let roster = recv_frame(&mut a_rx).await;
    assert_eq!(roster.syscall, USERS_LIST);
    let joined = recv_frame(&mut a_rx).await;
    assert_eq!(joined.syscall, USER_JOINED);
    let BoardEvent::UserJoined(joined) = BoardEvent::from_frame(&joined).unwrap().unwrap() else {
        panic!("expected user:joined");
    };
    assert_eq!(joined.user.user_id, b.guest.user_id);
}

#[tokio::test]
async fn repeated_join_resyncs_without_duplicate_presence() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, _a_rx) = connection(b.owner.clone());
    let (mut g, mut g_rx) = connection(b.guest.clone());
    join(state, &mut g, b.board_id).await;
    join(state, &mut a, b.board_id).await;
    recv_frame(&mut g_rx).await;
    recv_frame(&mut g_rx).await;

    let frames = join(state, &mut a, b.board_id).await;
    assert_eq!(frames.len(), 3);
    assert_no_frame(&mut g_rx).await;

    disconnect(state, &mut a).await;
    assert_eq!(recv_frame(&mut g_rx).await.syscall, USER_LEFT);
    assert_eq!(state.presence.list(b.board_id).len(), 1);
}

#[tokio::test]
async fn disconnect_sends_user_left_and_cleans_up() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, mut a_rx) = connection(b.owner.clone());
    let (mut g, _g_rx) = connection(b.guest.clone());
    join(state, &mut a, b.board_id).await;
    join(state, &mut g, b.board_id).await;
    recv_frame(&mut a_rx).await;
    recv_frame(&mut a_rx).await;

    disconnect(state, &mut g).await;

    let left = recv_frame(&mut a_rx).await;
    let BoardEvent::UserLeft(left) = BoardEvent::from_frame(&left).unwrap().unwrap() else {
        panic!("expected user:left");
    };
    assert_eq!(left.user_id, b.guest.user_id);
    assert_eq!(state.presence.list(b.board_id).len(), 1);
    assert_eq!(state.rooms.member_count(b.board_id).await, 1);
    assert!(g.joined.is_empty());
}

#[tokio::test]
async fn second_tab_of_same_user_keeps_presence() {
    let b = board().await;
    let state = &b.app.state;
    let (mut g, mut g_rx) = connection(b.guest.clone());
    let (mut tab1, _) = connection(b.owner.clone());
    let (mut tab2, _) = connection(b.owner.clone());
    join(state, &mut g, b.board_id).await;
    join(state, &mut tab1, b.board_id).await;
    assert_eq!(recv_frame(&mut g_rx).await.syscall, USERS_LIST);
    assert_eq!(recv_frame(&mut g_rx).await.syscall, USER_JOINED);

    join(state, &mut tab2, b.board_id).await;
    assert_eq!(recv_frame(&mut g_rx).await.syscall, USERS_LIST);
    assert_no_frame(&mut g_rx).await;

    disconnect(state, &mut tab1).await;
    assert_no_frame(&mut g_rx).await;
    assert!(state.presence.get(b.board_id, b.owner.user_id).is_some());

    disconnect(state, &mut tab2).await;
    assert_eq!(recv_frame(&mut g_rx).await.syscall, USER_LEFT);
}

#[tokio::test]
async fn leave_removes_membership() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, _rx) = connection(b.owner.clone());
    join(state, &mut a, b.board_id).await;

    let frames = process_inbound(state, &mut a, &request_bytes(b.board_id, BOARD_LEAVE, json!({ "board_id": b.board_id }))).await;
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(state.rooms.member_count(b.board_id).await, 0);
    assert!(state.presence.list(b.board_id).is_empty());
}

// =============================================================================
// CURSOR
// =============================================================================

#[tokio::test]
async fn cursor_move_reaches_peers_not_sender() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, mut a_rx) = connection(b.owner.clone());
    let (mut g, mut g_rx) = connection(b.guest.clone());
    join(state, &mut a, b.board_id).await;
    join(state, &mut g, b.board_id).await;
    recv_frame(&mut a_rx).await;
    recv_frame(&mut a_rx).await;

    let frames = process_inbound(state, &mut a, &request_bytes(b.board_id, CURSOR_MOVE, json!({ "x": 10.5, "y": 20.5 }))).await;
    assert!(frames.is_empty());

    let update = recv_frame(&mut g_rx).await;
    assert_eq!(update.syscall, CURSOR_UPDATE);
    let BoardEvent::CursorUpdate(cursor) = BoardEvent::from_frame(&update).unwrap().unwrap() else {
        panic!("expected cursor:update");
    };
    assert_eq!(cursor.user_id, b.owner.user_id);
    assert_eq!(cursor.display_name, "Ada");
    assert!((cursor.x - 10.5).abs() < f64::EPSILON);
    assert_no_frame(&mut a_rx).await;
}

#[tokio::test]
async fn cursor_before_join_dropped() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, _a_rx) = connection(b.owner.clone());
    let (mut g, mut g_rx) = connection(b.guest.clone());
    join(state, &mut g, b.board_id).await;

    let frames = process_inbound(state, &mut a, &request_bytes(b.board_id, CURSOR_MOVE, json!({ "x": 1.5, "y": 1.5 }))).await;
    assert!(frames.is_empty());
    assert_no_frame(&mut g_rx).await;
}

// =============================================================================
// OBJECTS
// =============================================================================

#[tokio::test]
async fn create_over_ws_replies_and_broadcasts_to_whole_room() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, mut a_rx) = connection(b.owner.clone());
    let (mut g, mut g_rx) = connection(b.guest.clone());
    join(state, &mut a, b.board_id).await;
    join(state, &mut g, b.board_id).await;
    recv_frame(&mut a_rx).await;
    recv_frame(&mut a_rx).await;

    let local = ObjectId::new_local();
    let data = json!({ "type": "sticky_note", "x": 5.5, "y": 6.5, "data": { "text": "hi" }, "client_ref": local });
    let frames = process_inbound(state, &mut a, &request_bytes(b.board_id, OBJECT_CREATE, data)).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status, Status::Done);
    let created: frames::CanvasObject = serde_json::from_value(frames[0].data.clone()).unwrap();

    for rx in [&mut a_rx, &mut g_rx] {
        let event = recv_frame(rx).await;
        assert_eq!(event.syscall, OBJECT_CREATED);
        let BoardEvent::ObjectCreated(changed) = BoardEvent::from_frame(&event).unwrap().unwrap() else {
            panic!("expected object:created");
        };
        assert_eq!(changed.object.id, created.id);
        assert_eq!(changed.client_ref, Some(local));
    }
}

#[tokio::test]
async fn create_by_non_owner_forbidden_and_not_broadcast() {
    let b = board().await;
    let state = &b.app.state;
    let (mut a, mut a_rx) = connection(b.owner.clone());
    let (mut g, _g_rx) = connection(b.guest.clone());
    join(state, &mut a, b.board_id).await;
    join(state, &mut g, b.board_id).await;
    recv_frame(&mut a_rx).await;
    recv_frame(&mut a_rx).await;

    let data = json!({ "type": "sticky_note", "x": 1.5, "y": 1.5 });
    let frames = process_inbound(state, &mut g, &request_bytes(b.board_id, OBJECT_CREATE, data)).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].error_code(), Some("E_FORBIDDEN"));
    assert_no_frame(&mut a_rx).await;
}

#[tokio::test]
async fn mutations_past_the_rate_limit_are_refused() {
    let app = test_app_with(ServerConfig { rate_limit_max: 2, ..test_config() });
    let owner = login(&app, "owner-token", "Ada");
    let board_id = seed_board(&app.state, owner.user_id).await;
    let state = &app.state;
    let (mut a, _rx) = connection(owner);
    join(state, &mut a, board_id).await;

    // Cursor traffic does not count.
    for _ in 0..5 {
        process_inbound(state, &mut a, &request_bytes(board_id, CURSOR_MOVE, json!({ "x": 1.5, "y": 1.5 }))).await;
    }
    let data = json!({ "type": "sticky_note", "x": 1.5, "y": 1.5 });
    for _ in 0..2 {
        let frames = process_inbound(state, &mut a, &request_bytes(board_id, OBJECT_CREATE, data.clone())).await;
        assert_eq!(frames[0].status, Status::Done);
    }
    let frames = process_inbound(state, &mut a, &request_bytes(board_id, OBJECT_CREATE, data)).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].error_code(), Some("E_RATE_LIMITED"));
    assert!(frames[0].data["details"]["retry_after_secs"].as_u64().unwrap() >= 1);
    assert_eq!(app.store.list_by_board(board_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn validation_error_carries_field_details() {
    let b = board().await;
    let (mut a, _rx) = connection(b.owner.clone());
    let data = json!({ "type": "", "x": 1.5, "y": 1.5 });
    let frames = process_inbound(&b.app.state, &mut a, &request_bytes(b.board_id, OBJECT_CREATE, data)).await;
    assert_eq!(frames[0].error_code(), Some("E_VALIDATION"));
    assert_eq!(frames[0].data["details"][0]["field"], "type");
}

#[tokio::test]
async fn malformed_payload_is_validation_error() {
    let b = board().await;
    let (mut a, _rx) = connection(b.owner.clone());
    let frames = process_inbound(&b.app.state, &mut a, &request_bytes(b.board_id, OBJECT_UPDATE, json!({ "x": 1.5 }))).await;
    assert_eq!(frames[0].error_code(), Some("E_VALIDATION"));
}

#[tokio::test]
async fn update_and_delete_over_ws() {
    let b = board().await;
    let state = &b.app.state;
    let created = gateway::create_object(state, b.board_id, b.owner.user_id, &sticky_input(0.0, 0.0))
        .await
        .unwrap();
    let (mut a, mut a_rx) = connection(b.owner.clone());
    join(state, &mut a, b.board_id).await;

    let data = json!({ "id": created.id, "x": 42.5 });
    let frames = process_inbound(state, &mut a, &request_bytes(b.board_id, OBJECT_UPDATE, data)).await;
    assert_eq!(frames[0].status, Status::Done);
    let updated: frames::CanvasObject = serde_json::from_value(frames[0].data.clone()).unwrap();
    assert!((updated.x - 42.5).abs() < f64::EPSILON);
    recv_frame(&mut a_rx).await;

    let frames = process_inbound(state, &mut a, &request_bytes(b.board_id, OBJECT_DELETE, json!({ "id": created.id }))).await;
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(recv_frame(&mut a_rx).await.syscall, OBJECT_DELETED);
    assert!(state.store.list_by_board(b.board_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_create_over_ws_reports_per_item() {
    let b = board().await;
    let (mut a, _rx) = connection(b.owner.clone());
    let data = json!({ "objects": [
        { "type": "sticky_note", "x": 1.5, "y": 1.5 },
        { "type": "", "x": 1.5, "y": 1.5 }
    ] });
    let frames = process_inbound(&b.app.state, &mut a, &request_bytes(b.board_id, OBJECT_CREATE_BATCH, data)).await;
    let result: frames::BatchCreateResult = serde_json::from_value(frames[0].data.clone()).unwrap();
    assert!(matches!(result.results[0], frames::CreateOutcome::Created { .. }));
    assert!(matches!(result.results[1], frames::CreateOutcome::Rejected { index: 1, .. }));
}

#[tokio::test]
async fn object_op_without_board_id_errors() {
    let b = board().await;
    let (mut a, _rx) = connection(b.owner.clone());
    let bytes = frames::encode_frame(&Frame::request(OBJECT_DELETE, json!({ "id": Uuid::new_v4() })));
    let frames = process_inbound(&b.app.state, &mut a, &bytes).await;
    assert_eq!(frames[0].status, Status::Error);
}

#[tokio::test]
async fn unknown_syscall_errors() {
    let b = board().await;
    let (mut a, _rx) = connection(b.owner.clone());
    let frames = process_inbound(&b.app.state, &mut a, &request_bytes(b.board_id, "board:explode", json!({}))).await;
    assert_eq!(frames[0].status, Status::Error);
}

#[tokio::test]
async fn undecodable_bytes_yield_gateway_error() {
    let b = board().await;
    let (mut a, _rx) = connection(b.owner.clone());
    let frames = process_inbound(&b.app.state, &mut a, &[0xff, 0xff, 0xff]).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].syscall, "gateway:error");
}

// =============================================================================
// FULL ROUTER
// =============================================================================

async fn serve(state: AppState) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, crate::routes::app(state)).await.unwrap();
    });
    addr
}

async fn next_ws_frame<S>(stream: &mut S) -> Frame
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("ws receive timed out")
            .expect("ws stream ended")
            .expect("ws error");
        if let WsMessage::Binary(bytes) = msg {
            return frames::decode_frame(&bytes).unwrap();
        }
    }
}

#[tokio::test]
async fn websocket_rejects_unknown_token() {
    let b = board().await;
    let addr = serve(b.app.state.clone()).await;
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/api/ws?token=nope")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn websocket_session_join_and_broadcast_end_to_end() {
    let b = board().await;
    let addr = serve(b.app.state.clone()).await;

    let (mut owner_ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/ws?token=owner-token"))
        .await
        .unwrap();
    let welcome = next_ws_frame(&mut owner_ws).await;
    assert_eq!(welcome.syscall, SESSION_CONNECTED);
    assert_eq!(welcome.data["user_id"], json!(b.owner.user_id));

    let join_bytes = request_bytes(b.board_id, BOARD_JOIN, json!({ "board_id": b.board_id }));
    owner_ws.send(WsMessage::Binary(join_bytes.into())).await.unwrap();
    assert_eq!(next_ws_frame(&mut owner_ws).await.status, Status::Done);
    assert_eq!(next_ws_frame(&mut owner_ws).await.syscall, USERS_LIST);
    assert_eq!(next_ws_frame(&mut owner_ws).await.syscall, OBJECTS_LIST);

    // A REST write reaches the websocket member.
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/boards/{}/objects", b.board_id))
        .bearer_auth("owner-token")
        .json(&sticky_input(3.5, 4.5))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let event = next_ws_frame(&mut owner_ws).await;
    assert_eq!(event.syscall, OBJECT_CREATED);
    owner_ws.close(None).await.unwrap();
}
