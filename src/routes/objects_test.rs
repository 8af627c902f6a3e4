use crate::config::ServerConfig;
use crate::state::test_helpers::{TestApp, login, seed_board, sticky_input, test_app_with, test_config};
use frames::{BatchCreateResult, BatchDeleteResult, CanvasObject, DeleteOutcome, ObjectId};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

struct Server {
    app: TestApp,
    base: String,
    board_id: Uuid,
    http: reqwest::Client,
}

async fn server() -> Server {
    server_with(test_config()).await
}

async fn server_with(config: ServerConfig) -> Server {
    let app = test_app_with(config);
    let owner = login(&app, "owner-token", "Ada");
    login(&app, "guest-token", "Grace");
    let board_id = seed_board(&app.state, owner.user_id).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = crate::routes::app(app.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Server { app, base: format!("http://{addr}"), board_id, http: reqwest::Client::new() }
}

impl Server {
    fn objects_url(&self) -> String {
        format!("{}/api/boards/{}/objects", self.base, self.board_id)
    }

    async fn create(&self, token: &str, body: &Value) -> reqwest::Response {
        self.http
            .post(self.objects_url())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn create_then_list() {
    let s = server().await;
    let resp = s.create("owner-token", &json!({ "type": "sticky_note", "x": 1.5, "y": 2.5 })).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: CanvasObject = resp.json().await.unwrap();
    assert!(!created.id.is_local());

    let listed: Vec<CanvasObject> = s
        .http
        .get(s.objects_url())
        .bearer_auth("guest-token")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, vec![created]);
}

#[tokio::test]
async fn missing_token_is_401() {
    let s = server().await;
    let resp = s.http.get(s.objects_url()).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "E_UNAUTHORIZED");
}

#[tokio::test]
async fn non_owner_create_is_403() {
    let s = server().await;
    let resp = s.create("guest-token", &json!({ "type": "sticky_note", "x": 1.5, "y": 2.5 })).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(s.app.state.store.list_by_board(s.board_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_create_is_400_with_field_details() {
    let s = server().await;
    let resp = s.create("owner-token", &json!({ "type": "", "x": 1.5, "y": 2.5, "width": -4.0 })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "E_VALIDATION");
    assert_eq!(body["details"][0]["field"], "type");
    assert_eq!(body["details"][1]["field"], "width");
}

#[tokio::test]
async fn unknown_board_is_404() {
    let s = server().await;
    let url = format!("{}/api/boards/{}/objects", s.base, Uuid::new_v4());
    let resp = s.http.get(url).bearer_auth("owner-token").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patch_and_delete_object() {
    let s = server().await;
    let created: CanvasObject = s
        .create("owner-token", &serde_json::to_value(sticky_input(0.0, 0.0)).unwrap())
        .await
        .json()
        .await
        .unwrap();
    let url = format!("{}/{}", s.objects_url(), created.id.uuid());

    let resp = s
        .http
        .patch(&url)
        .bearer_auth("owner-token")
        .json(&json!({ "x": 9.5, "width": null }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: CanvasObject = resp.json().await.unwrap();
    assert!((updated.x - 9.5).abs() < f64::EPSILON);
    assert_eq!(updated.width, None);
    assert!(updated.updated_at > created.updated_at);

    let resp = s.http.delete(&url).bearer_auth("owner-token").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = s.http.delete(&url).bearer_auth("owner-token").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_create_and_delete() {
    let s = server().await;
    let body = json!({ "objects": [
        { "type": "sticky_note", "x": 1.5, "y": 1.5 },
        { "type": "rectangle", "x": 2.5, "y": 2.5 }
    ] });
    let resp = s
        .http
        .post(format!("{}/batch", s.objects_url()))
        .bearer_auth("owner-token")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created: BatchCreateResult = resp.json().await.unwrap();
    assert_eq!(created.results.len(), 2);

    let ids: Vec<ObjectId> = s
        .app
        .state
        .store
        .list_by_board(s.board_id)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    let resp = s
        .http
        .post(format!("{}/batch-delete", s.objects_url()))
        .bearer_auth("owner-token")
        .json(&json!({ "ids": ids }))
        .send()
        .await
        .unwrap();
    let deleted: BatchDeleteResult = resp.json().await.unwrap();
    assert_eq!(deleted.deleted, 2);
    assert!(deleted.results.iter().all(|r| matches!(r, DeleteOutcome::Deleted { .. })));
}

#[tokio::test]
async fn oversized_batch_is_413() {
    let s = server().await;
    let limit = s.app.state.config.batch_limit;
    let objects: Vec<Value> = (0..=limit).map(|_| json!({ "type": "sticky_note", "x": 1.5, "y": 1.5 })).collect();
    let resp = s
        .http
        .post(format!("{}/batch", s.objects_url()))
        .bearer_auth("owner-token")
        .json(&json!({ "objects": objects }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "E_BATCH_TOO_LARGE");
}

#[tokio::test]
async fn requests_past_the_rate_limit_are_refused() {
    let s = server_with(ServerConfig { rate_limit_max: 2, ..test_config() }).await;
    let list = |token: &'static str| s.http.get(s.objects_url()).bearer_auth(token).send();

    for _ in 0..2 {
        assert_eq!(list("owner-token").await.unwrap().status(), StatusCode::OK);
    }
    let refused = list("owner-token").await.unwrap();
    assert_eq!(refused.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(refused.headers().contains_key(reqwest::header::RETRY_AFTER));
    let body: Value = refused.json().await.unwrap();
    assert_eq!(body["code"], "E_RATE_LIMITED");

    // Another user has a window of their own.
    assert_eq!(list("guest-token").await.unwrap().status(), StatusCode::OK);
}
