use super::*;

#[test]
fn objects_endpoint_formats_expected_path() {
    let board = Uuid::nil();
    assert_eq!(
        objects_endpoint("http://localhost:3000", board),
        "http://localhost:3000/api/boards/00000000-0000-0000-0000-000000000000/objects"
    );
}

#[test]
fn http_api_trims_trailing_slash() {
    let api = HttpObjectsApi::new("http://host/");
    let id = Uuid::nil();
    assert_eq!(
        api.object_url(id, id),
        format!("http://host/api/boards/{id}/objects/{id}")
    );
}

#[test]
fn auth_statuses_are_permanent() {
    assert_eq!(error_for_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized);
    assert_eq!(error_for_status(StatusCode::FORBIDDEN, ""), ApiError::Forbidden);
    assert_eq!(error_for_status(StatusCode::NOT_FOUND, ""), ApiError::NotFound);
    assert!(ApiError::Forbidden.is_permanent());
}

#[test]
fn expired_credential_is_not_a_rejection() {
    assert!(ApiError::Unauthorized.is_permanent());
    assert!(!ApiError::Unauthorized.is_rejection());
    assert!(ApiError::Forbidden.is_rejection());
    assert!(ApiError::ValidationFailed(vec![]).is_rejection());
    assert!(!ApiError::Transient("down".into()).is_rejection());
}

#[test]
fn validation_body_details_are_parsed() {
    let body = r#"{"code":"E_VALIDATION","message":"validation failed","details":[{"field":"x","message":"must be finite"}]}"#;
    let err = error_for_status(StatusCode::BAD_REQUEST, body);
    assert_eq!(err, ApiError::ValidationFailed(vec![FieldError::new("x", "must be finite")]));
    assert_eq!(err.error_code(), "E_VALIDATION");
}

#[test]
fn validation_with_unparseable_body_has_no_details() {
    let err = error_for_status(StatusCode::UNPROCESSABLE_ENTITY, "not json");
    assert_eq!(err, ApiError::ValidationFailed(vec![]));
}

#[test]
fn server_errors_are_transient_and_retryable() {
    let err = error_for_status(StatusCode::SERVICE_UNAVAILABLE, "");
    assert_eq!(err, ApiError::Transient("HTTP 503".into()));
    assert!(!err.is_permanent());
    assert!(err.retryable());
}

#[tokio::test]
async fn fake_api_scripts_failures_in_order() {
    let api = test_helpers::FakeApi::new();
    api.fail_next(ApiError::Transient("offline".into()));
    let board = Uuid::new_v4();
    let input = ObjectInput {
        kind: "rectangle".into(),
        data: serde_json::json!({}),
        x: 0.0,
        y: 0.0,
        width: None,
        height: None,
        rotation: 0.0,
        z_index: 0,
        client_ref: None,
    };

    assert!(api.create("t", board, &input).await.is_err());
    let created = api.create("t", board, &input).await.unwrap();
    assert_eq!(created.board_id, board);
    assert_eq!(api.stored_count(), 1);
}

#[test]
fn rate_limited_is_transient_so_queue_is_kept() {
    let err = error_for_status(StatusCode::TOO_MANY_REQUESTS, r#"{"code":"E_RATE_LIMITED"}"#);
    assert_eq!(err, ApiError::Transient("HTTP 429".into()));
    assert!(!err.is_rejection());
    assert!(err.retryable());
}
