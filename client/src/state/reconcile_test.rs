use super::*;
use frames::ObjectId;
use serde_json::json;
use uuid::Uuid;

fn obj(updated_at: i64) -> CanvasObject {
    CanvasObject {
        id: ObjectId::Server(Uuid::nil()),
        board_id: Uuid::nil(),
        kind: "rectangle".into(),
        data: json!({}),
        x: 0.0,
        y: 0.0,
        width: Some(10.0),
        height: Some(10.0),
        rotation: 0.0,
        z_index: 0,
        created_at: 0,
        updated_at,
    }
}

#[test]
fn absent_local_accepts_server() {
    let mut cache = ObjectCache::new();
    assert_eq!(cache.reconcile(obj(5)), ReconcileOutcome::Inserted);
    assert_eq!(cache.len(), 1);
}

#[test]
fn older_server_copy_is_stale() {
    let mut cache = ObjectCache::new();
    let mut local = obj(200);
    local.x = 42.0;
    cache.insert(local.clone());

    let mut server = obj(100);
    server.x = 1.0;
    assert_eq!(cache.reconcile(server), ReconcileOutcome::Stale);
    assert_eq!(cache.get(&local.id), Some(&local));
}

#[test]
fn tie_goes_to_server() {
    let mut cache = ObjectCache::new();
    cache.insert(obj(100));

    let mut server = obj(100);
    server.x = 7.0;
    assert_eq!(cache.reconcile(server.clone()), ReconcileOutcome::Replaced);
    assert_eq!(cache.get(&server.id), Some(&server));
}

#[test]
fn concurrent_edits_resolve_by_commit_order() {
    // A commits at T1; B's older commit T2 arrives late and loses; a later
    // write T3 wins.
    let mut cache = ObjectCache::new();
    let mut a = obj(1_000);
    a.x = 10.0;
    cache.reconcile(a.clone());

    let mut b = obj(900);
    b.x = 20.0;
    assert_eq!(cache.reconcile(b), ReconcileOutcome::Stale);
    assert!((cache.get(&a.id).map_or(0.0, |o| o.x) - 10.0).abs() < f64::EPSILON);

    let mut c = obj(1_100);
    c.x = 30.0;
    assert!(cache.reconcile(c).accepted());
    assert!((cache.get(&a.id).map_or(0.0, |o| o.x) - 30.0).abs() < f64::EPSILON);
}

#[test]
fn display_equal_copy_is_unchanged() {
    let mut cache = ObjectCache::new();
    cache.insert(obj(100));
    let outcome = cache.reconcile(obj(150));
    assert_eq!(outcome, ReconcileOutcome::Unchanged);
    assert!(outcome.accepted());
    // Not written, so the local timestamp stays.
    assert_eq!(cache.get(&ObjectId::Server(Uuid::nil())).map(|o| o.updated_at), Some(100));
}

#[test]
fn payload_difference_is_not_display_equal() {
    let a = obj(1);
    let mut b = obj(1);
    b.data = json!({ "text": "x" });
    assert!(!is_display_equal(&a, &b));
    assert!(is_display_equal(&a, &obj(99)));
}

#[test]
fn should_accept_server_rules() {
    assert!(should_accept_server(None, &obj(0)));
    assert!(should_accept_server(Some(&obj(5)), &obj(5)));
    assert!(should_accept_server(Some(&obj(5)), &obj(6)));
    assert!(!should_accept_server(Some(&obj(6)), &obj(5)));
}
