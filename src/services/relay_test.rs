use super::*;
use serde_json::json;

fn envelope(origin: Uuid) -> RelayEnvelope {
    let board_id = Uuid::new_v4();
    RelayEnvelope {
        origin,
        board_id,
        exclude: Some(Uuid::new_v4()),
        frame: Frame::request("object:created", json!({ "n": 1 })).with_board_id(board_id),
    }
}

#[test]
fn envelope_survives_notify_payload() {
    let sent = envelope(Uuid::new_v4());
    let payload = encode_envelope(&sent).unwrap();
    let received = decode_envelope(&payload, Uuid::new_v4()).unwrap();
    assert_eq!(received, sent);
}

#[test]
fn own_envelopes_are_ignored() {
    let me = Uuid::new_v4();
    let payload = encode_envelope(&envelope(me)).unwrap();
    assert!(decode_envelope(&payload, me).is_none());
}

#[test]
fn malformed_payload_is_ignored() {
    assert!(decode_envelope("{not json", Uuid::new_v4()).is_none());
    assert!(decode_envelope(r#"{"origin":"x"}"#, Uuid::new_v4()).is_none());
}

#[test]
fn oversized_envelope_is_rejected() {
    let mut big = envelope(Uuid::new_v4());
    big.frame.data = json!({ "text": "x".repeat(MAX_NOTIFY_PAYLOAD) });
    assert!(matches!(encode_envelope(&big), Err(RelayError::PayloadTooLarge(_))));
}
