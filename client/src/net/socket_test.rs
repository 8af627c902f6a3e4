use super::*;

#[test]
fn ws_url_maps_http_scheme() {
    assert_eq!(ws_url("http://localhost:3000", "tok").unwrap(), "ws://localhost:3000/api/ws?token=tok");
}

#[test]
fn ws_url_maps_https_scheme_and_trims_slash() {
    assert_eq!(ws_url("https://example.com/", "abc").unwrap(), "wss://example.com/api/ws?token=abc");
}

#[test]
fn ws_url_rejects_other_schemes() {
    assert!(matches!(ws_url("ftp://example.com", "t"), Err(SocketError::InvalidBaseUrl(_))));
}

#[test]
fn message_kind_names_variants() {
    assert_eq!(message_kind(&Message::Text("hi".into())), "text");
    assert_eq!(message_kind(&Message::Ping(Vec::new().into())), "ping");
}
