//! Realtime connection to `/api/ws` carrying protobuf frames.
//!
//! The socket is transport only: it sends requests and yields inbound
//! frames. Feeding those frames into a `BoardSession` is the caller's loop.

#[cfg(test)]
#[path = "socket_test.rs"]
mod socket_test;

use futures_util::{SinkExt, StreamExt};
use frames::{BOARD_JOIN, BOARD_LEAVE, Frame, JoinRequest, LeaveRequest};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("websocket transport failed: {0}")]
    Transport(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    Closed,
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
}

pub struct BoardSocket {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

/// Convert an HTTP base URL into the websocket endpoint with credentials.
///
/// # Errors
///
/// Returns `InvalidBaseUrl` unless the scheme is `http` or `https`.
pub fn ws_url(base_url: &str, token: &str) -> Result<String, SocketError> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(SocketError::InvalidBaseUrl(base_url.to_owned()));
    };
    Ok(format!("{ws_base}/api/ws?token={token}"))
}

impl BoardSocket {
    /// Open the websocket. The server rejects the upgrade on a bad token.
    ///
    /// # Errors
    ///
    /// Returns URL or handshake errors.
    pub async fn connect(base_url: &str, token: &str) -> Result<Self, SocketError> {
        let url = ws_url(base_url, token)?;
        let (stream, _) = connect_async(url).await.map_err(Box::new)?;
        info!("socket: connected");
        Ok(Self { stream })
    }

    /// # Errors
    ///
    /// Returns transport errors.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), SocketError> {
        let bytes = frames::encode_frame(frame);
        self.stream
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Next inbound frame. Non-binary messages are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Closed` when the server hangs up, or transport/decode errors.
    pub async fn recv(&mut self) -> Result<Frame, SocketError> {
        loop {
            let Some(msg) = self.stream.next().await else {
                return Err(SocketError::Closed);
            };
            match msg.map_err(Box::new)? {
                Message::Binary(bytes) => return Ok(frames::decode_frame(&bytes)?),
                Message::Close(_) => return Err(SocketError::Closed),
                other => debug!(kind = ?message_kind(&other), "socket: skipped non-binary message"),
            }
        }
    }

    /// Ask to join a board. The server answers with roster and full object
    /// state, which is also how a reconnecting client resynchronizes.
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    pub async fn join(&mut self, board_id: Uuid, display_name: Option<String>) -> Result<(), SocketError> {
        let req = JoinRequest { board_id, display_name, color: None };
        let frame = Frame::request(BOARD_JOIN, serde_json::to_value(req).unwrap_or_default()).with_board_id(board_id);
        self.send(&frame).await
    }

    /// # Errors
    ///
    /// Returns transport errors.
    pub async fn leave(&mut self, board_id: Uuid) -> Result<(), SocketError> {
        let frame = Frame::request(BOARD_LEAVE, serde_json::to_value(LeaveRequest { board_id }).unwrap_or_default())
            .with_board_id(board_id);
        self.send(&frame).await
    }

    /// # Errors
    ///
    /// Returns transport errors from the close handshake.
    pub async fn close(mut self) -> Result<(), SocketError> {
        self.stream.close(None).await.map_err(Box::new)?;
        Ok(())
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}
