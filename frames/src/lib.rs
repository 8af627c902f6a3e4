//! Shared wire model for board sync: frames, objects, presence, events.
//!
//! Both the server (`collabsync`) and the `client` crate speak this model.
//! Frames carry a flexible JSON payload and travel as protobuf over the
//! websocket; REST bodies use the same typed structs through serde.
//!
//! DESIGN
//! ======
//! - `Frame` is the envelope. `syscall` names the operation or event,
//!   `status` its position in a request/response exchange.
//! - Typed payloads (`object`, `presence`, `event`) convert to and from
//!   `Frame::data`, so handlers never poke at raw JSON keys.
//! - `ErrorCode` gives every domain error a grepable code and a retryable
//!   flag; error frames carry both plus optional structured details.

pub mod event;
pub mod object;
pub mod presence;

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use event::*;
pub use object::{CanvasObject, FieldError, ObjectId, ObjectInput, ObjectPatch};
pub use presence::{CursorState, PresenceDescriptor};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

/// Frame data key for structured error details (validation field errors).
pub const FRAME_DETAILS: &str = "details";

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireFrame`.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `status` integer on the wire does not map to a known [`Status`] variant.
    #[error("invalid frame status: {0}")]
    InvalidStatus(i32),
}

/// Grepable error code, retryable flag, and optional details for error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }

    /// Structured detail passed through to the caller unmodified.
    fn details(&self) -> Option<Value> {
        None
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Lifecycle status of a frame in a request/response exchange.
///
/// Requests are answered by exactly one `Done` or `Error`. Server-pushed
/// events travel as `Request` with no `parent_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

impl Status {
    /// Convert status into wire enum integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Request => WireFrameStatus::Request as i32,
            Self::Done => WireFrameStatus::Done as i32,
            Self::Error => WireFrameStatus::Error as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireFrameStatus::try_from(value) {
            Ok(WireFrameStatus::Request) => Ok(Self::Request),
            Ok(WireFrameStatus::Done) => Ok(Self::Done),
            Ok(WireFrameStatus::Error) => Ok(Self::Error),
            Err(_) => Err(CodecError::InvalidStatus(value)),
        }
    }

    /// Terminal statuses answer a request.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// A single message on the realtime wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Unique identifier for this frame (UUID string).
    pub id: String,
    /// ID of the request frame this is responding to, if any.
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch when the frame was created.
    pub ts: i64,
    /// Board context for this frame, if any (UUID string).
    pub board_id: Option<String>,
    /// Sender identifier, stamped by the server with the authenticated user.
    pub from: Option<String>,
    /// Namespaced operation or event name, e.g. `"object:created"`.
    pub syscall: String,
    pub status: Status,
    /// JSON payload. Always an object on frames this crate builds.
    pub data: Value,
}

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Frame {
    /// Create a request frame. Also used for server-pushed events.
    pub fn request(syscall: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            ts: now_ms(),
            board_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Empty successful reply.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Value::Object(Map::new()))
    }

    /// Successful reply carrying a payload.
    #[must_use]
    pub fn done_with(&self, data: Value) -> Self {
        self.reply(Status::Done, data)
    }

    /// Error reply from a plain message.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert(FRAME_MESSAGE.into(), Value::String(message.into()));
        self.reply(Status::Error, Value::Object(data))
    }

    /// Structured error reply from a typed error.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Map::new();
        data.insert(FRAME_CODE.into(), Value::String(err.error_code().to_owned()));
        data.insert(FRAME_MESSAGE.into(), Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), Value::Bool(err.retryable()));
        if let Some(details) = err.details() {
            data.insert(FRAME_DETAILS.into(), details);
        }
        self.reply(Status::Error, Value::Object(data))
    }

    /// Build a reply. Inherits `board_id` and `syscall`, links `parent_id`.
    fn reply(&self, status: Status, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: Some(self.id.clone()),
            ts: now_ms(),
            board_id: self.board_id.clone(),
            from: None,
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }

    #[must_use]
    pub fn with_board_id(mut self, board_id: Uuid) -> Self {
        self.board_id = Some(board_id.to_string());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    /// Syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    /// Board id from the envelope, falling back to `data.board_id`.
    #[must_use]
    pub fn board_uuid(&self) -> Option<Uuid> {
        self.board_id
            .as_deref()
            .or_else(|| self.data.get("board_id").and_then(Value::as_str))
            .and_then(|raw| raw.parse().ok())
    }

    /// Grepable code of an error frame.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.data.get(FRAME_CODE).and_then(Value::as_str)
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = frame_to_wire(frame);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot hit `BufferTooSmall`.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidStatus`] for out-of-range status values.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    Ok(Frame {
        id: wire.id,
        parent_id: wire.parent_id,
        ts: wire.ts,
        board_id: wire.board_id,
        from: wire.from,
        syscall: wire.syscall,
        status: Status::from_i32(wire.status)?,
        data: wire
            .data
            .map_or(Value::Object(Map::new()), |v| proto_to_json_value(&v)),
    })
}

fn frame_to_wire(frame: &Frame) -> WireFrame {
    WireFrame {
        id: frame.id.clone(),
        parent_id: frame.parent_id.clone(),
        ts: frame.ts,
        board_id: frame.board_id.clone(),
        from: frame.from.clone(),
        syscall: frame.syscall.clone(),
        status: frame.status.as_i32(),
        data: Some(json_to_proto_value(&frame.data)),
    }
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    use prost_types::value::Kind;

    let kind = match value {
        Value::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
        Value::Bool(v) => Kind::BoolValue(*v),
        Value::Number(v) => Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => Kind::StringValue(v.clone()),
        Value::Array(v) => Kind::ListValue(prost_types::ListValue { values: v.iter().map(json_to_proto_value).collect() }),
        Value::Object(v) => Kind::StructValue(prost_types::Struct {
            fields: v
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

/// Protobuf numbers are all doubles; integral values come back as JSON
/// integers so timestamps and counters survive the trip.
fn proto_to_json_value(value: &prost_types::Value) -> Value {
    use prost_types::value::Kind;

    let Some(kind) = &value.kind else {
        return Value::Null;
    };

    match kind {
        Kind::NullValue(_) => Value::Null,
        Kind::NumberValue(v) => number_to_json(*v),
        Kind::StringValue(v) => Value::String(v.clone()),
        Kind::BoolValue(v) => Value::Bool(*v),
        Kind::StructValue(v) => Value::Object(
            v.fields
                .iter()
                .map(|(k, v)| (k.clone(), proto_to_json_value(v)))
                .collect(),
        ),
        Kind::ListValue(v) => Value::Array(v.values.iter().map(proto_to_json_value).collect()),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_to_json(v: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if v.fract().abs() < f64::EPSILON && v.abs() <= MAX_SAFE {
        return Value::Number(serde_json::Number::from(v as i64));
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    board_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    from: Option<String>,
    #[prost(string, tag = "6")]
    syscall: String,
    #[prost(enumeration = "WireFrameStatus", tag = "7")]
    status: i32,
    #[prost(message, optional, tag = "8")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireFrameStatus {
    Request = 0,
    Done = 1,
    Error = 2,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
