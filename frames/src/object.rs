//! Canvas object model shared by the server store and the client cache.
//!
//! DESIGN
//! ======
//! `ObjectId` is tagged: `Server` ids are durable store keys, `Local` ids
//! name optimistic placeholders that exist only in one client's cache. On
//! the wire a local id keeps the `client:` prefix so either side can tell
//! them apart from a bare string.
//!
//! `updated_at` is the server commit timestamp in milliseconds. Clients set
//! it to their own clock for optimistic edits; the server overwrites it on
//! every accepted write.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Wire prefix marking a client-side placeholder id.
pub const LOCAL_ID_PREFIX: &str = "client:";

// =============================================================================
// OBJECT ID
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectId {
    /// Placeholder minted by a client before the server confirms a create.
    Local(Uuid),
    /// Durable id assigned by the object store.
    Server(Uuid),
}

impl ObjectId {
    /// Mint a fresh placeholder id.
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    #[must_use]
    pub fn is_local(self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The durable id, if this is one.
    #[must_use]
    pub fn as_server(self) -> Option<Uuid> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    #[must_use]
    pub fn uuid(self) -> Uuid {
        match self {
            Self::Local(id) | Self::Server(id) => id,
        }
    }
}

impl From<Uuid> for ObjectId {
    fn from(id: Uuid) -> Self {
        Self::Server(id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "{LOCAL_ID_PREFIX}{id}"),
            Self::Server(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for ObjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(LOCAL_ID_PREFIX) {
            Some(rest) => Ok(Self::Local(rest.parse()?)),
            None => Ok(Self::Server(s.parse()?)),
        }
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// OBJECT
// =============================================================================

/// A single drawable element on a board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasObject {
    pub id: ObjectId,
    pub board_id: Uuid,
    #[serde(alias = "type")]
    pub kind: String,
    /// Opaque type-specific payload (text, colours, points).
    #[serde(default = "empty_data")]
    pub data: Value,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i32,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: i64,
    /// Milliseconds since the Unix epoch. The LWW ordering key.
    #[serde(default)]
    pub updated_at: i64,
}

/// Payload for creating an object. The board comes from the request path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectInput {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default = "empty_data")]
    pub data: Value,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i32,
    /// Placeholder id the creating client holds; echoed on `object:created`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<ObjectId>,
}

impl ObjectInput {
    /// Rebuild a create payload from an existing object (undo of a delete).
    #[must_use]
    pub fn from_object(object: &CanvasObject) -> Self {
        Self {
            kind: object.kind.clone(),
            data: object.data.clone(),
            x: object.x,
            y: object.y,
            width: object.width,
            height: object.height,
            rotation: object.rotation,
            z_index: object.z_index,
            client_ref: None,
        }
    }
}

/// Partial update. Absent fields are untouched. `width`/`height` distinguish
/// absent from explicit `null` (clear the size).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatch {
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub width: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub height: Option<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
}

impl ObjectPatch {
    /// A patch that carries every mutable field of `object`.
    #[must_use]
    pub fn from_object(object: &CanvasObject) -> Self {
        Self {
            kind: Some(object.kind.clone()),
            data: Some(object.data.clone()),
            x: Some(object.x),
            y: Some(object.y),
            width: Some(object.width),
            height: Some(object.height),
            rotation: Some(object.rotation),
            z_index: Some(object.z_index),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Write the present fields onto `object`. The payload is replaced
    /// wholesale; callers wanting a merge do it before building the patch.
    pub fn apply(&self, object: &mut CanvasObject) {
        if let Some(kind) = &self.kind {
            object.kind.clone_from(kind);
        }
        if let Some(data) = &self.data {
            object.data.clone_from(data);
        }
        if let Some(x) = self.x {
            object.x = x;
        }
        if let Some(y) = self.y {
            object.y = y;
        }
        if let Some(width) = self.width {
            object.width = width;
        }
        if let Some(height) = self.height {
            object.height = height;
        }
        if let Some(rotation) = self.rotation {
            object.rotation = rotation;
        }
        if let Some(z_index) = self.z_index {
            object.z_index = z_index;
        }
    }
}

/// One rejected field in a validation failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

fn empty_data() -> Value {
    Value::Object(Map::new())
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
