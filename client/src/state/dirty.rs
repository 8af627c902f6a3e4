//! Dirty tracker: which objects differ from what the server last saw.
//!
//! A snapshot of the sync-relevant fields (position, size, rotation,
//! payload) is taken whenever the cache is known to match the server. An
//! object is dirty when it has no snapshot or its fields drifted from it.

#[cfg(test)]
#[path = "dirty_test.rs"]
mod dirty_test;

use std::collections::HashMap;

use frames::{CanvasObject, ObjectId};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
struct SyncSnapshot {
    x: f64,
    y: f64,
    width: Option<f64>,
    height: Option<f64>,
    rotation: f64,
    data: Value,
}

impl SyncSnapshot {
    fn of(obj: &CanvasObject) -> Self {
        Self {
            x: obj.x,
            y: obj.y,
            width: obj.width,
            height: obj.height,
            rotation: obj.rotation,
            data: obj.data.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DirtyTracker {
    synced: HashMap<ObjectId, SyncSnapshot>,
}

impl DirtyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_synced(&mut self, obj: &CanvasObject) {
        self.synced.insert(obj.id, SyncSnapshot::of(obj));
    }

    pub fn mark_synced_many<'a>(&mut self, objs: impl IntoIterator<Item = &'a CanvasObject>) {
        for obj in objs {
            self.mark_synced(obj);
        }
    }

    #[must_use]
    pub fn is_dirty(&self, obj: &CanvasObject) -> bool {
        self.synced.get(&obj.id).is_none_or(|snap| *snap != SyncSnapshot::of(obj))
    }

    pub fn clear(&mut self, id: &ObjectId) {
        self.synced.remove(id);
    }

    pub fn clear_all(&mut self) {
        self.synced.clear();
    }

    /// Ids of server-confirmed objects that need pushing. Placeholders are
    /// excluded; their create is still in flight.
    pub fn dirty_ids<'a>(&self, objects: impl IntoIterator<Item = &'a CanvasObject>) -> Vec<ObjectId> {
        objects
            .into_iter()
            .filter(|o| !o.id.is_local() && self.is_dirty(o))
            .map(|o| o.id)
            .collect()
    }
}
