//! Local object cache: the client's working copy of board objects.
//!
//! SYSTEM CONTEXT
//! ==============
//! Rendering reads from here; local edits land here first (optimistic) and
//! server events are folded in through `reconcile`. Entries are keyed by
//! `ObjectId`, so a pending placeholder (`Local`) and a confirmed object
//! (`Server`) can never be confused.
//!
//! DESIGN
//! ======
//! - `update` shallow-merges the opaque payload (a `null` value removes the
//!   key) and stamps `updated_at` with the local clock. Every other present
//!   field is overwritten.
//! - `overwrite` writes every mutable field from a snapshot exactly. History
//!   uses it so an undo restores the payload instead of merging into it.
//! - `replace_board` is a full replace: entries for the board that are not
//!   in the incoming set are dropped.

#[cfg(test)]
#[path = "objects_test.rs"]
mod objects_test;

use std::collections::HashMap;

use frames::{CanvasObject, ObjectId, ObjectInput, ObjectPatch, now_ms};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ObjectCache {
    objects: HashMap<ObjectId, CanvasObject>,
}

impl ObjectCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&CanvasObject> {
        self.objects.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanvasObject> {
        self.objects.values()
    }

    /// Objects on `board_id` in draw order `(z_index, id)`.
    #[must_use]
    pub fn board_objects(&self, board_id: Uuid) -> Vec<&CanvasObject> {
        let mut objs: Vec<&CanvasObject> = self.objects.values().filter(|o| o.board_id == board_id).collect();
        objs.sort_by(|a, b| {
            a.z_index
                .cmp(&b.z_index)
                .then_with(|| a.id.uuid().cmp(&b.id.uuid()))
        });
        objs
    }

    /// Insert or replace unconditionally.
    pub fn insert(&mut self, object: CanvasObject) {
        self.objects.insert(object.id, object);
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<CanvasObject> {
        self.objects.remove(id)
    }

    // =========================================================================
    // OPTIMISTIC CREATE
    // =========================================================================

    /// Insert a placeholder for a create that has not been confirmed yet.
    pub fn add_optimistic(&mut self, board_id: Uuid, input: &ObjectInput) -> ObjectId {
        let id = ObjectId::new_local();
        let now = now_ms();
        let data = if input.data.is_null() { Value::Object(Map::new()) } else { input.data.clone() };
        self.objects.insert(
            id,
            CanvasObject {
                id,
                board_id,
                kind: input.kind.clone(),
                data,
                x: input.x,
                y: input.y,
                width: input.width,
                height: input.height,
                rotation: input.rotation,
                z_index: input.z_index,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    /// Swap a placeholder for its server object in one step. Returns whether
    /// the placeholder was still present. A newer copy already cached under
    /// the server id (from an earlier broadcast) is kept.
    pub fn confirm_optimistic(&mut self, local_id: &ObjectId, server: CanvasObject) -> bool {
        let had_placeholder = self.objects.remove(local_id).is_some();
        let newer_cached = self
            .objects
            .get(&server.id)
            .is_some_and(|existing| existing.updated_at > server.updated_at);
        if !newer_cached {
            self.objects.insert(server.id, server);
        }
        had_placeholder
    }

    /// Drop a placeholder whose create was rejected.
    pub fn rollback_optimistic(&mut self, local_id: &ObjectId) -> Option<CanvasObject> {
        self.objects.remove(local_id)
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    /// Apply a local partial update. Returns `false` when the object is absent.
    pub fn update(&mut self, id: &ObjectId, patch: &ObjectPatch) -> bool {
        let Some(obj) = self.objects.get_mut(id) else {
            return false;
        };
        apply_optimistic_update(obj, patch, now_ms());
        true
    }

    /// Set every mutable field from `snapshot`, keeping id, board and
    /// `created_at`. Returns `false` when the object is absent.
    pub fn overwrite(&mut self, id: &ObjectId, snapshot: &CanvasObject) -> bool {
        let Some(obj) = self.objects.get_mut(id) else {
            return false;
        };
        ObjectPatch::from_object(snapshot).apply(obj);
        obj.updated_at = now_ms().max(obj.updated_at);
        true
    }

    /// Full replace of one board's objects with a server snapshot.
    pub fn replace_board(&mut self, board_id: Uuid, objects: Vec<CanvasObject>) {
        self.objects.retain(|_, o| o.board_id != board_id);
        for obj in objects {
            self.objects.insert(obj.id, obj);
        }
    }
}

/// Merge `patch` into `obj` the way a local edit does: payload keys are
/// merged, everything else overwritten, `updated_at` set to `now`.
pub fn apply_optimistic_update(obj: &mut CanvasObject, patch: &ObjectPatch, now: i64) {
    let data_patch = patch.data.as_ref();
    let rest = ObjectPatch { data: None, ..patch.clone() };
    rest.apply(obj);

    if let Some(incoming) = data_patch {
        merge_data(&mut obj.data, incoming);
    }
    obj.updated_at = now;
}

fn merge_data(existing: &mut Value, incoming: &Value) {
    let Some(incoming) = incoming.as_object() else {
        *existing = incoming.clone();
        return;
    };
    if !existing.is_object() {
        *existing = Value::Object(Map::new());
    }
    if let Some(target) = existing.as_object_mut() {
        for (k, v) in incoming {
            if v.is_null() {
                target.remove(k);
            } else {
                target.insert(k.clone(), v.clone());
            }
        }
    }
}
