//! Undo/redo history for local edits, scoped to one board.
//!
//! DESIGN
//! ======
//! `record_update` and `record_delete*` push an entry and perform the
//! forward mutation on the cache, so the two never drift. `record_create`
//! only pushes: the object is already cached by the time it is recorded. Undo and redo apply the
//! inverse or forward mutation to the cache and hand back a `HistoryEffect`
//! the session turns into server operations.
//!
//! Both stacks are capped; pushing past the cap drops the oldest entry. Any
//! new record clears the redo stack. Switching boards clears everything.

#[cfg(test)]
#[path = "history_test.rs"]
mod history_test;

use std::collections::VecDeque;

use frames::{CanvasObject, ObjectId, ObjectPatch, now_ms};
use uuid::Uuid;

use super::objects::{ObjectCache, apply_optimistic_update};
use crate::config::DEFAULT_HISTORY_CAP;

#[derive(Clone, Debug, PartialEq)]
pub enum HistoryEntry {
    Create(CanvasObject),
    Update { before: CanvasObject, after: CanvasObject },
    Delete(CanvasObject),
}

/// What an undo or redo did to the cache.
#[derive(Clone, Debug, PartialEq)]
pub enum HistoryEffect {
    /// The object was taken out of the cache.
    Removed(CanvasObject),
    /// The object was put back into the cache under its old id.
    Restored(CanvasObject),
    /// Fields of a live object were rewritten.
    Changed(ObjectId),
    /// The object is gone (deleted remotely); the entry was dropped.
    Missing(ObjectId),
}

#[derive(Debug)]
pub struct HistoryEngine {
    board_id: Option<Uuid>,
    undo: VecDeque<HistoryEntry>,
    redo: VecDeque<HistoryEntry>,
    cap: usize,
}

impl Default for HistoryEngine {
    fn default() -> Self {
        Self::with_cap(DEFAULT_HISTORY_CAP)
    }
}

impl HistoryEngine {
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self { board_id: None, undo: VecDeque::new(), redo: VecDeque::new(), cap: cap.max(1) }
    }

    /// Scope history to `board_id`. A different board starts empty.
    pub fn set_board(&mut self, board_id: Option<Uuid>) {
        if self.board_id != board_id {
            self.clear();
        }
        self.board_id = board_id;
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    fn in_scope(&self, obj: &CanvasObject) -> bool {
        self.board_id == Some(obj.board_id)
    }

    fn record(&mut self, entry: HistoryEntry) {
        push_with_cap(&mut self.undo, entry, self.cap);
        self.redo.clear();
    }

    // =========================================================================
    // RECORD
    // =========================================================================

    /// Record a create. `object` may still carry a placeholder id; `remap`
    /// moves the entry to the server id once the create is confirmed.
    pub fn record_create(&mut self, object: CanvasObject) {
        if !self.in_scope(&object) {
            return;
        }
        self.record(HistoryEntry::Create(object));
    }

    /// Record and apply a local update. Returns `false` if nothing was done.
    pub fn record_update(&mut self, id: &ObjectId, patch: &ObjectPatch, cache: &mut ObjectCache) -> bool {
        let Some(before) = cache.get(id).filter(|o| self.in_scope(o)).cloned() else {
            return false;
        };
        let mut after = before.clone();
        apply_optimistic_update(&mut after, patch, now_ms());
        cache.insert(after.clone());
        self.record(HistoryEntry::Update { before, after });
        true
    }

    /// Record and apply a delete. Returns the removed object.
    pub fn record_delete(&mut self, id: &ObjectId, cache: &mut ObjectCache) -> Option<CanvasObject> {
        self.record_delete_many(std::slice::from_ref(id), cache).pop()
    }

    /// Record and apply a multi-select delete, one entry per object.
    pub fn record_delete_many(&mut self, ids: &[ObjectId], cache: &mut ObjectCache) -> Vec<CanvasObject> {
        let targets: Vec<ObjectId> = ids
            .iter()
            .filter(|id| cache.get(id).is_some_and(|o| self.in_scope(o)))
            .copied()
            .collect();
        let mut removed = Vec::with_capacity(targets.len());
        for id in targets {
            if let Some(obj) = cache.remove(&id) {
                self.record(HistoryEntry::Delete(obj.clone()));
                removed.push(obj);
            }
        }
        removed
    }

    /// Drop the newest delete entry for `id`, used when the server refused
    /// the delete and the object was put back.
    pub fn discard_delete(&mut self, id: &ObjectId) -> bool {
        let found = self
            .undo
            .iter()
            .rposition(|e| matches!(e, HistoryEntry::Delete(obj) if obj.id == *id));
        found.and_then(|i| self.undo.remove(i)).is_some()
    }

    /// Drop every entry that touches `id`.
    pub fn forget(&mut self, id: &ObjectId) {
        let keep = |e: &HistoryEntry| match e {
            HistoryEntry::Create(obj) | HistoryEntry::Delete(obj) => obj.id != *id,
            HistoryEntry::Update { before, .. } => before.id != *id,
        };
        self.undo.retain(keep);
        self.redo.retain(keep);
    }

    // =========================================================================
    // UNDO / REDO
    // =========================================================================

    pub fn undo(&mut self, cache: &mut ObjectCache) -> Option<HistoryEffect> {
        self.board_id?;
        let entry = self.undo.pop_back()?;
        let effect = match &entry {
            HistoryEntry::Create(obj) => remove_effect(cache, obj),
            HistoryEntry::Update { before, .. } => overwrite_effect(cache, before),
            HistoryEntry::Delete(obj) => restore_effect(cache, obj),
        };
        if !matches!(effect, HistoryEffect::Missing(_)) {
            push_with_cap(&mut self.redo, entry, self.cap);
        }
        Some(effect)
    }

    pub fn redo(&mut self, cache: &mut ObjectCache) -> Option<HistoryEffect> {
        self.board_id?;
        let entry = self.redo.pop_back()?;
        let effect = match &entry {
            HistoryEntry::Create(obj) => restore_effect(cache, obj),
            HistoryEntry::Update { after, .. } => overwrite_effect(cache, after),
            HistoryEntry::Delete(obj) => remove_effect(cache, obj),
        };
        if !matches!(effect, HistoryEffect::Missing(_)) {
            push_with_cap(&mut self.undo, entry, self.cap);
        }
        Some(effect)
    }

    /// Point every entry for `old` at `new` once the server assigned it.
    pub fn remap(&mut self, old: ObjectId, new: ObjectId) {
        for entry in self.undo.iter_mut().chain(self.redo.iter_mut()) {
            match entry {
                HistoryEntry::Create(obj) | HistoryEntry::Delete(obj) => rebind(obj, old, new),
                HistoryEntry::Update { before, after } => {
                    rebind(before, old, new);
                    rebind(after, old, new);
                }
            }
        }
    }
}

fn push_with_cap(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, cap: usize) {
    stack.push_back(entry);
    while stack.len() > cap {
        stack.pop_front();
    }
}

fn rebind(obj: &mut CanvasObject, old: ObjectId, new: ObjectId) {
    if obj.id == old {
        obj.id = new;
    }
}

fn remove_effect(cache: &mut ObjectCache, obj: &CanvasObject) -> HistoryEffect {
    let removed = cache.remove(&obj.id).unwrap_or_else(|| obj.clone());
    HistoryEffect::Removed(removed)
}

fn restore_effect(cache: &mut ObjectCache, obj: &CanvasObject) -> HistoryEffect {
    let mut restored = obj.clone();
    restored.updated_at = now_ms();
    cache.insert(restored.clone());
    HistoryEffect::Restored(restored)
}

fn overwrite_effect(cache: &mut ObjectCache, snapshot: &CanvasObject) -> HistoryEffect {
    if cache.overwrite(&snapshot.id, snapshot) {
        HistoryEffect::Changed(snapshot.id)
    } else {
        HistoryEffect::Missing(snapshot.id)
    }
}
