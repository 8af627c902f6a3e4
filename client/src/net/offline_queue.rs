//! Offline queue: writes made while disconnected, replayed in order.
//!
//! DESIGN
//! ======
//! A FIFO of create/update/delete operations. `flush` executes from the
//! head and removes an operation only after the server accepted it. The
//! first failure stops the flush and leaves that operation and everything
//! behind it queued; there is no skipping and no reordering.
//!
//! Creates carry the placeholder id they were issued under. When one is
//! confirmed, later operations that still name the placeholder are
//! rewritten to the server id before they run. The mapping is only kept
//! while something is queued.
//!
//! TRADE-OFFS
//! ==========
//! The queue never drops anything by itself, so a permanently rejected
//! head blocks it. The owner inspects `last_error` and decides whether to
//! `discard_head`.

#[cfg(test)]
#[path = "offline_queue_test.rs"]
mod offline_queue_test;

use std::collections::{HashMap, VecDeque};

use frames::{CanvasObject, ObjectId, ObjectInput, ObjectPatch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::api::{ApiError, ObjectsApi};
use crate::state::dirty::DirtyTracker;
use crate::state::objects::ObjectCache;

#[derive(Clone, Debug, PartialEq)]
pub enum QueuedOp {
    Create { board_id: Uuid, local_id: ObjectId, input: ObjectInput },
    Update { board_id: Uuid, id: ObjectId, patch: ObjectPatch },
    Delete { board_id: Uuid, id: ObjectId },
}

impl QueuedOp {
    #[must_use]
    pub fn target(&self) -> ObjectId {
        match self {
            Self::Create { local_id, .. } => *local_id,
            Self::Update { id, .. } | Self::Delete { id, .. } => *id,
        }
    }
}

/// A queued create the server accepted during a flush.
#[derive(Clone, Debug, PartialEq)]
pub struct Confirmation {
    pub local_id: ObjectId,
    pub object: CanvasObject,
}

#[derive(Debug, Default)]
pub struct OfflineQueue {
    ops: VecDeque<QueuedOp>,
    remap: HashMap<ObjectId, ObjectId>,
    confirmations: Vec<Confirmation>,
    last_error: Option<ApiError>,
}

impl OfflineQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, op: QueuedOp) {
        debug!(target_id = %op.target(), queued = self.ops.len() + 1, "offline queue: enqueue");
        self.ops.push_back(op);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn peek(&self) -> Option<&QueuedOp> {
        self.ops.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedOp> {
        self.ops.iter()
    }

    /// Why the most recent flush stopped early, if it did.
    #[must_use]
    pub fn last_error(&self) -> Option<&ApiError> {
        self.last_error.as_ref()
    }

    /// Drop the head operation without executing it.
    pub fn discard_head(&mut self) -> Option<QueuedOp> {
        self.last_error = None;
        let op = self.ops.pop_front();
        self.forget_remap_if_drained();
        op
    }

    fn forget_remap_if_drained(&mut self) {
        if self.ops.is_empty() {
            self.remap.clear();
        }
    }

    /// Creates confirmed since the last call.
    pub fn take_confirmations(&mut self) -> Vec<Confirmation> {
        std::mem::take(&mut self.confirmations)
    }

    fn resolve(&self, id: ObjectId) -> ObjectId {
        self.remap.get(&id).copied().unwrap_or(id)
    }

    /// Replay queued operations in order. Returns how many succeeded.
    pub async fn flush(
        &mut self,
        api: &dyn ObjectsApi,
        token: &str,
        cache: &mut ObjectCache,
        dirty: &mut DirtyTracker,
    ) -> usize {
        self.last_error = None;
        let mut flushed = 0;

        while let Some(op) = self.ops.front().cloned() {
            match self.execute(&op, api, token, cache, dirty).await {
                Ok(()) => {
                    self.ops.pop_front();
                    flushed += 1;
                }
                Err(e) => {
                    warn!(error = %e, target_id = %op.target(), remaining = self.ops.len(), "offline queue: flush halted");
                    self.last_error = Some(e);
                    break;
                }
            }
        }

        self.forget_remap_if_drained();
        if flushed > 0 {
            debug!(flushed, remaining = self.ops.len(), "offline queue: flushed");
        }
        flushed
    }

    async fn execute(
        &mut self,
        op: &QueuedOp,
        api: &dyn ObjectsApi,
        token: &str,
        cache: &mut ObjectCache,
        dirty: &mut DirtyTracker,
    ) -> Result<(), ApiError> {
        match op {
            QueuedOp::Create { board_id, local_id, input } => {
                let mut input = input.clone();
                input.client_ref = Some(*local_id);
                let object = api.create(token, *board_id, &input).await?;
                cache.confirm_optimistic(local_id, object.clone());
                dirty.mark_synced(&object);
                self.remap.insert(*local_id, object.id);
                self.confirmations.push(Confirmation { local_id: *local_id, object });
            }
            QueuedOp::Update { board_id, id, patch } => {
                let server_id = self.resolve(*id).as_server().ok_or(ApiError::NotFound)?;
                let object = api.update(token, *board_id, server_id, patch).await?;
                if cache.reconcile(object.clone()).accepted() {
                    dirty.mark_synced(&object);
                }
            }
            QueuedOp::Delete { board_id, id } => {
                let resolved = self.resolve(*id);
                let server_id = resolved.as_server().ok_or(ApiError::NotFound)?;
                api.delete(token, *board_id, server_id).await?;
                cache.remove(&resolved);
                dirty.clear(&resolved);
            }
        }
        Ok(())
    }
}
