//! Board session: the one mutation surface for a joined board.
//!
//! SYSTEM CONTEXT
//! ==============
//! UI edits, server events, reconnects and the periodic sync sweep all go
//! through a `BoardSession`. It owns the object cache, dirty tracker,
//! offline queue, history and presence view for one board and drives them
//! in a fixed order, so none of them needs its own locking.
//!
//! LIFECYCLE
//! =========
//! 1. `new` → `set_status(Connected)` once the socket is up → send join.
//! 2. Inbound frames → `apply_frame` (snapshot, LWW deltas, presence).
//! 3. Local edits → `create_object` / `update_object` / `delete_object`,
//!    undo/redo. Updates are pushed by `poll_sync` after a quiet period.
//! 4. Disconnect → `set_status(Disconnected)`; writes queue up.
//! 5. Reconnect → `reconnect` flushes the queue, then the caller re-joins
//!    to receive full object state.
//!
//! ERROR HANDLING
//! ==============
//! Transient push failures and expired credentials fall back to the
//! offline queue. Rejections of a single write roll back the optimistic
//! change where one exists (create placeholders, forbidden deletes) and
//! are returned to the caller.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::time::Instant;

use frames::{BoardEvent, CanvasObject, Frame, ObjectId, ObjectInput, ObjectPatch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::net::api::{ApiError, ObjectsApi};
use crate::net::cursor::CursorThrottle;
use crate::net::offline_queue::{OfflineQueue, QueuedOp};
use crate::state::dirty::DirtyTracker;
use crate::state::history::{HistoryEffect, HistoryEngine};
use crate::state::objects::ObjectCache;
use crate::state::presence::PresenceView;

/// Realtime connection status as seen by the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

pub struct BoardSession {
    board_id: Uuid,
    token: String,
    config: SessionConfig,
    status: ConnectionStatus,
    cache: ObjectCache,
    dirty: DirtyTracker,
    queue: OfflineQueue,
    history: HistoryEngine,
    presence: PresenceView,
    cursor: CursorThrottle,
    last_change: Option<Instant>,
}

impl BoardSession {
    #[must_use]
    pub fn new(board_id: Uuid, token: impl Into<String>, config: SessionConfig) -> Self {
        let mut history = HistoryEngine::with_cap(config.history_cap);
        history.set_board(Some(board_id));
        Self {
            board_id,
            token: token.into(),
            config,
            status: ConnectionStatus::Disconnected,
            cache: ObjectCache::new(),
            dirty: DirtyTracker::new(),
            queue: OfflineQueue::new(),
            history,
            presence: PresenceView::new(),
            cursor: CursorThrottle::new(config.cursor_interval),
            last_change: None,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    #[must_use]
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    #[must_use]
    pub fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    #[must_use]
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    #[must_use]
    pub fn history(&self) -> &HistoryEngine {
        &self.history
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceView {
        &self.presence
    }

    /// Objects to draw, in stacking order.
    #[must_use]
    pub fn objects(&self) -> Vec<&CanvasObject> {
        self.cache.board_objects(self.board_id)
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!(board_id = %self.board_id, ?status, "session: connection status");
        }
        if status == ConnectionStatus::Disconnected {
            self.presence.clear();
        }
        self.status = status;
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    /// Move the session to another board. Objects of the old board stay
    /// cached until a snapshot replaces them; history and presence reset.
    pub fn switch_board(&mut self, board_id: Uuid) {
        self.cursor.forget(self.board_id);
        self.board_id = board_id;
        self.history.set_board(Some(board_id));
        self.presence.clear();
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Fold one server frame into local state. Returns `Ok(false)` for
    /// frames that are not board events or belong to another board.
    ///
    /// # Errors
    ///
    /// Returns the parse error for an event with a malformed payload.
    pub fn apply_frame(&mut self, frame: &Frame, now: Instant) -> Result<bool, serde_json::Error> {
        if frame.board_uuid().is_some_and(|b| b != self.board_id) {
            return Ok(false);
        }
        let Some(event) = BoardEvent::from_frame(frame)? else {
            return Ok(false);
        };
        self.apply_event(event, now);
        Ok(true)
    }

    pub fn apply_event(&mut self, event: BoardEvent, now: Instant) {
        match event {
            BoardEvent::ObjectsList(list) => {
                debug!(board_id = %list.board_id, count = list.objects.len(), "session: object snapshot");
                self.dirty.clear_all();
                self.dirty.mark_synced_many(&list.objects);
                self.cache.replace_board(list.board_id, list.objects);
            }
            BoardEvent::ObjectCreated(change) => {
                let pending = change
                    .client_ref
                    .filter(|local| self.cache.contains(local));
                if let Some(local) = pending {
                    self.cache.confirm_optimistic(&local, change.object.clone());
                    self.dirty.mark_synced(&change.object);
                    self.history.remap(local, change.object.id);
                } else {
                    self.reconcile(change.object);
                }
            }
            BoardEvent::ObjectUpdated(change) => self.reconcile(change.object),
            BoardEvent::ObjectDeleted(deleted) => {
                self.cache.remove(&deleted.id);
                self.dirty.clear(&deleted.id);
            }
            BoardEvent::UsersList(list) => self.presence.set_roster(list.users),
            BoardEvent::UserJoined(joined) => self.presence.user_joined(joined.user),
            BoardEvent::UserLeft(left) => self.presence.user_left(left.user_id),
            BoardEvent::CursorUpdate(cursor) => {
                self.presence.cursor_moved(cursor, now);
            }
        }
    }

    fn reconcile(&mut self, server: CanvasObject) {
        let snapshot = server.clone();
        if self.cache.reconcile(server).accepted() {
            self.dirty.mark_synced(&snapshot);
        }
    }

    // =========================================================================
    // LOCAL EDITS
    // =========================================================================

    /// Create an object. It appears immediately under a placeholder id that
    /// is swapped for the server id once the create is accepted. History
    /// records it right away; a queued create is remapped on confirmation.
    ///
    /// # Errors
    ///
    /// Returns a rejection after rolling the placeholder back.
    pub async fn create_object(&mut self, api: &dyn ObjectsApi, input: ObjectInput) -> Result<ObjectId, ApiError> {
        let local = self.cache.add_optimistic(self.board_id, &input);
        let id = match self.push_create(api, local, input).await? {
            Some(object) => object.id,
            None => local,
        };
        if let Some(created) = self.cache.get(&id).cloned() {
            self.history.record_create(created);
        }
        Ok(id)
    }

    /// Push a create for `local`. `Ok(None)` means it was queued.
    async fn push_create(
        &mut self,
        api: &dyn ObjectsApi,
        local: ObjectId,
        mut input: ObjectInput,
    ) -> Result<Option<CanvasObject>, ApiError> {
        if !self.is_online() {
            self.queue.enqueue(QueuedOp::Create { board_id: self.board_id, local_id: local, input });
            return Ok(None);
        }
        input.client_ref = Some(local);
        match api.create(&self.token, self.board_id, &input).await {
            Ok(object) => {
                self.cache.confirm_optimistic(&local, object.clone());
                self.dirty.mark_synced(&object);
                Ok(Some(object))
            }
            Err(e) if e.is_rejection() => {
                warn!(board_id = %self.board_id, error = %e, "session: create rejected");
                self.cache.rollback_optimistic(&local);
                Err(e)
            }
            Err(e) => {
                debug!(error = %e, "session: create deferred to offline queue");
                input.client_ref = None;
                self.queue.enqueue(QueuedOp::Create { board_id: self.board_id, local_id: local, input });
                Ok(None)
            }
        }
    }

    /// Apply a local edit. The push happens on the next sync sweep.
    pub fn update_object(&mut self, id: &ObjectId, patch: &ObjectPatch) -> bool {
        if !self.history.record_update(id, patch, &mut self.cache) {
            return false;
        }
        if id.is_local() {
            // Placeholder: its create is queued, so the edit rides behind it.
            self.queue.enqueue(QueuedOp::Update { board_id: self.board_id, id: *id, patch: patch.clone() });
        } else {
            self.last_change = Some(Instant::now());
        }
        true
    }

    /// Delete an object locally and on the server.
    ///
    /// # Errors
    ///
    /// Returns a rejection (other than not-found) after restoring the object
    /// locally and dropping its history entry.
    pub async fn delete_object(&mut self, api: &dyn ObjectsApi, id: &ObjectId) -> Result<bool, ApiError> {
        let Some(removed) = self.history.record_delete(id, &mut self.cache) else {
            return Ok(false);
        };
        self.dirty.clear(id);
        if let Err(e) = self.push_delete(api, *id).await {
            self.history.discard_delete(id);
            self.cache.insert(removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Delete a multi-selection; one history entry per object. Returns how
    /// many were deleted or queued.
    ///
    /// # Errors
    ///
    /// Every object is attempted. Rejected ones are restored without a
    /// history entry and the first rejection is returned.
    pub async fn delete_many(&mut self, api: &dyn ObjectsApi, ids: &[ObjectId]) -> Result<usize, ApiError> {
        let removed = self.history.record_delete_many(ids, &mut self.cache);
        let mut deleted = 0;
        let mut first_err = None;
        for obj in removed {
            self.dirty.clear(&obj.id);
            match self.push_delete(api, obj.id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    self.history.discard_delete(&obj.id);
                    self.cache.insert(obj);
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(deleted), Err)
    }

    async fn push_delete(&mut self, api: &dyn ObjectsApi, id: ObjectId) -> Result<(), ApiError> {
        let Some(server_id) = id.as_server().filter(|_| self.is_online()) else {
            self.queue.enqueue(QueuedOp::Delete { board_id: self.board_id, id });
            return Ok(());
        };
        match api.delete(&self.token, self.board_id, server_id).await {
            Ok(()) | Err(ApiError::NotFound) => Ok(()),
            Err(e) if e.is_rejection() => {
                warn!(board_id = %self.board_id, %server_id, error = %e, "session: delete rejected");
                Err(e)
            }
            Err(e) => {
                debug!(error = %e, "session: delete deferred to offline queue");
                self.queue.enqueue(QueuedOp::Delete { board_id: self.board_id, id });
                Ok(())
            }
        }
    }

    // =========================================================================
    // UNDO / REDO
    // =========================================================================

    /// Returns `Ok(false)` when there was nothing to undo or the entry's
    /// object no longer exists.
    ///
    /// # Errors
    ///
    /// Returns a rejection while pushing the inverse change.
    pub async fn undo(&mut self, api: &dyn ObjectsApi) -> Result<bool, ApiError> {
        let Some(effect) = self.history.undo(&mut self.cache) else {
            return Ok(false);
        };
        self.propagate(api, effect).await
    }

    /// # Errors
    ///
    /// Returns a rejection while pushing the change.
    pub async fn redo(&mut self, api: &dyn ObjectsApi) -> Result<bool, ApiError> {
        let Some(effect) = self.history.redo(&mut self.cache) else {
            return Ok(false);
        };
        self.propagate(api, effect).await
    }

    async fn propagate(&mut self, api: &dyn ObjectsApi, effect: HistoryEffect) -> Result<bool, ApiError> {
        match effect {
            HistoryEffect::Removed(obj) => {
                self.dirty.clear(&obj.id);
                self.push_delete(api, obj.id).await?;
            }
            HistoryEffect::Restored(obj) => {
                // The server forgot this id; bring it back as a new object.
                self.cache.remove(&obj.id);
                let input = ObjectInput::from_object(&obj);
                let local = self.cache.add_optimistic(self.board_id, &input);
                self.history.remap(obj.id, local);
                if let Some(created) = self.push_create(api, local, input).await? {
                    self.history.remap(local, created.id);
                }
            }
            HistoryEffect::Changed(id) if id.is_local() => {
                if let Some(obj) = self.cache.get(&id) {
                    let patch = ObjectPatch::from_object(obj);
                    self.queue.enqueue(QueuedOp::Update { board_id: self.board_id, id, patch });
                }
            }
            HistoryEffect::Changed(_) => {
                self.last_change = Some(Instant::now());
            }
            HistoryEffect::Missing(id) => {
                debug!(%id, "session: history entry for a vanished object dropped");
                return Ok(false);
            }
        }
        Ok(true)
    }

    // =========================================================================
    // SYNC
    // =========================================================================

    /// Whether the debounce window since the last local edit has passed.
    #[must_use]
    pub fn sync_due(&self, now: Instant) -> bool {
        self.last_change
            .is_some_and(|t| now.saturating_duration_since(t) >= self.config.sync_debounce)
    }

    /// Run the sync sweep if it is due. Returns how many objects were pushed
    /// or queued.
    pub async fn poll_sync(&mut self, api: &dyn ObjectsApi, now: Instant) -> usize {
        if !self.sync_due(now) {
            return 0;
        }
        self.sync_dirty(api).await
    }

    /// Push every dirty object independently. Offline, or on a transient
    /// failure, the write goes to the offline queue instead.
    pub async fn sync_dirty(&mut self, api: &dyn ObjectsApi) -> usize {
        self.last_change = None;
        let ids = self.dirty.dirty_ids(self.cache.board_objects(self.board_id));
        let mut handled = 0;

        for id in ids {
            let Some(obj) = self.cache.get(&id).cloned() else {
                continue;
            };
            let Some(server_id) = id.as_server() else {
                continue;
            };
            let patch = ObjectPatch::from_object(&obj);
            handled += 1;

            if !self.is_online() {
                self.queue.enqueue(QueuedOp::Update { board_id: self.board_id, id, patch });
                self.dirty.mark_synced(&obj);
                continue;
            }

            match api.update(&self.token, self.board_id, server_id, &patch).await {
                Ok(updated) => {
                    self.cache.reconcile(updated.clone());
                    self.dirty.mark_synced(&updated);
                }
                Err(ApiError::NotFound) => {
                    debug!(%server_id, "session: dirty object gone on server");
                    self.cache.remove(&id);
                    self.dirty.clear(&id);
                }
                Err(e) if e.is_rejection() => {
                    warn!(%server_id, error = %e, "session: update rejected, keeping local copy");
                    self.dirty.mark_synced(&obj);
                }
                Err(e) => {
                    debug!(%server_id, error = %e, "session: update deferred to offline queue");
                    self.queue.enqueue(QueuedOp::Update { board_id: self.board_id, id, patch });
                    self.dirty.mark_synced(&obj);
                }
            }
        }
        handled
    }

    /// Replay the offline queue after the connection comes back. A head the
    /// server rejected is discarded so later writes can proceed; a transient
    /// failure or an expired credential leaves everything for the next try.
    pub async fn reconnect(&mut self, api: &dyn ObjectsApi) -> usize {
        self.set_status(ConnectionStatus::Connected);
        let mut flushed = 0;

        loop {
            flushed += self
                .queue
                .flush(api, &self.token, &mut self.cache, &mut self.dirty)
                .await;
            self.absorb_confirmations();

            let rejected = self.queue.last_error().is_some_and(ApiError::is_rejection);
            if !rejected {
                break;
            }
            if let Some(op) = self.queue.discard_head() {
                warn!(target_id = %op.target(), "session: dropped rejected queued write");
                if let QueuedOp::Create { local_id, .. } = op {
                    self.cache.rollback_optimistic(&local_id);
                    self.history.forget(&local_id);
                }
            }
        }

        info!(board_id = %self.board_id, flushed, remaining = self.queue.len(), "session: reconnect flush");
        flushed
    }

    /// Queued creates were recorded under their placeholder; point history
    /// at the server ids. The cache is already up to date.
    fn absorb_confirmations(&mut self) {
        for confirmed in self.queue.take_confirmations() {
            self.history.remap(confirmed.local_id, confirmed.object.id);
        }
    }

    // =========================================================================
    // CURSORS
    // =========================================================================

    /// Outbound cursor frame, or `None` inside the throttle window.
    pub fn cursor_frame(&mut self, x: f64, y: f64, now: Instant) -> Option<Frame> {
        if !self.is_online() {
            return None;
        }
        self.cursor.cursor_frame(self.board_id, x, y, now)
    }

    pub fn prune_cursors(&mut self, now: Instant) -> usize {
        self.presence.prune_stale_cursors(now, self.config.cursor_stale_ttl)
    }
}
