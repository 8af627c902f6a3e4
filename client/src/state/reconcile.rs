//! Reconciliation: folding server objects into the local cache.
//!
//! DESIGN
//! ======
//! Last-writer-wins on the server's `updated_at`. The server copy is taken
//! when it is at least as new as the local one, so ties go to the server.
//! A server copy that is display-identical to the cached one is not
//! written at all, which keeps renderers from seeing a no-op change.
//!
//! TRADE-OFFS
//! ==========
//! Timestamps come from two clocks: the server stamps commits, the client
//! stamps optimistic edits. A client clock running ahead can shadow a
//! concurrent remote edit until the next server write overtakes it.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use frames::CanvasObject;

use super::objects::ObjectCache;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local copy existed; the server object was inserted.
    Inserted,
    /// The server copy won and replaced the local one.
    Replaced,
    /// The server copy won but matched the cache field for field.
    Unchanged,
    /// The local copy is strictly newer; the server copy was dropped.
    Stale,
}

impl ReconcileOutcome {
    /// Whether the cache now reflects the server's state for this object.
    #[must_use]
    pub fn accepted(self) -> bool {
        !matches!(self, Self::Stale)
    }
}

/// Server wins when it is as new as, or newer than, the local copy.
#[must_use]
pub fn should_accept_server(local: Option<&CanvasObject>, server: &CanvasObject) -> bool {
    local.is_none_or(|l| server.updated_at >= l.updated_at)
}

/// Field-level equality over everything a renderer draws.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_display_equal(a: &CanvasObject, b: &CanvasObject) -> bool {
    a.id == b.id
        && a.kind == b.kind
        && a.x == b.x
        && a.y == b.y
        && a.width == b.width
        && a.height == b.height
        && a.rotation == b.rotation
        && a.z_index == b.z_index
        && a.data == b.data
}

impl ObjectCache {
    /// Apply one server object under LWW.
    pub fn reconcile(&mut self, server: CanvasObject) -> ReconcileOutcome {
        let (existed, unchanged) = {
            let local = self.get(&server.id);
            if !should_accept_server(local, &server) {
                return ReconcileOutcome::Stale;
            }
            (local.is_some(), local.is_some_and(|l| is_display_equal(l, &server)))
        };
        if unchanged {
            return ReconcileOutcome::Unchanged;
        }
        self.insert(server);
        if existed { ReconcileOutcome::Replaced } else { ReconcileOutcome::Inserted }
    }
}
