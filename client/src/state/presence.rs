//! Peer presence and cursor overlay for the joined board.
//!
//! Cursors only exist for users in the roster. A departing user's cursor is
//! removed with them, roster replacement drops cursors of anyone no longer
//! listed, and cursors idle past a TTL are pruned.

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use frames::{CursorState, PresenceDescriptor};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct TrackedCursor {
    state: CursorState,
    seen_at: Instant,
}

#[derive(Debug, Default)]
pub struct PresenceView {
    roster: HashMap<Uuid, PresenceDescriptor>,
    cursors: HashMap<Uuid, TrackedCursor>,
}

impl PresenceView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster with an authoritative list.
    pub fn set_roster(&mut self, users: Vec<PresenceDescriptor>) {
        self.roster = users.into_iter().map(|u| (u.user_id, u)).collect();
        let roster = &self.roster;
        self.cursors.retain(|user_id, _| roster.contains_key(user_id));
    }

    pub fn user_joined(&mut self, user: PresenceDescriptor) {
        self.roster.insert(user.user_id, user);
    }

    pub fn user_left(&mut self, user_id: Uuid) {
        self.roster.remove(&user_id);
        self.cursors.remove(&user_id);
    }

    /// Record a cursor position. Ignored for users not in the roster.
    pub fn cursor_moved(&mut self, cursor: CursorState, now: Instant) -> bool {
        if !self.roster.contains_key(&cursor.user_id) {
            return false;
        }
        self.cursors.insert(cursor.user_id, TrackedCursor { state: cursor, seen_at: now });
        true
    }

    /// Drop cursors not updated within `ttl`. Returns how many were removed.
    pub fn prune_stale_cursors(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.cursors.len();
        self.cursors
            .retain(|_, c| now.saturating_duration_since(c.seen_at) < ttl);
        before - self.cursors.len()
    }

    pub fn clear(&mut self) {
        self.roster.clear();
        self.cursors.clear();
    }

    /// Roster sorted by display name for stable rendering.
    #[must_use]
    pub fn users(&self) -> Vec<&PresenceDescriptor> {
        let mut users: Vec<&PresenceDescriptor> = self.roster.values().collect();
        users.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.user_id.cmp(&b.user_id)));
        users
    }

    #[must_use]
    pub fn user(&self, user_id: Uuid) -> Option<&PresenceDescriptor> {
        self.roster.get(&user_id)
    }

    #[must_use]
    pub fn cursor(&self, user_id: Uuid) -> Option<&CursorState> {
        self.cursors.get(&user_id).map(|c| &c.state)
    }

    pub fn cursors(&self) -> impl Iterator<Item = &CursorState> {
        self.cursors.values().map(|c| &c.state)
    }
}
