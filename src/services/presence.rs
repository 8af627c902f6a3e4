//! Presence registry: who is on each board right now.
//!
//! DESIGN
//! ======
//! One bucket per board, keyed by user id. A user may be on a board from
//! several connections at once; the entry counts them and only disappears
//! with the last one, so a second tab closing does not announce a leave.
//!
//! Locking is two-level: a process-wide `RwLock` over the board map and a
//! `Mutex` per bucket. Joins and leaves take the map lock shared, so
//! different boards never wait on each other. The map lock is taken
//! exclusively only to create a bucket or to drop an empty one; the drop
//! re-checks emptiness under that lock, so a concurrent join cannot land in
//! a bucket that is being discarded.
//!
//! Nothing here is persisted. A restart loses presence and clients rebuild
//! it by joining again.

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use frames::PresenceDescriptor;
use uuid::Uuid;

use super::session::Identity;

/// Fallback colours, picked by hashing the user id.
pub const PRESENCE_COLORS: [&str; 8] =
    ["#ef4444", "#f97316", "#eab308", "#22c55e", "#14b8a6", "#3b82f6", "#8b5cf6", "#ec4899"];

// =============================================================================
// DESCRIPTOR RESOLUTION
// =============================================================================

/// Deterministic colour for a user.
#[must_use]
pub fn fallback_color(user_id: Uuid) -> &'static str {
    let mut hash: i32 = 0;
    for ch in user_id.to_string().chars() {
        #[allow(clippy::cast_possible_wrap)]
        let code = u32::from(ch) as i32;
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(code);
    }
    PRESENCE_COLORS[(hash.unsigned_abs() % 8) as usize]
}

/// Deterministic display name for a user with no profile name.
#[must_use]
pub fn fallback_name(user_id: Uuid) -> String {
    let id = user_id.to_string();
    format!("User {}", &id[..8])
}

/// Build the descriptor for a joining user. Names come from the join
/// request, then the credential profile, then the fallback; colours from
/// the join request, then the fallback.
#[must_use]
pub fn resolve_descriptor(identity: &Identity, name: Option<&str>, color: Option<&str>) -> PresenceDescriptor {
    let display_name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
        .or_else(|| identity.display_name.clone())
        .unwrap_or_else(|| fallback_name(identity.user_id));
    let color = color
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map_or_else(|| fallback_color(identity.user_id).to_owned(), str::to_owned);

    PresenceDescriptor {
        user_id: identity.user_id,
        display_name,
        avatar_url: identity.avatar_url.clone(),
        color,
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug)]
struct Entry {
    descriptor: PresenceDescriptor,
    connections: usize,
}

type Bucket = HashMap<Uuid, Entry>;

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    boards: Arc<RwLock<HashMap<Uuid, Mutex<Bucket>>>>,
}

fn insert(bucket: &Mutex<Bucket>, descriptor: PresenceDescriptor) -> bool {
    let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
    match bucket.get_mut(&descriptor.user_id) {
        Some(entry) => {
            entry.connections += 1;
            entry.descriptor = descriptor;
            false
        }
        None => {
            bucket.insert(descriptor.user_id, Entry { descriptor, connections: 1 });
            true
        }
    }
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one connection for `descriptor.user_id`. The descriptor replaces
    /// any earlier one. Returns `true` when the user was not present before.
    pub fn join(&self, board_id: Uuid, descriptor: PresenceDescriptor) -> bool {
        {
            let boards = self.boards.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = boards.get(&board_id) {
                return insert(bucket, descriptor);
            }
        }
        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = boards.entry(board_id).or_default();
        insert(bucket, descriptor)
    }

    /// Drop one connection for `user_id`. Returns `true` when that was the
    /// user's last connection and they are now gone from the board.
    pub fn leave(&self, board_id: Uuid, user_id: Uuid) -> bool {
        let (left, now_empty) = {
            let boards = self.boards.read().unwrap_or_else(PoisonError::into_inner);
            let Some(bucket) = boards.get(&board_id) else {
                return false;
            };
            let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            let left = match bucket.get_mut(&user_id) {
                Some(entry) if entry.connections > 1 => {
                    entry.connections -= 1;
                    false
                }
                Some(_) => {
                    bucket.remove(&user_id);
                    true
                }
                None => false,
            };
            (left, bucket.is_empty())
        };

        if now_empty {
            let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
            let still_empty = boards
                .get(&board_id)
                .is_some_and(|b| b.lock().unwrap_or_else(PoisonError::into_inner).is_empty());
            if still_empty {
                boards.remove(&board_id);
            }
        }
        left
    }

    /// Everyone on the board, in no particular order.
    #[must_use]
    pub fn list(&self, board_id: Uuid) -> Vec<PresenceDescriptor> {
        let boards = self.boards.read().unwrap_or_else(PoisonError::into_inner);
        boards.get(&board_id).map_or_else(Vec::new, |bucket| {
            bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .map(|e| e.descriptor.clone())
                .collect()
        })
    }

    #[must_use]
    pub fn get(&self, board_id: Uuid, user_id: Uuid) -> Option<PresenceDescriptor> {
        let boards = self.boards.read().unwrap_or_else(PoisonError::into_inner);
        let bucket = boards.get(&board_id)?;
        let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.get(&user_id).map(|e| e.descriptor.clone())
    }

    /// Number of boards with at least one participant.
    #[must_use]
    pub fn active_boards(&self) -> usize {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
