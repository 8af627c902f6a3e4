//! Client tuning knobs.

use std::time::Duration;

/// Quiet period after the last local change before dirty objects are pushed.
pub const DEFAULT_SYNC_DEBOUNCE: Duration = Duration::from_millis(500);

/// Minimum spacing between outbound cursor frames (about one per frame at 60 Hz).
pub const DEFAULT_CURSOR_INTERVAL: Duration = Duration::from_millis(16);

/// Undo and redo depth.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Peer cursors with no update for this long are dropped.
pub const DEFAULT_CURSOR_STALE_TTL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub sync_debounce: Duration,
    pub cursor_interval: Duration,
    pub history_cap: usize,
    pub cursor_stale_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_debounce: DEFAULT_SYNC_DEBOUNCE,
            cursor_interval: DEFAULT_CURSOR_INTERVAL,
            history_cap: DEFAULT_HISTORY_CAP,
            cursor_stale_ttl: DEFAULT_CURSOR_STALE_TTL,
        }
    }
}
