//! Outbound cursor throttle.
//!
//! At most one cursor frame per board per interval leaves the client.
//! Positions inside the window are dropped, not queued: the next emitted
//! frame carries the newest position anyway.

#[cfg(test)]
#[path = "cursor_test.rs"]
mod cursor_test;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use frames::{CURSOR_MOVE, CursorMove, Frame};
use uuid::Uuid;

use crate::config::DEFAULT_CURSOR_INTERVAL;

#[derive(Debug)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: HashMap<Uuid, Instant>,
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_CURSOR_INTERVAL)
    }
}

impl CursorThrottle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_sent: HashMap::new() }
    }

    /// Whether a cursor frame for `board_id` may go out at `now`. Records
    /// the emission when it may.
    pub fn should_emit(&mut self, board_id: Uuid, now: Instant) -> bool {
        if let Some(last) = self.last_sent.get(&board_id) {
            if now.saturating_duration_since(*last) < self.interval {
                return false;
            }
        }
        self.last_sent.insert(board_id, now);
        true
    }

    /// Build the `cursor:move` frame if the throttle allows it.
    pub fn cursor_frame(&mut self, board_id: Uuid, x: f64, y: f64, now: Instant) -> Option<Frame> {
        if !self.should_emit(board_id, now) {
            return None;
        }
        let data = serde_json::to_value(CursorMove { x, y }).unwrap_or_default();
        Some(Frame::request(CURSOR_MOVE, data).with_board_id(board_id))
    }

    pub fn forget(&mut self, board_id: Uuid) {
        self.last_sent.remove(&board_id);
    }
}
