//! Room broadcaster: per-board fan-out of frames to live connections.
//!
//! DESIGN
//! ======
//! A room is the set of connections that joined a board, each represented
//! by the sender half of its outbound frame channel. `broadcast` delivers
//! to every local member (the originator included, unless excluded) and
//! hands the frame to the relay so members connected to other server
//! processes receive it too.
//!
//! Relay publishes go through one queue drained by a single task, so
//! other processes see a board's frames in the order they were broadcast.
//!
//! Delivery is best-effort: a member whose channel is full or closed is
//! skipped, never retried, and so is a relay envelope when the publish
//! queue is full. Clients resynchronize from the full object list on their
//! next join.

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use frames::Frame;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::relay::{RelayEnvelope, RoomRelay};

/// Outbound channel of one websocket connection.
pub type ClientSender = mpsc::Sender<Frame>;

/// Envelopes waiting for the relay publisher task.
pub const RELAY_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
struct RelayPublisher {
    origin: Uuid,
    tx: mpsc::Sender<RelayEnvelope>,
}

#[derive(Clone, Default)]
pub struct RoomBroadcaster {
    rooms: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, ClientSender>>>>,
    relay: Option<RelayPublisher>,
}

impl RoomBroadcaster {
    /// Broadcaster for a single process.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcaster that also publishes every broadcast through `relay`.
    /// Spawns the publisher task, so it must be called inside a runtime.
    #[must_use]
    pub fn with_relay(relay: Arc<dyn RoomRelay>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RelayEnvelope>(RELAY_QUEUE_CAPACITY);
        let origin = relay.origin();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = relay.publish(&envelope).await {
                    warn!(error = %e, board_id = %envelope.board_id, syscall = %envelope.frame.syscall, "rooms: relay publish failed");
                }
            }
        });
        Self { rooms: Arc::default(), relay: Some(RelayPublisher { origin, tx }) }
    }

    pub async fn join(&self, board_id: Uuid, client_id: Uuid, tx: ClientSender) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(board_id).or_default().insert(client_id, tx);
    }

    /// Remove a connection; an emptied room is dropped.
    pub async fn leave(&self, board_id: Uuid, client_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&board_id) {
            room.remove(&client_id);
            if room.is_empty() {
                rooms.remove(&board_id);
            }
        }
    }

    /// Local connections currently in the room.
    pub async fn member_count(&self, board_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&board_id)
            .map_or(0, HashMap::len)
    }

    /// Deliver to every member, the originator included.
    pub async fn broadcast(&self, board_id: Uuid, frame: &Frame) {
        self.broadcast_except(board_id, frame, None).await;
    }

    /// Deliver to every member except `exclude`, locally and through the
    /// relay. Returns without waiting for the relay publish.
    pub async fn broadcast_except(&self, board_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
        self.deliver_local(board_id, frame, exclude).await;

        if let Some(relay) = &self.relay {
            let envelope = RelayEnvelope { origin: relay.origin, board_id, exclude, frame: frame.clone() };
            if let Err(e) = relay.tx.try_send(envelope) {
                warn!(error = %e, %board_id, syscall = %frame.syscall, "rooms: relay queue rejected frame");
            }
        }
    }

    /// Deliver to local members only. Returns how many accepted the frame.
    pub async fn deliver_local(&self, board_id: Uuid, frame: &Frame, exclude: Option<Uuid>) -> usize {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(&board_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (client_id, tx) in room {
            if exclude == Some(*client_id) {
                continue;
            }
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(%client_id, %board_id, syscall = %frame.syscall, "rooms: client channel full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}
