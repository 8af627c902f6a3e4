//! Cross-process room relay over Postgres `LISTEN/NOTIFY`.
//!
//! ARCHITECTURE
//! ============
//! Every server process publishes its broadcasts as JSON envelopes on one
//! notification channel and listens on the same channel. Envelopes carry
//! the publishing process's origin id; a listener ignores its own and
//! delivers the rest to its local room members only, so a frame never
//! bounces between processes.
//!
//! ERROR HANDLING
//! ==============
//! Publish and listen failures are logged and dropped. Mutations have
//! already been persisted and acknowledged by then; remote clients catch up
//! on their next join.
//!
//! TRADE-OFFS
//! ==========
//! `pg_notify` payloads are capped near 8 KB. Frames above that are not
//! relayed; they still reach local members.

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;

use std::time::Duration;

use async_trait::async_trait;
use frames::Frame;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::rooms::RoomBroadcaster;

/// Largest payload `pg_notify` accepts, minus a little headroom.
pub const MAX_NOTIFY_PAYLOAD: usize = 7900;

const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("envelope of {0} bytes exceeds notify limit")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub origin: Uuid,
    pub board_id: Uuid,
    /// Connection on the origin process that must not receive the frame.
    pub exclude: Option<Uuid>,
    pub frame: Frame,
}

#[async_trait]
pub trait RoomRelay: Send + Sync {
    /// Id stamped on envelopes this process publishes.
    fn origin(&self) -> Uuid;

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError>;
}

/// Serialize an envelope for `pg_notify`.
///
/// # Errors
///
/// Returns `PayloadTooLarge` above `MAX_NOTIFY_PAYLOAD`.
pub fn encode_envelope(envelope: &RelayEnvelope) -> Result<String, RelayError> {
    let payload = serde_json::to_string(envelope)?;
    if payload.len() > MAX_NOTIFY_PAYLOAD {
        return Err(RelayError::PayloadTooLarge(payload.len()));
    }
    Ok(payload)
}

/// Parse an inbound notification. `None` for our own envelopes and for
/// payloads that are not envelopes.
#[must_use]
pub fn decode_envelope(payload: &str, own_origin: Uuid) -> Option<RelayEnvelope> {
    match serde_json::from_str::<RelayEnvelope>(payload) {
        Ok(envelope) if envelope.origin == own_origin => None,
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(error = %e, "relay: malformed envelope ignored");
            None
        }
    }
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgRelay {
    pool: PgPool,
    channel: String,
    origin: Uuid,
}

impl PgRelay {
    #[must_use]
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self { pool, channel: channel.into(), origin: Uuid::new_v4() }
    }

    /// Start delivering envelopes from other processes into `rooms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial `LISTEN` fails.
    pub async fn spawn_listener(&self, rooms: RoomBroadcaster) -> Result<JoinHandle<()>, RelayError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;
        info!(channel = %self.channel, origin = %self.origin, "relay: listening");

        let origin = self.origin;
        Ok(tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let Some(envelope) = decode_envelope(notification.payload(), origin) else {
                            continue;
                        };
                        let delivered = rooms
                            .deliver_local(envelope.board_id, &envelope.frame, envelope.exclude)
                            .await;
                        debug!(board_id = %envelope.board_id, syscall = %envelope.frame.syscall, delivered, "relay: delivered");
                    }
                    Err(e) => {
                        warn!(error = %e, "relay: listen failed, retrying");
                        tokio::time::sleep(LISTEN_RETRY_DELAY).await;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl RoomRelay for PgRelay {
    fn origin(&self) -> Uuid {
        self.origin
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        let payload = encode_envelope(envelope)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
