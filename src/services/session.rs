//! Credential resolution: bearer token to user identity.
//!
//! ARCHITECTURE
//! ============
//! REST and websocket upgrades both present a bearer session token. The
//! resolver maps it to an `Identity` or reports it unauthenticated; how
//! sessions are issued is outside this service.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::store::StoreError;

/// Authenticated caller with the profile fields presence may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// `Ok(None)` means the token is unknown or expired.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, StoreError>;
}

/// Validates tokens against the `sessions` table joined to `users`.
#[derive(Clone)]
pub struct PgCredentialResolver {
    pool: PgPool,
}

impl PgCredentialResolver {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialResolver for PgCredentialResolver {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(
            r"SELECT u.id, u.name, u.avatar_url
              FROM sessions s
              JOIN users u ON u.id = s.user_id
              WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let name: String = row.try_get("name")?;
        Ok(Some(Identity {
            user_id: row.try_get("id")?,
            display_name: Some(name).filter(|n| !n.trim().is_empty()),
            avatar_url: row.try_get("avatar_url")?,
        }))
    }
}
