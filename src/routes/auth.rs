//! Bearer credential extraction for REST handlers.

use axum::extract::FromRef;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::services::gateway::GatewayError;
use crate::services::session::Identity;
use crate::state::AppState;

/// Token from an `Authorization: Bearer <token>` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve `token` to an identity; unknown or missing tokens are `Unauthorized`.
///
/// # Errors
///
/// Returns `Unauthorized`, or `Store` if the resolver itself failed.
pub(crate) async fn authenticate(state: &AppState, token: Option<&str>) -> Result<Identity, GatewayError> {
    let Some(token) = token else {
        return Err(GatewayError::Unauthorized);
    };
    state
        .credentials
        .resolve(token)
        .await?
        .ok_or(GatewayError::Unauthorized)
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated caller. Use as a handler parameter to require a credential.
/// Each extraction counts against the caller's request rate limit.
pub struct AuthUser {
    pub identity: Identity,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let identity = authenticate(&app_state, bearer_token(&parts.headers)).await?;
        app_state.rate_limiter.check_and_record(identity.user_id)?;
        Ok(Self { identity })
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
