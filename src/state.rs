//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Persistence and credential checks sit behind traits so the gateway and
//! routes run unchanged against Postgres in production and the in-memory
//! doubles in `test_helpers` under test. Rooms and presence are
//! process-local; the relay (when enabled) is wired into `rooms`.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::services::presence::PresenceRegistry;
use crate::services::rooms::RoomBroadcaster;
use crate::services::session::CredentialResolver;
use crate::services::store::ObjectStore;

/// Clone is required by Axum; every field is an `Arc` or cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub rooms: RoomBroadcaster,
    pub presence: PresenceRegistry,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        credentials: Arc<dyn CredentialResolver>,
        rooms: RoomBroadcaster,
        config: ServerConfig,
    ) -> Self {
        let rate_limiter =
            RateLimiter::new(config.rate_limit_max, Duration::from_secs(config.rate_limit_window_secs));
        Self {
            store,
            credentials,
            rooms,
            presence: PresenceRegistry::new(),
            rate_limiter,
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
