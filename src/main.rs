mod config;
mod db;
mod rate_limit;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::pg_store::PgObjectStore;
use services::relay::PgRelay;
use services::rooms::RoomBroadcaster;
use services::session::PgCredentialResolver;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env().expect("invalid configuration");
    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    // Without the relay, rooms only reach connections on this process.
    let rooms = if config.relay_enabled {
        let relay = Arc::new(PgRelay::new(pool.clone(), config.relay_channel.clone()));
        let rooms = RoomBroadcaster::with_relay(relay.clone());
        if let Err(e) = relay.spawn_listener(rooms.clone()).await {
            tracing::warn!(error = %e, "relay listener failed to start; broadcasts stay local");
        }
        rooms
    } else {
        RoomBroadcaster::new()
    };

    let port = config.port;
    let state = state::AppState::new(
        Arc::new(PgObjectStore::new(pool.clone())),
        Arc::new(PgCredentialResolver::new(pool)),
        rooms,
        config,
    );

    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter.window());
        loop {
            ticker.tick().await;
            limiter.sweep();
        }
    });

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "collabsync listening");
    axum::serve(listener, app).await.expect("server failed");
}
