//! Server configuration from environment variables.
//!
//! Every knob has a `DEFAULT_*` constant; only `DATABASE_URL` is required.
//! Unparseable values fall back to the default rather than failing startup.

use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
/// Upper bound on items in one batch create/delete.
pub const DEFAULT_BATCH_LIMIT: usize = 100;
/// Outbound frame buffer per websocket connection.
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_RELAY_CHANNEL: &str = "board_events";
/// Requests one user may make per rate-limit window. `0` disables the limit.
pub const DEFAULT_RATE_LIMIT_MAX: usize = 100;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL is required")]
    MissingDatabaseUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub batch_limit: usize,
    pub client_channel_capacity: usize,
    /// Fan board events out to other server processes over Postgres NOTIFY.
    pub relay_enabled: bool,
    pub relay_channel: String,
    pub rate_limit_max: usize,
    pub rate_limit_window_secs: u64,
}

impl ServerConfig {
    /// # Errors
    ///
    /// Returns `MissingDatabaseUrl` when `DATABASE_URL` is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` passes the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `MissingDatabaseUrl` when `DATABASE_URL` is absent or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        Ok(Self {
            port: env_parse(&lookup, "PORT", DEFAULT_PORT),
            database_url,
            db_max_connections: env_parse(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS).max(1),
            batch_limit: env_parse(&lookup, "BATCH_LIMIT", DEFAULT_BATCH_LIMIT).max(1),
            client_channel_capacity: env_parse(&lookup, "CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY)
                .max(1),
            relay_enabled: lookup("RELAY_ENABLED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            relay_channel: lookup("RELAY_CHANNEL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_RELAY_CHANNEL.to_owned()),
            rate_limit_max: env_parse(&lookup, "RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX),
            rate_limit_window_secs: env_parse(&lookup, "RATE_LIMIT_WINDOW_SECS", DEFAULT_RATE_LIMIT_WINDOW_SECS).max(1),
        })
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
