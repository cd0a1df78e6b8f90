//! Server configuration.
//!
//! Everything comes from the environment (after `.env` is loaded by `main`).
//! Only `DATABASE_URL` is required; tuning knobs fall back to defaults when
//! missing or unparseable.

use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DOC_FLUSH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_WS_CLIENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} required")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Delay between persistence passes over dirty documents.
    pub doc_flush_interval_ms: u64,
    /// Outbound frame queue per websocket connection.
    pub client_queue_capacity: usize,
}

impl ServerConfig {
    /// Build config from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        Ok(Self {
            database_url,
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            doc_flush_interval_ms: parse_or(&lookup, "DOC_FLUSH_INTERVAL_MS", DEFAULT_DOC_FLUSH_INTERVAL_MS),
            client_queue_capacity: parse_or(&lookup, "WS_CLIENT_QUEUE_CAPACITY", DEFAULT_WS_CLIENT_QUEUE_CAPACITY)
                .max(1),
        })
    }
}

/// Parse a variable, falling back to `default` when missing or invalid.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    lookup(key).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
