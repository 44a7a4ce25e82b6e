use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, anyhow};

/// Runtime settings, read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub encryption_key: String,
    /// Upper bound on a single outbound WebSocket write.
    pub ws_write_timeout: Duration,
    /// Frames queued per connection before writes start waiting.
    pub ws_outbox_capacity: usize,
    pub session_ttl_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:8080".to_owned())?,
            database_url: var_or("DATABASE_URL", "sqlite://sealedchat.db?mode=rwc".to_owned())?,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", 16)?,
            encryption_key: dotenv::var("ENCRYPTION_KEY").context("ENCRYPTION_KEY must be set")?,
            ws_write_timeout: Duration::from_millis(var_or("WS_WRITE_TIMEOUT_MS", 5000)?),
            ws_outbox_capacity: var_or("WS_OUTBOX_CAPACITY", 64)?,
            session_ttl_days: var_or("SESSION_TTL_DAYS", 7)?,
        })
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match dotenv::var(key) {
        Ok(raw) => raw.parse().map_err(|e| anyhow!("{key}={raw:?} is invalid: {e}")),
        Err(dotenv::Error::EnvVar(std::env::VarError::NotPresent)) => Ok(default),
        Err(e) => Err(anyhow::Error::from(e).context(format!("reading {key}"))),
    }
}
