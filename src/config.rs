//! Environment configuration for the lobby server.
//!
//! Every setting is optional; a bare environment runs against the in-memory
//! store on `127.0.0.1:8000`.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::actions::{HostingPolicy, DEFAULT_JOIN_ATTEMPTS};
use crate::feed::{FeedConfig, DEFAULT_FEED_LIMIT};
use crate::session::DEFAULT_SESSION_TTL;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {message}")]
    InvalidValue {
        var: &'static str,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    pub feed_limit: usize,
    pub join_attempts: usize,
    pub hosting_policy: HostingPolicy,
    /// How long the server trusts a resolved profile before looking it up again.
    pub session_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            feed_limit: DEFAULT_FEED_LIMIT,
            join_attempts: DEFAULT_JOIN_ATTEMPTS,
            hosting_policy: HostingPolicy::default(),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl Config {
    /// Read configuration from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let hosting_policy = match lookup("LOBBY_HOSTING_POLICY") {
            Some(value) => HostingPolicy::try_from(value.as_str()).map_err(|message| {
                ConfigError::InvalidValue {
                    var: "LOBBY_HOSTING_POLICY",
                    value,
                    message,
                }
            })?,
            None => defaults.hosting_policy,
        };

        let feed_limit = parse_var(&lookup, "LOBBY_FEED_LIMIT", defaults.feed_limit)?;
        if !(1..=DEFAULT_FEED_LIMIT).contains(&feed_limit) {
            return Err(ConfigError::InvalidValue {
                var: "LOBBY_FEED_LIMIT",
                value: feed_limit.to_string(),
                message: format!("must be between 1 and {}", DEFAULT_FEED_LIMIT),
            });
        }

        // One pooled connection is held by the change listener.
        let db_max_connections = parse_var(
            &lookup,
            "LOBBY_DB_MAX_CONNECTIONS",
            defaults.db_max_connections,
        )?;
        if db_max_connections < 2 {
            return Err(ConfigError::InvalidValue {
                var: "LOBBY_DB_MAX_CONNECTIONS",
                value: db_max_connections.to_string(),
                message: "must be at least 2".into(),
            });
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            bind_addr: parse_var(&lookup, "LOBBY_BIND_ADDR", defaults.bind_addr)?,
            db_max_connections,
            feed_limit,
            join_attempts: parse_var(&lookup, "LOBBY_JOIN_ATTEMPTS", defaults.join_attempts)?,
            hosting_policy,
            session_ttl: Duration::from_secs(parse_var(
                &lookup,
                "LOBBY_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )?),
        })
    }

    pub fn feed(&self) -> FeedConfig {
        FeedConfig::with_limit(self.feed_limit)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            message: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
