//! Cache connection settings.
//!
//! Hosts can embed `CacheConfig` in their own serde config tree or load it
//! from the environment with [`CacheConfig::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::pool::{PoolConfig, DEFAULT_POOL_LIMIT, DEFAULT_PING_AFTER};

/// Cache server location plus pool tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub max_idle: usize,
    pub max_active: usize,
    /// Seconds before an idle connection is closed on borrow. Unset disables.
    pub idle_timeout_secs: Option<u64>,
    /// Seconds before any connection is retired. Unset disables.
    pub max_conn_lifetime_secs: Option<u64>,
    /// Idle seconds after which a connection is pinged before reuse.
    pub ping_after_secs: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    /// Emit one diagnostic line per command.
    pub debug: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            max_idle: DEFAULT_POOL_LIMIT,
            max_active: DEFAULT_POOL_LIMIT,
            idle_timeout_secs: None,
            max_conn_lifetime_secs: None,
            ping_after_secs: Some(DEFAULT_PING_AFTER.as_secs()),
            connect_timeout_ms: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
            debug: true,
        }
    }
}

impl CacheConfig {
    /// Loads settings from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    /// - `RDS_CACHE_HOST` - server host (default: 127.0.0.1)
    /// - `RDS_CACHE_PORT` - server port (default: 6379)
    /// - `RDS_CACHE_MAX_IDLE` - idle connections kept (default: 10000)
    /// - `RDS_CACHE_MAX_ACTIVE` - advisory live connection cap (default: 10000)
    /// - `RDS_CACHE_CONNECT_TIMEOUT_MS` - dial timeout (default: none)
    /// - `RDS_CACHE_DEBUG` - per-command diagnostics (default: true)
    pub fn from_env() -> Self {
        let defaults = CacheConfig::default();
        CacheConfig {
            host: env::var("RDS_CACHE_HOST").unwrap_or(defaults.host),
            port: env_parse("RDS_CACHE_PORT").unwrap_or(defaults.port),
            max_idle: env_parse("RDS_CACHE_MAX_IDLE").unwrap_or(defaults.max_idle),
            max_active: env_parse("RDS_CACHE_MAX_ACTIVE").unwrap_or(defaults.max_active),
            connect_timeout_ms: env_parse("RDS_CACHE_CONNECT_TIMEOUT_MS")
                .or(defaults.connect_timeout_ms),
            debug: env_parse("RDS_CACHE_DEBUG").unwrap_or(defaults.debug),
            ..defaults
        }
    }

    /// `host:port` as dialed by the pool.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            addr: self.addr(),
            max_idle: self.max_idle,
            max_active: self.max_active,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            max_conn_lifetime: self.max_conn_lifetime_secs.map(Duration::from_secs),
            ping_after: self.ping_after_secs.map(Duration::from_secs),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            read_timeout: self.read_timeout_ms.map(Duration::from_millis),
            write_timeout: self.write_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Parses a set variable; unset is `None`, unparseable is logged and `None`.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparseable cache setting");
            None
        }
    }
}
