//! # Cache Client
//!
//! Purpose: Expose one entry point, [`CacheClient::execute`], for issuing
//! arbitrary commands against a pooled cache server.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides pooling and protocol details.
//! 2. **Opaque Commands**: Command names and arguments pass through untouched;
//!    replies come back as [`Value`] without interpretation.
//! 3. **Fail Fast**: Construction dials once so an unreachable server is an
//!    error up front, not on the first request.
//! 4. **Scoped Borrowing**: Every call returns its connection before it
//!    returns to the caller, on success and failure alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::error::ClientResult;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::resp::{Arg, ArgList, Value};

/// Tracing target for the per-command diagnostic line.
pub const DEBUG_TARGET: &str = "rds_client::debug";

/// Pooled handle to the cache server.
///
/// Share it behind an `Arc` or go through [`crate::global::instance`].
pub struct CacheClient {
    pool: ConnectionPool,
    // Relaxed: a toggle racing with in-flight calls may be observed one call late.
    debug: AtomicBool,
}

impl CacheClient {
    /// Builds a client from cache settings and dials the first connection.
    pub fn new(config: &CacheConfig) -> ClientResult<Self> {
        let client = Self::with_pool_config(config.pool_config())?;
        client.set_debug(config.debug);
        Ok(client)
    }

    /// Builds a client from raw pool settings. Debug output starts enabled.
    ///
    /// # Errors
    /// Returns `ClientError::Dial` when the server cannot be reached.
    pub fn with_pool_config(config: PoolConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::new(config);
        // Dial eagerly; the connection goes straight back to the idle set.
        drop(pool.acquire()?);
        Ok(CacheClient {
            pool,
            debug: AtomicBool::new(true),
        })
    }

    /// Executes one command and returns the raw reply.
    ///
    /// Error replies from the server come back as `ClientError::Server`.
    /// The elapsed time in the debug line covers the round trip only, not
    /// the borrow.
    pub fn execute(&self, command: &str, args: &[Arg]) -> ClientResult<Value> {
        let (result, elapsed) = match self.pool.acquire() {
            Ok(mut conn) => {
                let started = Instant::now();
                let result = conn.exec(command, args);
                let elapsed = started.elapsed();
                if let Err(err) = &result {
                    if let Some(conn_err) = conn.err() {
                        warn!(
                            command,
                            error = %err,
                            conn_error = conn_err,
                            "cache command failed"
                        );
                    }
                }
                (result, elapsed)
            }
            Err(err) => (Err(err), Duration::ZERO),
        };

        if self.debug() {
            info!(target: DEBUG_TARGET, "{}", debug_line(elapsed, command, args, &result));
        }
        result
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// The underlying pool, mostly useful for [`ConnectionPool::stats`].
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

/// Formats the per-command diagnostic line:
/// `[redis] [info] [<elapsed>us]cmd=<cmd>, err=<err>, args=<args>, reply=<reply>`.
pub fn debug_line(
    elapsed: Duration,
    command: &str,
    args: &[Arg],
    result: &ClientResult<Value>,
) -> String {
    let (err, reply) = match result {
        Ok(value) => ("<nil>".to_string(), value.to_string()),
        Err(err) => (err.to_string(), "<nil>".to_string()),
    };
    format!(
        "[redis] [info] [{}us]cmd={}, err={}, args={}, reply={}",
        elapsed.as_micros(),
        command,
        err,
        ArgList(args),
        reply
    )
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("addr", &self.pool.config().addr)
            .field("debug", &self.debug())
            .finish()
    }
}
