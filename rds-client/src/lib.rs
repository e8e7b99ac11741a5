//! # RDS Cache Client
//!
//! Purpose: Provide a pooled, synchronous handle to a Redis-compatible cache
//! server with a single opaque command entry point.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Opaque Commands**: Commands and arguments are not typed per verb.
//! 3. **Injection First**: Build a [`CacheClient`] at start-up and share it;
//!    [`global`] exists for hosts that need a lazily-built process-wide handle.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod config;
mod error;
pub mod global;
mod pool;
mod resp;

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
mod testing;

pub use client::{debug_line, CacheClient, DEBUG_TARGET};
pub use config::CacheConfig;
pub use error::{ClientError, ClientResult};
pub use pool::{
    ConnectionPool, PoolConfig, PoolStats, PooledConnection, DEFAULT_POOL_LIMIT,
    DEFAULT_PING_AFTER,
};
pub use resp::{Arg, ArgList, Value, MAX_ARRAY_LEN, MAX_BULK_LEN};
