//! # Process-Wide Client
//!
//! Purpose: Lazily build one shared [`CacheClient`] for hosts that cannot
//! thread a handle through their call graph.
//!
//! ## Design Principles
//! 1. **Double-Checked Locking**: Readers take a shared lock only; the init
//!    mutex is touched on the first call (or after a failed first call).
//! 2. **Fallible Init**: Construction errors go back to the caller, and the
//!    slot stays empty so the next call retries.
//! 3. **Prefer Injection**: Hosts that own their start-up should build a
//!    `CacheClient` once and pass `Arc<CacheClient>` around instead.

use std::sync::Arc;

use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};
use tracing::info;

use crate::client::CacheClient;
use crate::config::CacheConfig;
use crate::error::ClientResult;

/// A lazily-initialized client slot.
///
/// The process-wide slot is a `static ClientSlot`; separate slots are handy
/// in tests and in hosts that run several isolated applications.
pub struct ClientSlot {
    current: RwLock<Option<Arc<CacheClient>>>,
    init: Mutex<()>,
}

impl ClientSlot {
    pub const fn new() -> Self {
        ClientSlot {
            current: const_rwlock(None),
            init: const_mutex(()),
        }
    }

    /// Returns the published client, if any, without constructing one.
    pub fn get(&self) -> Option<Arc<CacheClient>> {
        self.current.read().clone()
    }

    /// Returns the published client, building it with `make` on first use.
    ///
    /// Concurrent first callers serialize on the init lock; only the first
    /// one runs `make`, the rest observe its result.
    pub fn get_or_try_init<F>(&self, make: F) -> ClientResult<Arc<CacheClient>>
    where
        F: FnOnce() -> ClientResult<CacheClient>,
    {
        if let Some(client) = self.get() {
            return Ok(client);
        }

        let _guard = self.init.lock();
        if let Some(client) = self.get() {
            return Ok(client);
        }

        let client = Arc::new(make()?);
        *self.current.write() = Some(client.clone());
        Ok(client)
    }

    /// Publishes `client`, replacing whatever was there.
    pub fn publish(&self, client: CacheClient) -> Arc<CacheClient> {
        let client = Arc::new(client);
        let _guard = self.init.lock();
        *self.current.write() = Some(client.clone());
        client
    }
}

impl Default for ClientSlot {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: ClientSlot = ClientSlot::new();

/// Returns the process-wide client, building it from
/// [`CacheConfig::from_env`] on first use.
pub fn instance() -> ClientResult<Arc<CacheClient>> {
    instance_with(CacheConfig::from_env)
}

/// Like [`instance`], with settings supplied by the host.
///
/// `make_config` only runs when the client is actually constructed.
pub fn instance_with<F>(make_config: F) -> ClientResult<Arc<CacheClient>>
where
    F: FnOnce() -> CacheConfig,
{
    GLOBAL.get_or_try_init(|| {
        let config = make_config();
        let client = CacheClient::new(&config)?;
        info!(addr = %config.addr(), "cache client initialized");
        Ok(client)
    })
}

/// Builds a new client and publishes it as the process-wide instance,
/// replacing any previous one. Existing `Arc` holders keep the old client.
pub fn new_instance(config: &CacheConfig) -> ClientResult<Arc<CacheClient>> {
    let client = CacheClient::new(config)?;
    info!(addr = %config.addr(), "cache client published");
    Ok(GLOBAL.publish(client))
}

/// Toggles debug output on the process-wide client, if one exists.
///
/// Returns false when no client has been published yet.
pub fn set_debug(enabled: bool) -> bool {
    match GLOBAL.get() {
        Some(client) => {
            client.set_debug(enabled);
            true
        }
        None => false,
    }
}
