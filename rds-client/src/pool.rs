//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to the cache server so each command costs a
//! round trip rather than a handshake.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a set of reusable connections, most
//!    recently used first.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Test on Borrow**: Connections idle past `ping_after` are pinged before
//!    hand-out; dead ones are dropped and replaced transparently.
//! 4. **Advisory Limit**: `max_active` never blocks or rejects a caller; going
//!    past it is counted and logged.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, Arg, Value};

/// Idle time after which a pooled connection is pinged before reuse.
pub const DEFAULT_PING_AFTER: Duration = Duration::from_secs(60);

/// Default cap for both idle and active connections.
pub const DEFAULT_POOL_LIMIT: usize = 10_000;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Advisory maximum of live connections (idle + in-use).
    pub max_active: usize,
    /// Close idle connections older than this on borrow. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Close connections older than this. `None` disables.
    pub max_conn_lifetime: Option<Duration>,
    /// Ping connections idle at least this long before reuse. `None` disables.
    pub ping_after: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: DEFAULT_POOL_LIMIT,
            max_active: DEFAULT_POOL_LIMIT,
            idle_timeout: None,
            max_conn_lifetime: None,
            ping_after: Some(DEFAULT_PING_AFTER),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections, idle and borrowed.
    pub active: usize,
    /// Connections waiting in the pool.
    pub idle: usize,
    /// Connections dialed since the pool was created.
    pub dials: u64,
    /// Liveness PINGs issued on borrow.
    pub pings: u64,
    /// PINGs that failed and cost a connection.
    pub ping_failures: u64,
    /// Connections closed by the pool (broken, expired or surplus).
    pub discarded: u64,
    /// Acquisitions served while `active` was already at `max_active`.
    pub over_limit: u64,
}

#[derive(Default)]
struct PoolCounters {
    dials: AtomicU64,
    pings: AtomicU64,
    ping_failures: AtomicU64,
    discarded: AtomicU64,
    over_limit: AtomicU64,
}

struct IdleConnection {
    conn: Connection,
    idle_since: Instant,
}

struct PoolState {
    // Front is the most recently returned connection.
    idle: VecDeque<IdleConnection>,
    active: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    counters: PoolCounters,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool. No connection is dialed until the first borrow.
    pub fn new(config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::new(),
            active: 0,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                counters: PoolCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrows a connection, reusing an idle one when possible.
    ///
    /// The connection goes back to the pool when the returned guard drops.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        self.acquire_at(Instant::now())
    }

    /// Borrow logic with an explicit clock reading.
    ///
    /// **Logic**:
    /// 1. Pop the most recently used idle connection.
    /// 2. Close it if it outlived `idle_timeout` or `max_conn_lifetime`.
    /// 3. Check it with PING if idle for at least `ping_after`; close on failure.
    /// 4. With no usable idle connection left, dial a new one.
    pub(crate) fn acquire_at(&self, now: Instant) -> ClientResult<PooledConnection> {
        let config = &self.inner.config;
        while let Some(IdleConnection { mut conn, idle_since }) = self.inner.pop_idle() {
            let idle_for = now.saturating_duration_since(idle_since);
            if exceeds(config.idle_timeout, idle_for)
                || conn.expired(config.max_conn_lifetime, now)
            {
                self.inner.discard(conn);
                continue;
            }

            if exceeds(config.ping_after, idle_for) {
                self.inner.counters.pings.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = conn.exec("PING", &[]) {
                    debug!(
                        addr = %config.addr,
                        error = %err,
                        "stale connection failed liveness check"
                    );
                    self.inner.counters.ping_failures.fetch_add(1, Ordering::Relaxed);
                    self.inner.discard(conn);
                    continue;
                }
            }

            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        self.inner.reserve();
        match Connection::connect(config) {
            Ok(conn) => {
                self.inner.counters.dials.fetch_add(1, Ordering::Relaxed);
                debug!(addr = %config.addr, "dialed new cache connection");
                Ok(PooledConnection::new(self.inner.clone(), conn))
            }
            Err(err) => {
                error!(addr = %config.addr, error = %err, "cache dial failed");
                self.inner.release_slot();
                Err(err)
            }
        }
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let (active, idle) = {
            let state = self.inner.state.lock();
            (state.active, state.idle.len())
        };
        let counters = &self.inner.counters;
        PoolStats {
            active,
            idle,
            dials: counters.dials.load(Ordering::Relaxed),
            pings: counters.pings.load(Ordering::Relaxed),
            ping_failures: counters.ping_failures.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            over_limit: counters.over_limit.load(Ordering::Relaxed),
        }
    }
}

impl ConnectionPool {
    #[cfg(test)]
    pub(crate) fn idle_ports(&self) -> Vec<u16> {
        let state = self.inner.state.lock();
        state.idle.iter().filter_map(|idle| idle.conn.local_port()).collect()
    }
}

impl PoolInner {
    fn pop_idle(&self) -> Option<IdleConnection> {
        self.state.lock().idle.pop_front()
    }

    fn reserve(&self) {
        let mut state = self.state.lock();
        if state.active >= self.config.max_active {
            self.counters.over_limit.fetch_add(1, Ordering::Relaxed);
            debug!(
                active = state.active,
                max_active = self.config.max_active,
                "active connection limit reached, dialing anyway"
            );
        }
        state.active += 1;
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
    }

    fn discard(&self, conn: Connection) {
        drop(conn);
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        self.release_slot();
    }

    fn return_connection(&self, conn: Connection) {
        let now = Instant::now();
        if conn.expired(self.config.max_conn_lifetime, now) {
            self.discard(conn);
            return;
        }

        let surplus = {
            let mut state = self.state.lock();
            state.idle.push_front(IdleConnection { conn, idle_since: now });
            let mut surplus = Vec::new();
            while state.idle.len() > self.config.max_idle {
                match state.idle.pop_back() {
                    Some(oldest) => surplus.push(oldest.conn),
                    None => break,
                }
            }
            surplus
        };
        // Close the least recently used connections outside the lock.
        for conn in surplus {
            self.discard(conn);
        }
    }
}

fn exceeds(limit: Option<Duration>, elapsed: Duration) -> bool {
    limit.map_or(false, |limit| elapsed >= limit)
}

/// RAII wrapper returning a connection to the pool on drop.
///
/// Connections that hit an IO or protocol failure are closed instead.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection { pool, conn: Some(conn) }
    }

    /// Executes one command and returns the parsed reply.
    pub fn exec(&mut self, command: &str, args: &[Arg]) -> ClientResult<Value> {
        match self.conn.as_mut() {
            Some(conn) => conn.exec(command, args),
            None => Err(ClientError::Protocol),
        }
    }

    #[cfg(test)]
    pub(crate) fn local_port(&self) -> Option<u16> {
        self.conn.as_ref().and_then(|conn| conn.local_port())
    }

    /// Last fatal error seen on this connection, if any.
    pub fn err(&self) -> Option<&str> {
        self.conn.as_ref().and_then(|conn| conn.err.as_deref())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if conn.err.is_some() {
            self.pool.discard(conn);
        } else {
            self.pool.return_connection(conn);
        }
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    created_at: Instant,
    err: Option<String>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let dial_err = |source| ClientError::Dial {
            addr: config.addr.clone(),
            source,
        };

        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout).map_err(dial_err)?;
        stream.set_write_timeout(config.write_timeout).map_err(dial_err)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true).map_err(dial_err)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            created_at: Instant::now(),
            err: None,
        })
    }

    fn exec(&mut self, command: &str, args: &[Arg]) -> ClientResult<Value> {
        match self.round_trip(command, args) {
            Ok(Value::Error(message)) => Err(ClientError::Server(message)),
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_fatal() {
                    self.err = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    fn round_trip(&mut self, command: &str, args: &[Arg]) -> ClientResult<Value> {
        self.write_buf.clear();
        encode_command(command, args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }

    #[cfg(test)]
    fn local_port(&self) -> Option<u16> {
        self.reader.get_ref().local_addr().ok().map(|addr| addr.port())
    }

    fn expired(&self, lifetime: Option<Duration>, now: Instant) -> bool {
        exceeds(lifetime, now.saturating_duration_since(self.created_at))
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = config
        .addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(config.addr.clone()))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(source) => Err(ClientError::Dial {
            addr: config.addr.clone(),
            source,
        }),
        None => Err(ClientError::InvalidAddress(config.addr.clone())),
    }
}
