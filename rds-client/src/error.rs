//! # Client Errors
//!
//! One error type for dialing, framing and server replies so callers can
//! match on the failure without caring which layer produced it.

use thiserror::Error;

/// Result type for the cache client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the cache client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A new connection to the server could not be established.
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply (e.g. `ERR unknown command`).
    #[error("{0}")]
    Server(String),
    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ClientError {
    /// Returns true when the connection that produced this error can no
    /// longer be trusted and must not go back to the pool.
    ///
    /// Error replies leave the stream in a consistent state; everything else
    /// may have left a half-read frame behind.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ClientError::Server(_))
    }
}
