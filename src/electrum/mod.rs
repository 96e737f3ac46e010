//! ElectrumX-compatible client stack (spec §4.8–§4.12): wire codec,
//! connection pool, rate limiter, response cache, and fee estimator.

pub mod cache;
pub mod client;
pub mod codec;
pub mod fee_estimator;
pub mod pool;
pub mod rate_limiter;

pub use cache::ResponseCache;
pub use client::Client;
pub use fee_estimator::FeeEstimator;
pub use pool::ConnectionPool;
pub use rate_limiter::{RateLimitError, RateLimiter};

/// Errors at the network/transport boundary (spec §7 `Network` taxonomy).
///
/// The client surfaces [`NetworkError::Timeout`] and
/// [`NetworkError::ServerError`] unchanged; every other variant is absorbed
/// by [`pool::ConnectionPool`], which only ever surfaces [`PoolError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    /// The remote end refused the connection.
    #[error("connection refused by {0}")]
    ConnectionRefused(String),
    /// The remote end reset an established connection.
    #[error("connection reset by {0}")]
    ConnectionReset(String),
    /// TLS handshake or record-layer failure.
    #[error("tls error with {server}: {message}")]
    TlsError {
        /// Server identifier (host:port).
        server: String,
        /// Underlying error text.
        message: String,
    },
    /// A received frame did not parse as a well-formed JSON-RPC message.
    #[error("protocol error from {server}: {message}")]
    ProtocolError {
        /// Server identifier (host:port).
        server: String,
        /// Description of the malformed frame.
        message: String,
    },
    /// The request's deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,
    /// The server returned a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    ServerError {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The connection was closed and could not be automatically restored.
    #[error("connection to {0} lost")]
    Disconnected(String),
    /// Auto-reconnect gave up after `max_reconnect_attempts`.
    #[error("connection to {0} permanently lost after exhausting reconnect attempts")]
    ConnectionLost(String),
}

/// Errors surfaced by [`pool::ConnectionPool`] (spec §7 `Pool` taxonomy).
///
/// Every per-server [`NetworkError`] is absorbed internally (feeding
/// [`pool::ServerHealth`] and the circuit breaker); only these two variants
/// ever escape to a caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No server passed the circuit breaker / health filter.
    #[error("no servers available")]
    NoServersAvailable,
    /// A waiter's deadline elapsed before a connection was released to it.
    #[error("pool exhausted: no connection became available before the deadline")]
    PoolExhausted,
    /// Every server was attempted and every attempt failed.
    #[error("all {0} server(s) failed")]
    AllServersFailed(usize),
}
