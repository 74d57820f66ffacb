//! Key/value cache port (idempotent responses, rate limiting).

use super::PortFuture;
use std::time::Duration;
use thiserror::Error;

/// Cache failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend unreachable
    #[error("cache connection error: {0}")]
    Connection(String),

    /// Command rejected by the backend
    #[error("cache command error: {0}")]
    Command(String),
}

/// Best-effort shared cache
pub trait Cache: Send + Sync {
    /// Read a value
    fn get<'a>(&'a self, key: &'a str) -> PortFuture<'a, Option<String>, CacheError>;

    /// Write a value with a time to live
    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> PortFuture<'a, (), CacheError>;

    /// Increment a counter, starting the TTL window on first increment
    fn incr<'a>(&'a self, key: &'a str, ttl: Duration) -> PortFuture<'a, u64, CacheError>;
}
