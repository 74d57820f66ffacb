//! Redis-backed [`Cache`].
//!
//! Holds idempotent responses and rate-limit counters. A connection
//! manager reconnects transparently; callers treat every failure as
//! best effort.

use marketplace_core::ports::{Cache, CacheError, PortFuture};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// `Redis` cache using a shared connection manager.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Connection`] if the URL is invalid or the
    /// server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self { conn_manager })
    }
}

fn command_error(err: &redis::RedisError) -> CacheError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Connection(err.to_string())
    } else {
        CacheError::Command(err.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl Cache for RedisCache {
    fn get<'a>(&'a self, key: &'a str) -> PortFuture<'a, Option<String>, CacheError> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.get(key).await.map_err(|e| command_error(&e))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> PortFuture<'a, (), CacheError> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .set_ex(key, value, ttl_secs(ttl))
                .await
                .map_err(|e| command_error(&e))?;
            Ok(())
        })
    }

    fn incr<'a>(&'a self, key: &'a str, ttl: Duration) -> PortFuture<'a, u64, CacheError> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let count: u64 = conn.incr(key, 1u64).await.map_err(|e| command_error(&e))?;
            if count == 1 {
                let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
                let _: () = conn.expire(key, secs).await.map_err(|e| command_error(&e))?;
            }
            tracing::trace!(key, count, "Cache counter incremented");
            Ok(count)
        })
    }
}
