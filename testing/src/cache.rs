//! In-memory cache.

use marketplace_core::ports::{Cache, CacheError, PortFuture};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory [`Cache`] for tests and local development
///
/// Expired entries are dropped lazily when read.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Connection("Mutex lock failed".into()))
    }
}

impl Cache for InMemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> PortFuture<'a, Option<String>, CacheError> {
        Box::pin(async move {
            let mut entries = self.lock()?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> PortFuture<'a, (), CacheError> {
        Box::pin(async move {
            self.lock()?.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn incr<'a>(&'a self, key: &'a str, ttl: Duration) -> PortFuture<'a, u64, CacheError> {
        Box::pin(async move {
            let mut entries = self.lock()?;
            let now = Instant::now();
            let entry = entries
                .entry(key.to_string())
                .and_modify(|entry| {
                    if entry.expires_at <= now {
                        entry.value = "0".into();
                        entry.expires_at = now + ttl;
                    }
                })
                .or_insert_with(|| Entry {
                    value: "0".into(),
                    expires_at: now + ttl,
                });
            let count = entry
                .value
                .parse::<u64>()
                .map_err(|e| CacheError::Command(format!("value is not an integer: {e}")))?
                .saturating_add(1);
            entry.value = count.to_string();
            Ok(count)
        })
    }
}
