//! The key/value cache boundary used by the session middleware.
//!
//! The pipeline only needs two operations from a cache: `get` and `set` with a time to
//! live. A real deployment plugs in a network cache client; [`MemoryCache`] is a
//! single-process implementation and [`TimeoutCache`] bounds how long any cache call may
//! block a request.

use crate::error::CacheError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the stored value or [`CacheError::Miss`].
    async fn get(&self, key: &str) -> Result<Bytes, CacheError>;

    /// Stores `value` under `key`; a zero `ttl` never expires.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }
}

impl fmt::Debug for dyn Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cache")
    }
}

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// An in-process cache with per-entry expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are next touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache").field("entries", &self.entries.len()).finish()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Err(CacheError::Miss),
        };

        match value {
            Some(value) => Ok(value),
            None => {
                trace!(key, "cache entry expired");
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                Err(CacheError::Miss)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = if ttl.is_zero() { None } else { Some(Instant::now() + ttl) };
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

/// Bounds every call of the wrapped cache by `timeout`.
///
/// An elapsed call is reported as [`CacheError::Unavailable`], which the session middleware
/// turns into a 500 instead of holding the request open.
#[derive(Debug)]
pub struct TimeoutCache<C> {
    inner: C,
    timeout: Duration,
}

impl<C: Cache> TimeoutCache<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Cache> Cache for TimeoutCache<C> {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        match tokio::time::timeout(self.timeout, self.inner.get(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key, timeout = ?self.timeout, "cache get timed out");
                Err(CacheError::unavailable(format!("get timed out after {:?}", self.timeout)))
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        match tokio::time::timeout(self.timeout, self.inner.set(key, value, ttl)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key, timeout = ?self.timeout, "cache set timed out");
                Err(CacheError::unavailable(format!("set timed out after {:?}", self.timeout)))
            }
        }
    }
}
