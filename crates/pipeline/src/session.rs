//! Per-request session state.
//!
//! A [`Session`] is a string map keyed by an opaque random id. It is restored from and
//! written back to a [`Cache`](crate::cache::Cache) by the session middleware; writes only
//! happen when the map was modified during the request.

use crate::error::SessionError;
use crate::random;
use std::collections::HashMap;

/// Number of random bytes behind a session id.
pub const SESSION_ID_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    id: String,
    data: HashMap<String, String>,
    dirty: bool,
}

impl Session {
    /// Creates an empty session with a freshly generated id.
    pub fn generate() -> Result<Self, SessionError> {
        let id = random::base64_string(SESSION_ID_LEN)?;
        Ok(Self::with_id(id))
    }

    /// Creates an empty session for a client presented id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into(), data: HashMap::new(), dirty: false }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
        self.dirty = true;
    }

    /// Removes `key`; only an actual removal marks the session dirty.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes the map to the blob stored in the cache.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, SessionError> {
        Ok(serde_json::to_vec(&self.data)?)
    }

    /// Replaces the map with a stored blob; an empty blob means an empty session.
    pub(crate) fn decode(&mut self, blob: &[u8]) -> Result<(), SessionError> {
        if blob.is_empty() {
            self.data.clear();
        } else {
            self.data = serde_json::from_slice(blob)?;
        }
        self.dirty = false;
        Ok(())
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
