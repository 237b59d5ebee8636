//! External key-value TTL store backing the coordination lock.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store command failed: {0}")]
    Command(String),
}

/// Atomic primitives the lock is built from. Each call must be a single
/// atomic operation on the store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Store `token` under `key` with `ttl` only if `key` is absent.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `token`.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError>;

    /// Reset the expiry of `key` to `ttl` only if it currently holds `token`.
    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
struct Held {
    token: String,
    expires_at: Instant,
}

/// Single-process store with TTL semantics (for tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    entries: Mutex<HashMap<String, Held>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token currently stored under `key`, if unexpired.
    pub fn holder(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        live_entry(&mut entries, key).map(|held| held.token.clone())
    }

    /// Replace whatever is stored under `key`, as another process would
    /// after our entry expired.
    pub fn overwrite(&self, key: &str, token: &str, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            Held {
                token: token.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

fn live_entry<'a>(entries: &'a mut HashMap<String, Held>, key: &str) -> Option<&'a mut Held> {
    let expired = entries
        .get(key)
        .is_some_and(|held| held.expires_at <= Instant::now());
    if expired {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if live_entry(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Held {
                token: token.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = live_entry(&mut entries, key).is_some_and(|held| held.token == token);
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }

    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match live_entry(&mut entries, key) {
            Some(held) if held.token == token => {
                held.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
