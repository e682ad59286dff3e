//! Key-value store contract for the persistent local cache.
//!
//! The storage mechanism itself lives outside the core; the engine only
//! requires this read/write/quota-failure contract. A rejected write is
//! never fatal: callers degrade to in-memory state and continue.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// Error type for key-value store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying store failed.
    #[error("store error: {0}")]
    Backend(String),
}

/// Result type for key-value store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The store rejected the write for space. The value was not stored.
    QuotaExceeded,
}

/// Minimal persistent key-value interface.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<PutOutcome>;
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory [`KeyValueStore`] with an optional byte quota.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    quota_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used(entries: &HashMap<String, Vec<u8>>) -> u64 {
        entries
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<PutOutcome> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(quota) = self.quota_bytes {
            let existing = entries.get(key).map(|v| v.len() as u64).unwrap_or(0);
            let projected =
                Self::used(&entries) - existing + (key.len() + value.len()) as u64;
            if projected > quota {
                return Ok(PutOutcome::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value);
        Ok(PutOutcome::Stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(
            store.put("k", b"v".to_vec()).await.unwrap(),
            PutOutcome::Stored
        );
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_rejects_oversized_writes() {
        let store = MemoryStore::with_quota(8);
        assert_eq!(
            store.put("k", vec![0u8; 100]).await.unwrap(),
            PutOutcome::QuotaExceeded
        );
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
