//! In-memory storage backend.
//!
//! Everything lives in a `BTreeMap` behind a `RwLock` and disappears when the
//! process exits. Used by the test suites and by `DOCSEAL_STORAGE=memory`.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Clones share the same map. Keys are kept sorted, so prefix listing is a
/// range scan.
///
/// # Examples
///
/// ```
/// # use docseal_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("catalog/documents/a", b"{}").await.unwrap();
/// let val = backend.get("catalog/documents/a").await.unwrap();
/// assert_eq!(val, Some(b"{}".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the backend holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("blobs/nope").await.unwrap(), None);
        assert!(!backend.exists("blobs/nope").await.unwrap());
    }

    #[tokio::test]
    async fn put_then_overwrite() {
        let backend = MemoryBackend::new();
        backend.put("catalog/documents/d1", b"draft").await.unwrap();
        backend.put("catalog/documents/d1", b"approved").await.unwrap();
        assert_eq!(
            backend.get("catalog/documents/d1").await.unwrap(),
            Some(b"approved".to_vec())
        );
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("k", b"v").await.unwrap();
        backend.delete("k").await.unwrap();
        backend.delete("k").await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn list_returns_only_prefixed_keys_sorted() {
        let backend = MemoryBackend::new();
        backend.put("catalog/templates/b", b"2").await.unwrap();
        backend.put("catalog/templates/a", b"1").await.unwrap();
        backend.put("catalog/documents/x", b"3").await.unwrap();
        backend.put("blobs/ff", b"4").await.unwrap();

        let keys = backend.list("catalog/templates/").await.unwrap();
        assert_eq!(keys, vec!["catalog/templates/a", "catalog/templates/b"]);
        assert_eq!(backend.list("").await.unwrap().len(), 4);
        assert!(backend.list("sys/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.put("k", b"v").await.unwrap();
        assert_eq!(clone.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
