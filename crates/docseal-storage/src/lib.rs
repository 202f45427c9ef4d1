//! Storage backend abstraction for `DocSeal`.
//!
//! This crate defines the [`StorageBackend`] trait — a plain key-value
//! interface that knows nothing about templates, documents, or signatures.
//! The blob store and catalog in `docseal-core` layer their own key
//! namespaces (`blobs/`, `catalog/`) on top of it.
//!
//! Two implementations are provided:
//!
//! - [`FileBackend`] — one file per key under a root directory (feature `fs-backend`)
//! - [`MemoryBackend`] — in-memory, for tests and throwaway deployments

mod error;
#[cfg(feature = "fs-backend")]
mod fs_backend;
mod memory;

pub use error::StorageError;
#[cfg(feature = "fs-backend")]
pub use fs_backend::FileBackend;
pub use memory::MemoryBackend;

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g.
/// `catalog/documents/<id>`, `blobs/<digest>`). Values are opaque byte
/// arrays.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// A concurrent reader observes either the old value or the new one,
    /// never a partial write.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
