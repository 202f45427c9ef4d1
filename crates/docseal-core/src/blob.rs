//! Content-addressed blob store.
//!
//! Template files, signature images, and generated artifacts are stored by
//! the SHA-256 of their bytes. A [`BlobRef`] therefore names exactly one
//! byte sequence forever, and writing new content never disturbs a ref that
//! is already in use.

use std::fmt;
use std::sync::Arc;

use docseal_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::BlobError;

/// Storage prefix for blob contents.
const BLOB_PREFIX: &str = "blobs/";

/// Opaque, immutable reference to stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobRef(String);

impl BlobRef {
    /// Parse a reference previously issued by [`BlobStore::put`].
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidRef`] unless the value is 64 lower-case
    /// hex digits.
    pub fn parse(value: &str) -> Result<Self, BlobError> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(value.to_owned()))
        } else {
            Err(BlobError::InvalidRef {
                blob_ref: value.to_owned(),
            })
        }
    }

    /// Reference for the given bytes.
    #[must_use]
    pub fn for_content(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn key(&self) -> String {
        format!("{BLOB_PREFIX}{}", self.0)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BlobRef {
    type Error = BlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobRef> for String {
    fn from(value: BlobRef) -> Self {
        value.0
    }
}

/// Blob store over a storage backend.
#[derive(Clone)]
pub struct BlobStore {
    storage: Arc<dyn StorageBackend>,
}

impl BlobStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Store bytes and return their reference. Storing the same bytes
    /// twice returns the same reference and writes once.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Storage`] if the backend fails.
    pub async fn put(&self, bytes: &[u8]) -> Result<BlobRef, BlobError> {
        let blob_ref = BlobRef::for_content(bytes);
        let key = blob_ref.key();
        if self.storage.exists(&key).await? {
            debug!(blob = %blob_ref, "blob already stored");
        } else {
            self.storage.put(&key, bytes).await?;
            debug!(blob = %blob_ref, size = bytes.len(), "blob stored");
        }
        Ok(blob_ref)
    }

    /// Fetch the bytes behind a reference.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if nothing is stored under the
    /// reference and [`BlobError::Storage`] if the backend fails.
    pub async fn get(&self, blob_ref: &BlobRef) -> Result<Vec<u8>, BlobError> {
        self.storage
            .get(&blob_ref.key())
            .await?
            .ok_or_else(|| BlobError::NotFound {
                blob_ref: blob_ref.to_string(),
            })
    }

    /// Whether bytes are stored under the reference.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Storage`] if the backend fails.
    pub async fn contains(&self, blob_ref: &BlobRef) -> Result<bool, BlobError> {
        Ok(self.storage.exists(&blob_ref.key()).await?)
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("storage", &self.storage.name())
            .finish()
    }
}
