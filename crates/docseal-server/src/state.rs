//! Shared application state for the `DocSeal` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use docseal_core::audit::AuditManager;
use docseal_core::blob::BlobStore;
use docseal_core::catalog::{Catalog, StorageCatalog};
use docseal_core::clock::Clock;
use docseal_core::credentials::IdentityProvider;
use docseal_core::documents::DocumentService;
use docseal_core::templates::TemplateService;
use docseal_storage::StorageBackend;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Template upload and lookup.
    pub templates: Arc<TemplateService>,
    /// Document lifecycle.
    pub documents: Arc<DocumentService>,
    /// Resolves `X-User-Id` to a signer.
    pub identities: Arc<dyn IdentityProvider>,
    /// Audit log manager.
    pub audit_manager: Arc<AuditManager>,
    /// Name of the storage backend, for health reporting.
    pub storage_name: &'static str,
}

impl AppState {
    /// Wire the services over one storage backend.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        identities: Arc<dyn IdentityProvider>,
        audit_manager: Arc<AuditManager>,
        clock: Arc<dyn Clock>,
        max_upload_bytes: usize,
    ) -> Self {
        let storage_name = storage.name();
        let blobs = BlobStore::new(Arc::clone(&storage));
        let catalog: Arc<dyn Catalog> = Arc::new(StorageCatalog::new(storage));
        let templates = TemplateService::new(blobs.clone(), Arc::clone(&catalog), Arc::clone(&clock))
            .with_max_upload_bytes(max_upload_bytes);
        let documents = DocumentService::new(blobs, catalog, Arc::clone(&audit_manager), clock);
        Self {
            templates: Arc::new(templates),
            documents: Arc::new(documents),
            identities,
            audit_manager,
            storage_name,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage", &self.storage_name)
            .finish_non_exhaustive()
    }
}
