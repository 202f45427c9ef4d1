//! Template and document records, and where they are kept.
//!
//! Records are JSON under `catalog/` in a [`StorageBackend`]. Template
//! versions are additionally indexed by title so version history lookups do
//! not scan every template.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docseal_storage::StorageBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::blob::BlobRef;
use crate::error::CatalogError;
use crate::placeholder::TemplateField;
use crate::scanner::ScanWarning;
use crate::schema::FieldValues;
use crate::signature_group::{SignatureGroup, SlotDefinition};

/// Storage prefix for template version records.
const TEMPLATE_PREFIX: &str = "catalog/templates/";

/// Storage prefix for the title → version index.
const TITLE_INDEX_PREFIX: &str = "catalog/template-titles/";

/// Storage prefix for document records.
const DOCUMENT_PREFIX: &str = "catalog/documents/";

/// Storage prefix for the signer → pending document index.
const SIGNER_QUEUE_PREFIX: &str = "catalog/signer-queue/";

/// One uploaded version of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVersion {
    pub id: String,
    /// Groups versions of the same template.
    pub title: String,
    /// Starts at 1 and increases per upload under the same title.
    pub version: u32,
    pub file_ref: BlobRef,
    pub file_name: String,
    pub fields: Vec<TemplateField>,
    pub signature_groups: Vec<SignatureGroup>,
    #[serde(default)]
    pub warnings: Vec<ScanWarning>,
    pub is_active: bool,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    PendingSignature,
    Approved,
    Rejected,
}

impl DocumentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingSignature => "pending_signature",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one signing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Signed,
    Rejected,
}

/// A signing slot on a submitted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSlot {
    pub id: String,
    pub label: String,
    pub required: bool,
    pub signature_fields: Vec<String>,
    pub name_field: Option<String>,
    /// The only signer who may act on the slot.
    pub assigned_to: Option<String>,
    pub status: SlotStatus,
    pub signed_by: Option<String>,
    pub signer_name: Option<String>,
    pub signature_image_ref: Option<BlobRef>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl SignatureSlot {
    /// A pending slot from its definition.
    #[must_use]
    pub fn pending(definition: SlotDefinition, assigned_to: Option<String>) -> Self {
        Self {
            id: definition.id,
            label: definition.label,
            required: definition.required,
            signature_fields: definition.signature_fields,
            name_field: definition.name_field,
            assigned_to,
            status: SlotStatus::Pending,
            signed_by: None,
            signer_name: None,
            signature_image_ref: None,
            signed_at: None,
        }
    }
}

/// A document generated from a pinned template version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub template_version_id: String,
    pub title: String,
    pub status: DocumentStatus,
    pub field_values: FieldValues,
    pub generated_file_ref: Option<BlobRef>,
    #[serde(default)]
    pub signature_slots: Vec<SignatureSlot>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl Document {
    /// Signers who still owe a signature on this document.
    #[must_use]
    pub fn awaiting_signers(&self) -> BTreeSet<&str> {
        if self.status != DocumentStatus::PendingSignature {
            return BTreeSet::new();
        }
        self.signature_slots
            .iter()
            .filter(|s| s.status == SlotStatus::Pending)
            .filter_map(|s| s.assigned_to.as_deref())
            .collect()
    }
}

/// Where template versions and documents are recorded.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync + 'static {
    /// Record a new template version.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::AlreadyExists`] if the id is taken.
    async fn insert_template_version(&self, version: &TemplateVersion) -> Result<(), CatalogError>;

    /// Overwrite an existing template version.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if the id is unknown.
    async fn update_template_version(&self, version: &TemplateVersion) -> Result<(), CatalogError>;

    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if the id is unknown.
    async fn get_template_version(&self, id: &str) -> Result<TemplateVersion, CatalogError>;

    /// All versions under a title, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if storage fails.
    async fn template_versions(&self, title: &str) -> Result<Vec<TemplateVersion>, CatalogError>;

    /// The highest version under a title.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if storage fails.
    async fn latest_template_version(
        &self,
        title: &str,
    ) -> Result<Option<TemplateVersion>, CatalogError> {
        Ok(self.template_versions(title).await?.pop())
    }

    /// # Errors
    ///
    /// Returns [`CatalogError::AlreadyExists`] if the id is taken.
    async fn insert_document(&self, document: &Document) -> Result<(), CatalogError>;

    /// Replace a document record in one write.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if the id is unknown.
    async fn update_document(&self, document: &Document) -> Result<(), CatalogError>;

    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if the id is unknown.
    async fn get_document(&self, id: &str) -> Result<Document, CatalogError>;

    /// Pending documents with an unsigned slot assigned to `signer_id`,
    /// oldest submission first.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if storage fails.
    async fn pending_documents(&self, signer_id: &str) -> Result<Vec<Document>, CatalogError>;
}

/// [`Catalog`] over a storage backend.
pub struct StorageCatalog {
    storage: Arc<dyn StorageBackend>,
}

impl StorageCatalog {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    fn title_index_prefix(title: &str) -> String {
        format!(
            "{TITLE_INDEX_PREFIX}{}/",
            hex::encode(Sha256::digest(title.as_bytes()))
        )
    }

    fn signer_queue_prefix(signer_id: &str) -> String {
        format!(
            "{SIGNER_QUEUE_PREFIX}{}/",
            hex::encode(Sha256::digest(signer_id.as_bytes()))
        )
    }

    /// Signer queue entries `document` should have.
    fn queue_keys(document: &Document) -> BTreeSet<String> {
        document
            .awaiting_signers()
            .into_iter()
            .map(|signer| format!("{}{}", Self::signer_queue_prefix(signer), document.id))
            .collect()
    }

    async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        kind: &'static str,
        id: &str,
    ) -> Result<Option<T>, CatalogError> {
        validate_id(kind, id)?;
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CatalogError::Serialization {
                reason: format!("{kind} '{id}': {e}"),
            })
    }

    async fn store<T: Serialize + Sync>(&self, key: &str, record: &T) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec(record).map_err(|e| CatalogError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(key, &bytes).await?;
        Ok(())
    }
}

/// Ids become storage key segments, so they are restricted to a safe set.
fn validate_id(kind: &'static str, id: &str) -> Result<(), CatalogError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(CatalogError::NotFound {
            kind,
            id: id.to_owned(),
        })
    }
}

#[async_trait::async_trait]
impl Catalog for StorageCatalog {
    async fn insert_template_version(&self, version: &TemplateVersion) -> Result<(), CatalogError> {
        let key = format!("{TEMPLATE_PREFIX}{}", version.id);
        validate_id("template", &version.id)?;
        if self.storage.exists(&key).await? {
            return Err(CatalogError::AlreadyExists {
                kind: "template",
                id: version.id.clone(),
            });
        }
        self.store(&key, version).await?;
        let index_key = format!("{}{}", Self::title_index_prefix(&version.title), version.id);
        self.storage.put(&index_key, &[]).await?;
        Ok(())
    }

    async fn update_template_version(&self, version: &TemplateVersion) -> Result<(), CatalogError> {
        let key = format!("{TEMPLATE_PREFIX}{}", version.id);
        let existing: Option<TemplateVersion> = self.load(&key, "template", &version.id).await?;
        if existing.is_none() {
            return Err(CatalogError::NotFound {
                kind: "template",
                id: version.id.clone(),
            });
        }
        self.store(&key, version).await
    }

    async fn get_template_version(&self, id: &str) -> Result<TemplateVersion, CatalogError> {
        self.load(&format!("{TEMPLATE_PREFIX}{id}"), "template", id)
            .await?
            .ok_or_else(|| CatalogError::NotFound {
                kind: "template",
                id: id.to_owned(),
            })
    }

    async fn template_versions(&self, title: &str) -> Result<Vec<TemplateVersion>, CatalogError> {
        let prefix = Self::title_index_prefix(title);
        let mut versions = Vec::new();
        for key in self.storage.list(&prefix).await? {
            let Some(id) = key.strip_prefix(&prefix) else {
                continue;
            };
            versions.push(self.get_template_version(id).await?);
        }
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn insert_document(&self, document: &Document) -> Result<(), CatalogError> {
        validate_id("document", &document.id)?;
        let key = format!("{DOCUMENT_PREFIX}{}", document.id);
        if self.storage.exists(&key).await? {
            return Err(CatalogError::AlreadyExists {
                kind: "document",
                id: document.id.clone(),
            });
        }
        self.store(&key, document).await?;
        for entry in Self::queue_keys(document) {
            self.storage.put(&entry, &[]).await?;
        }
        Ok(())
    }

    async fn update_document(&self, document: &Document) -> Result<(), CatalogError> {
        let key = format!("{DOCUMENT_PREFIX}{}", document.id);
        let previous: Option<Document> = self.load(&key, "document", &document.id).await?;
        let Some(previous) = previous else {
            return Err(CatalogError::NotFound {
                kind: "document",
                id: document.id.clone(),
            });
        };

        // Queue entries are added before the record changes and dropped
        // after, so a signer is never missing from a queue they belong in.
        let before = Self::queue_keys(&previous);
        let after = Self::queue_keys(document);
        for entry in after.difference(&before) {
            self.storage.put(entry, &[]).await?;
        }
        self.store(&key, document).await?;
        for entry in before.difference(&after) {
            self.storage.delete(entry).await?;
        }
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Document, CatalogError> {
        self.load(&format!("{DOCUMENT_PREFIX}{id}"), "document", id)
            .await?
            .ok_or_else(|| CatalogError::NotFound {
                kind: "document",
                id: id.to_owned(),
            })
    }

    async fn pending_documents(&self, signer_id: &str) -> Result<Vec<Document>, CatalogError> {
        let prefix = Self::signer_queue_prefix(signer_id);
        let mut documents = Vec::new();
        for key in self.storage.list(&prefix).await? {
            let Some(id) = key.strip_prefix(&prefix) else {
                continue;
            };
            let document = match self.get_document(id).await {
                Ok(document) => document,
                Err(CatalogError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if document.awaiting_signers().contains(signer_id) {
                documents.push(document);
            }
        }
        documents.sort_by(|a, b| (a.submitted_at, &a.id).cmp(&(b.submitted_at, &b.id)));
        Ok(documents)
    }
}

impl fmt::Debug for StorageCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCatalog")
            .field("storage", &self.storage.name())
            .finish()
    }
}
