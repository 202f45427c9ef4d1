//! Template upload, versioning, and lookup.
//!
//! An upload is validated, scanned on the blocking pool, stored as a blob,
//! and recorded as the next version under its title. Uploads are serialized
//! so two uploads under one title cannot claim the same version number.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::blob::BlobStore;
use crate::catalog::{Catalog, TemplateVersion};
use crate::clock::Clock;
use crate::docx::ZIP_MAGIC;
use crate::error::TemplateError;
use crate::placeholder::TemplateField;
use crate::scanner::scan;
use crate::signature_group::SignatureGroup;

/// Default upload ceiling: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const MIN_TITLE_LEN: usize = 2;
const MAX_TITLE_LEN: usize = 255;

/// A template file as received.
#[derive(Clone)]
pub struct TemplateUpload {
    pub title: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub uploaded_by: String,
}

impl std::fmt::Debug for TemplateUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateUpload")
            .field("title", &self.title)
            .field("file_name", &self.file_name)
            .field("size", &self.bytes.len())
            .field("uploaded_by", &self.uploaded_by)
            .finish()
    }
}

/// The form schema of a template version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSchema {
    pub template_version_id: String,
    pub fields: Vec<TemplateField>,
    pub signature_groups: Vec<SignatureGroup>,
}

/// Manages template versions.
pub struct TemplateService {
    blobs: BlobStore,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    max_upload_bytes: usize,
    upload_lock: Mutex<()>,
}

impl TemplateService {
    #[must_use]
    pub fn new(blobs: BlobStore, catalog: Arc<dyn Catalog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            blobs,
            catalog,
            clock,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_lock: Mutex::new(()),
        }
    }

    /// Override the upload ceiling.
    #[must_use]
    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Upload a template as the next version under its title. Earlier
    /// versions are deactivated.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::InvalidUpload`] for a bad name, title, or file.
    /// - [`TemplateError::TooLarge`] above the ceiling.
    /// - [`TemplateError::Scan`] for an unreadable package or conflicting
    ///   field definitions.
    /// - [`TemplateError::Blob`] or [`TemplateError::Catalog`] if storage fails.
    pub async fn upload(&self, upload: TemplateUpload) -> Result<TemplateVersion, TemplateError> {
        let title = self.check_upload(&upload)?;

        let bytes = upload.bytes;
        let (report, bytes) = tokio::task::spawn_blocking(move || {
            let report = scan(&bytes);
            (report, bytes)
        })
        .await
        .map_err(|e| TemplateError::Internal {
            reason: e.to_string(),
        })?;
        let report = report?;

        let file_ref = self.blobs.put(&bytes).await?;

        let _guard = self.upload_lock.lock().await;
        let previous = self.catalog.template_versions(&title).await?;
        let version = previous.last().map_or(1, |v| v.version + 1);
        let now = self.clock.now();

        let record = TemplateVersion {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            version,
            file_ref,
            file_name: upload.file_name,
            fields: report.fields,
            signature_groups: report.signature_groups,
            warnings: report.warnings,
            is_active: true,
            uploaded_by: upload.uploaded_by,
            created_at: now,
            updated_at: now,
        };

        // Older versions go inactive before the new one is recorded.
        let active: Vec<TemplateVersion> = previous.into_iter().filter(|v| v.is_active).collect();
        let mut deactivated = Vec::with_capacity(active.len());
        for older in &active {
            let mut inactive = older.clone();
            inactive.is_active = false;
            inactive.updated_at = now;
            if let Err(e) = self.catalog.update_template_version(&inactive).await {
                self.restore(&deactivated).await;
                return Err(e.into());
            }
            deactivated.push(older.clone());
        }
        if let Err(e) = self.catalog.insert_template_version(&record).await {
            self.restore(&deactivated).await;
            return Err(e.into());
        }

        if !record.warnings.is_empty() {
            warn!(
                template = %record.id,
                warnings = record.warnings.len(),
                "template has malformed placeholders"
            );
        }
        info!(
            template = %record.id,
            title = %record.title,
            version = record.version,
            fields = record.fields.len(),
            "template uploaded"
        );
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns [`TemplateError::Catalog`] if the version is unknown.
    pub async fn get(&self, id: &str) -> Result<TemplateVersion, TemplateError> {
        Ok(self.catalog.get_template_version(id).await?)
    }

    /// The stored field list and signature groups of a version.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Catalog`] if the version is unknown.
    pub async fn fields(&self, id: &str) -> Result<TemplateSchema, TemplateError> {
        let version = self.get(id).await?;
        Ok(TemplateSchema {
            template_version_id: version.id,
            fields: version.fields,
            signature_groups: version.signature_groups,
        })
    }

    /// All versions under a title, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Catalog`] if storage fails.
    pub async fn versions(&self, title: &str) -> Result<Vec<TemplateVersion>, TemplateError> {
        Ok(self.catalog.template_versions(title.trim()).await?)
    }

    /// The uploaded template bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Catalog`] if the version is unknown and
    /// [`TemplateError::Blob`] if its file is missing.
    pub async fn file(&self, id: &str) -> Result<(TemplateVersion, Vec<u8>), TemplateError> {
        let version = self.get(id).await?;
        let bytes = self.blobs.get(&version.file_ref).await?;
        Ok((version, bytes))
    }

    /// Validate everything that does not need the scanner. Returns the
    /// trimmed title.
    fn check_upload(&self, upload: &TemplateUpload) -> Result<String, TemplateError> {
        let invalid = |reason: &str| TemplateError::InvalidUpload {
            reason: reason.to_owned(),
        };

        let title = upload.title.trim();
        let title_len = title.chars().count();
        if !(MIN_TITLE_LEN..=MAX_TITLE_LEN).contains(&title_len) {
            return Err(invalid("title must be between 2 and 255 characters"));
        }
        if !upload.file_name.to_ascii_lowercase().ends_with(".docx") {
            return Err(invalid("only .docx files are accepted"));
        }
        if upload.bytes.is_empty() {
            return Err(invalid("file is empty"));
        }
        if upload.bytes.len() > self.max_upload_bytes {
            return Err(TemplateError::TooLarge {
                size: upload.bytes.len(),
                limit: self.max_upload_bytes,
            });
        }
        if !upload.bytes.starts_with(ZIP_MAGIC) {
            return Err(invalid("file is not a .docx package"));
        }
        Ok(title.to_owned())
    }

    /// Put back versions deactivated by an upload that then failed.
    async fn restore(&self, versions: &[TemplateVersion]) {
        for version in versions {
            if let Err(e) = self.catalog.update_template_version(version).await {
                error!(
                    template = %version.id,
                    error = %e,
                    "failed to reactivate template version after aborted upload"
                );
            }
        }
    }
}

impl std::fmt::Debug for TemplateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateService")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}
