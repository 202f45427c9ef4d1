//! Document drafting, submission, signing, and export.
//!
//! Each mutation of a document runs under that document's own async mutex,
//! so concurrent signers of one document are serialized while different
//! documents proceed in parallel. State rules live in [`crate::signing`];
//! this module supplies the I/O around them: fetching templates and images,
//! regenerating artifacts on the blocking pool, auditing, and persisting.
//!
//! A signed or rejected transition is written to the catalog only after the
//! new artifact is stored and the attempt is audited. If any of that fails
//! the stored document is unchanged.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::{AttemptOutcome, AuditEntry, AuditManager, SigningAttempt};
use crate::blob::{BlobRef, BlobStore};
use crate::catalog::{Catalog, Document, DocumentStatus, TemplateVersion};
use crate::clock::Clock;
use crate::credentials::{Signer, SigningCredentials, Verification, verify_signer};
use crate::error::{DocumentError, GenerationError};
use crate::generator::{SignatureImages, generate};
use crate::pdf;
use crate::schema::{FieldValues, validate_with_exemptions};
use crate::signature_group::signer_name_fields;
use crate::signing::{self, ACTION_REJECT, ACTION_SIGN, ACTION_SUBMIT, ACTION_UPDATE};

/// Media type of generated `.docx` artifacts.
pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Media type of PDF exports.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Download format of a document artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Docx,
    Pdf,
}

/// A downloadable rendering of a document.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Input for [`DocumentService::create_draft`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub template_version_id: String,
    pub title: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub created_by: String,
}

/// Owns the document lifecycle.
pub struct DocumentService {
    blobs: BlobStore,
    catalog: Arc<dyn Catalog>,
    audit: Arc<AuditManager>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl DocumentService {
    #[must_use]
    pub fn new(
        blobs: BlobStore,
        catalog: Arc<dyn Catalog>,
        audit: Arc<AuditManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blobs,
            catalog,
            audit,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a draft from a template version. Any version may be pinned,
    /// including an inactive one.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Catalog`] if the template version is unknown.
    /// - [`DocumentError::Validation`] listing every bad field.
    /// - [`DocumentError::Generation`] or [`DocumentError::Blob`] if the
    ///   artifact cannot be produced or stored.
    pub async fn create_draft(&self, request: NewDocument) -> Result<Document, DocumentError> {
        let template = self
            .catalog
            .get_template_version(&request.template_version_id)
            .await?;
        if !template.is_active {
            info!(
                template = %template.id,
                version = template.version,
                "draft pinned to an inactive template version"
            );
        }

        let values = validate_values(&template, &request.fields)?;
        let generated = self
            .render(&template, &values, SignatureImages::new())
            .await?;

        let now = self.clock.now();
        let title = match request.title.trim() {
            "" => template.title.clone(),
            title => title.to_owned(),
        };
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            template_version_id: template.id.clone(),
            title,
            status: DocumentStatus::Draft,
            field_values: values,
            generated_file_ref: Some(generated),
            signature_slots: Vec::new(),
            created_by: request.created_by,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
        };
        self.catalog.insert_document(&document).await?;
        info!(document = %document.id, template = %template.id, "draft created");
        Ok(document)
    }

    /// Replace a draft's field values and regenerate it. Only the creator
    /// may edit.
    ///
    /// # Errors
    ///
    /// [`DocumentError::Signing`] if `editor` is not the creator or the
    /// document is not a draft, plus the errors of [`Self::create_draft`].
    pub async fn update_draft(
        &self,
        id: &str,
        editor: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Document, DocumentError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut document = self.catalog.get_document(id).await?;
        signing::require_creator(&document, editor, ACTION_UPDATE)?;
        signing::require_status(&document, DocumentStatus::Draft, ACTION_UPDATE)?;
        let template = self
            .catalog
            .get_template_version(&document.template_version_id)
            .await?;

        let values = validate_values(&template, fields)?;
        let generated = self
            .render(&template, &values, SignatureImages::new())
            .await?;

        document.field_values = values;
        document.generated_file_ref = Some(generated);
        document.updated_at = self.clock.now();
        self.catalog.update_document(&document).await?;
        info!(document = %document.id, "draft updated");
        Ok(document)
    }

    /// Submit a draft for signing.
    ///
    /// # Errors
    ///
    /// [`DocumentError::Signing`] unless the submitter created the draft and
    /// every required slot has a signer, and [`DocumentError::Validation`] if
    /// its values no longer validate.
    pub async fn submit(&self, id: &str, submitter: &str) -> Result<Document, DocumentError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut document = self.catalog.get_document(id).await?;
        signing::require_creator(&document, submitter, ACTION_SUBMIT)?;
        signing::require_status(&document, DocumentStatus::Draft, ACTION_SUBMIT)?;
        let template = self
            .catalog
            .get_template_version(&document.template_version_id)
            .await?;
        document.field_values = validate_values(&template, &document.field_values.to_json())?;

        signing::submit(&mut document, &template, submitter, self.clock.now())?;
        self.catalog.update_document(&document).await?;
        info!(
            document = %document.id,
            status = %document.status,
            slots = document.signature_slots.len(),
            "document submitted"
        );
        Ok(document)
    }

    /// Sign one slot of a pending document.
    ///
    /// Every credential check is audited. On success the slot's images and
    /// the signer's name are stamped into a regenerated artifact.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Signing`] for a refused transition or failed
    ///   verification. Verification failures are retryable.
    /// - [`DocumentError::Audit`] if the attempt could not be audited; the
    ///   signature is then not applied.
    /// - [`DocumentError::Generation`], [`DocumentError::Blob`], or
    ///   [`DocumentError::Catalog`] if the new state cannot be stored.
    pub async fn sign(
        &self,
        id: &str,
        slot_id: &str,
        signer: &Signer,
        credentials: SigningCredentials,
    ) -> Result<Document, DocumentError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let document = self.catalog.get_document(id).await?;
        signing::check_slot(&document, slot_id, &signer.id, ACTION_SIGN)?;
        let verification = self
            .verify(&document, slot_id, signer, &credentials)
            .await?;

        let now = self.clock.now();
        let mut updated = document.clone();
        signing::apply_signature(&mut updated, slot_id, signer, now)?;

        let template = self
            .catalog
            .get_template_version(&updated.template_version_id)
            .await?;
        let images = self.signature_images(&updated).await?;
        updated.generated_file_ref = Some(self.render(&template, &updated.field_values, images).await?);

        let entry = attempt(&updated, slot_id, signer, &verification, AttemptOutcome::Signed, None, now);
        self.audit.record(&entry).await?;
        self.catalog.update_document(&updated).await?;

        info!(
            document = %updated.id,
            slot = slot_id,
            signer = %signer.id,
            status = %updated.status,
            "signature applied"
        );
        Ok(updated)
    }

    /// Reject a pending document through one of its required slots.
    ///
    /// # Errors
    ///
    /// As [`Self::sign`]. Optional slots cannot reject.
    pub async fn reject(
        &self,
        id: &str,
        slot_id: &str,
        signer: &Signer,
        credentials: SigningCredentials,
        reason: Option<String>,
    ) -> Result<Document, DocumentError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let document = self.catalog.get_document(id).await?;
        signing::check_slot(&document, slot_id, &signer.id, ACTION_REJECT)?;
        let verification = self
            .verify(&document, slot_id, signer, &credentials)
            .await?;

        let now = self.clock.now();
        let reason = reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty());
        let mut updated = document.clone();
        signing::apply_rejection(&mut updated, slot_id, signer, reason.clone(), now)?;

        let entry = attempt(
            &updated,
            slot_id,
            signer,
            &verification,
            AttemptOutcome::Rejected,
            reason,
            now,
        );
        self.audit.record(&entry).await?;
        self.catalog.update_document(&updated).await?;

        info!(document = %updated.id, slot = slot_id, signer = %signer.id, "document rejected");
        Ok(updated)
    }

    /// Documents waiting on a signature from `signer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Catalog`] if storage fails.
    pub async fn pending_for(&self, signer_id: &str) -> Result<Vec<Document>, DocumentError> {
        Ok(self.catalog.pending_documents(signer_id).await?)
    }

    /// # Errors
    ///
    /// Returns [`DocumentError::Catalog`] if the document is unknown.
    pub async fn get(&self, id: &str) -> Result<Document, DocumentError> {
        Ok(self.catalog.get_document(id).await?)
    }

    /// The current artifact, as `.docx` or rendered to PDF.
    ///
    /// # Errors
    ///
    /// [`DocumentError::Catalog`] if the document is unknown,
    /// [`DocumentError::Blob`] if its artifact is missing, and
    /// [`DocumentError::Generation`] if PDF rendering fails.
    pub async fn export(&self, id: &str, format: ExportFormat) -> Result<Artifact, DocumentError> {
        let document = self.catalog.get_document(id).await?;
        let docx = match &document.generated_file_ref {
            Some(blob_ref) => self.blobs.get(blob_ref).await?,
            None => {
                let template = self
                    .catalog
                    .get_template_version(&document.template_version_id)
                    .await?;
                let images = self.signature_images(&document).await?;
                let blob_ref = self.render(&template, &document.field_values, images).await?;
                self.blobs.get(&blob_ref).await?
            }
        };

        let stem = file_stem(&document.title);
        match format {
            ExportFormat::Docx => Ok(Artifact {
                file_name: format!("{stem}.docx"),
                content_type: DOCX_CONTENT_TYPE,
                bytes: docx,
            }),
            ExportFormat::Pdf => {
                let bytes = tokio::task::spawn_blocking(move || pdf::render(&docx))
                    .await
                    .map_err(|e| GenerationError::Internal {
                        reason: e.to_string(),
                    })??;
                Ok(Artifact {
                    file_name: format!("{stem}.pdf"),
                    content_type: PDF_CONTENT_TYPE,
                    bytes,
                })
            }
        }
    }

    /// The mutex for one document. The map only holds weak handles, and
    /// entries nobody holds any more are swept when a new one is added.
    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(id.to_owned(), Arc::downgrade(&lock));
        lock
    }

    /// Check credentials, auditing a failure before returning it.
    async fn verify(
        &self,
        document: &Document,
        slot_id: &str,
        signer: &Signer,
        credentials: &SigningCredentials,
    ) -> Result<Verification, DocumentError> {
        let verification = verify_signer(signer, credentials, self.clock.unix_seconds());
        if let Some(reason) = verification.failure {
            warn!(
                document = %document.id,
                slot = slot_id,
                signer = %signer.id,
                reason = %reason,
                "signature verification failed"
            );
            let entry = attempt(
                document,
                slot_id,
                signer,
                &verification,
                AttemptOutcome::VerificationFailed,
                Some(reason.to_string()),
                self.clock.now(),
            );
            self.audit.record_best_effort(&entry).await;
        }
        signing::require_verified(&verification)?;
        Ok(verification)
    }

    /// Image bytes for every signature field of every signed slot.
    async fn signature_images(&self, document: &Document) -> Result<SignatureImages, DocumentError> {
        let mut fetched: BTreeMap<BlobRef, Vec<u8>> = BTreeMap::new();
        let mut images = SignatureImages::new();
        for (field, blob_ref) in signing::signed_images(document) {
            if !fetched.contains_key(&blob_ref) {
                let bytes = self.blobs.get(&blob_ref).await?;
                fetched.insert(blob_ref.clone(), bytes);
            }
            if let Some(bytes) = fetched.get(&blob_ref) {
                images.insert(field, bytes.clone());
            }
        }
        Ok(images)
    }

    /// Generate an artifact on the blocking pool and store it.
    async fn render(
        &self,
        template: &TemplateVersion,
        values: &FieldValues,
        images: SignatureImages,
    ) -> Result<BlobRef, DocumentError> {
        let source = self.blobs.get(&template.file_ref).await?;
        let fields = template.fields.clone();
        let values = values.clone();
        let bytes = tokio::task::spawn_blocking(move || generate(&source, &fields, &values, &images))
            .await
            .map_err(|e| GenerationError::Internal {
                reason: e.to_string(),
            })??;
        Ok(self.blobs.put(&bytes).await?)
    }
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService").finish_non_exhaustive()
    }
}

/// Validate author-supplied values. Signer name fields are filled at signing
/// time, so they are not required here.
fn validate_values(
    template: &TemplateVersion,
    raw: &serde_json::Map<String, serde_json::Value>,
) -> Result<FieldValues, DocumentError> {
    let exempt = signer_name_fields(&template.signature_groups);
    Ok(validate_with_exemptions(&template.fields, raw, &exempt)?)
}

fn attempt(
    document: &Document,
    slot_id: &str,
    signer: &Signer,
    verification: &Verification,
    outcome: AttemptOutcome,
    reason: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> AuditEntry {
    AuditEntry::new(SigningAttempt {
        document_id: document.id.clone(),
        field_name: slot_id.to_owned(),
        signer_id: signer.id.clone(),
        pin_verified: verification.pin_verified,
        totp_verified: verification.totp_verified,
        timestamp,
        outcome,
        reason,
    })
}

/// A download file name from a document title.
fn file_stem(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "document".to_owned()
    } else {
        stem
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use docseal_storage::{MemoryBackend, StorageBackend};
    use serde_json::json;

    use super::*;
    use crate::audit::{AuditBackend, MemoryAuditBackend};
    use crate::catalog::{SlotStatus, StorageCatalog};
    use crate::clock::FixedClock;
    use crate::credentials::{hash_pin_with, totp_code};
    use crate::docx::{document_text, test_package};
    use crate::error::{AuditError, SigningError, VerificationFailure};
    use crate::templates::{TemplateService, TemplateUpload};

    const TOTP_SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";
    const NOW: i64 = 1_700_000_000;

    const BODY: &str = "<w:p><w:r><w:t>Leave for {{employee|text|Employee|required}}, {{days|number|Days|min:1}} days</w:t></w:r></w:p>\
        <w:p><w:r><w:t>Manager: {{manager_name}} {{manager_signature|signature|Manager|required}}</w:t></w:r></w:p>\
        <w:p><w:r><w:t>HR: {{hr_name}} {{hr_signature|signature|HR|required}}</w:t></w:r></w:p>\
        <w:p><w:r><w:t>Witness: {{witness_signature|signature|Witness}}</w:t></w:r></w:p>";

    struct Broken;

    #[async_trait::async_trait]
    impl AuditBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn log(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::BackendFailure {
                name: "broken".to_owned(),
                reason: "read-only filesystem".to_owned(),
            })
        }
    }

    struct Fixture {
        templates: TemplateService,
        documents: DocumentService,
        audit_log: Arc<MemoryAuditBackend>,
        audit: Arc<AuditManager>,
        blobs: BlobStore,
    }

    async fn fixture() -> Fixture {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let blobs = BlobStore::new(Arc::clone(&storage));
        let catalog: Arc<dyn Catalog> = Arc::new(StorageCatalog::new(storage));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_unix(NOW));
        let audit = Arc::new(AuditManager::new());
        let audit_log = Arc::new(MemoryAuditBackend::new());
        audit.add_backend(audit_log.clone()).await;
        Fixture {
            templates: TemplateService::new(blobs.clone(), Arc::clone(&catalog), Arc::clone(&clock)),
            documents: DocumentService::new(blobs.clone(), catalog, Arc::clone(&audit), clock),
            audit_log,
            audit,
            blobs,
        }
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::new(40, 20))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn signer(fx: &Fixture, id: &str, totp: bool) -> Signer {
        Signer {
            id: id.to_owned(),
            display_name: format!("{id} Person"),
            signature_image_ref: Some(fx.blobs.put(&png()).await.unwrap()),
            pin_hash: Some(hash_pin_with("2468", "testsalt", 1).unwrap()),
            totp_secret: totp.then(|| TOTP_SECRET.to_owned()),
            totp_enabled: totp,
        }
    }

    /// Required slots go to `mgr-1` and `hr-1` unless `fields` says otherwise.
    async fn submitted(fx: &Fixture, fields: serde_json::Value) -> Document {
        let mut values = json!({"manager_signature": "mgr-1", "hr_signature": "hr-1"})
            .as_object()
            .unwrap()
            .clone();
        values.extend(fields.as_object().unwrap().clone());
        let template = fx
            .templates
            .upload(TemplateUpload {
                title: "Leave request".to_owned(),
                file_name: "leave.docx".to_owned(),
                bytes: test_package(BODY),
                uploaded_by: "admin".to_owned(),
            })
            .await
            .unwrap();
        let draft = fx
            .documents
            .create_draft(NewDocument {
                template_version_id: template.id,
                title: "Leave: Ana".to_owned(),
                fields: values,
                created_by: "author".to_owned(),
            })
            .await
            .unwrap();
        fx.documents.submit(&draft.id, "author").await.unwrap()
    }

    fn pin() -> SigningCredentials {
        SigningCredentials::new("2468", None)
    }

    #[tokio::test]
    async fn signatures_in_any_order_approve_and_stamp_names() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana", "days": 3})).await;
        assert_eq!(doc.status, DocumentStatus::PendingSignature);

        let hr = signer(&fx, "hr-1", false).await;
        let manager = signer(&fx, "mgr-1", false).await;
        let doc = fx.documents.sign(&doc.id, "hr", &hr, pin()).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::PendingSignature);
        let doc = fx.documents.sign(&doc.id, "manager", &manager, pin()).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
        assert_eq!(doc.approved_by.as_deref(), Some("mgr-1"));

        let artifact = fx.documents.export(&doc.id, ExportFormat::Docx).await.unwrap();
        assert_eq!(artifact.file_name, "Leave_ Ana.docx");
        let text = document_text(&artifact.bytes).unwrap();
        assert_eq!(text[0], "Leave for Ana, 3 days");
        assert!(text[1].contains("mgr-1 Person"));
        assert!(text[2].contains("hr-1 Person"));

        let entries = fx.audit_log.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.attempt.outcome == AttemptOutcome::Signed));
        assert!(entries.iter().all(|e| e.attempt.pin_verified));
    }

    #[tokio::test]
    async fn wrong_pin_is_audited_and_changes_nothing() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana"})).await;
        let hr = signer(&fx, "hr-1", false).await;

        let err = fx
            .documents
            .sign(&doc.id, "hr", &hr, SigningCredentials::new("0000", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::SignatureVerificationFailed {
                reason: VerificationFailure::IncorrectPin
            })
        ));
        assert_eq!(fx.documents.get(&doc.id).await.unwrap(), doc);

        let entries = fx.audit_log.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempt.outcome, AttemptOutcome::VerificationFailed);
        assert!(!entries[0].attempt.pin_verified);
    }

    #[tokio::test]
    async fn totp_is_required_when_enabled() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana"})).await;
        let hr = signer(&fx, "hr-1", true).await;

        let err = fx.documents.sign(&doc.id, "hr", &hr, pin()).await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::SignatureVerificationFailed {
                reason: VerificationFailure::MissingTotpCode
            })
        ));

        let code = totp_code(TOTP_SECRET, u64::try_from(NOW).unwrap()).unwrap();
        let doc = fx
            .documents
            .sign(&doc.id, "hr", &hr, SigningCredentials::new("2468", Some(code)))
            .await
            .unwrap();
        let slot = doc.signature_slots.iter().find(|s| s.id == "hr").unwrap();
        assert_eq!(slot.status, SlotStatus::Signed);
        let entries = fx.audit_log.entries().await;
        assert!(entries.last().unwrap().attempt.totp_verified);
    }

    #[tokio::test]
    async fn rejection_records_the_reason() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana"})).await;
        let manager = signer(&fx, "mgr-1", false).await;
        let hr = signer(&fx, "hr-1", false).await;

        fx.documents.sign(&doc.id, "manager", &manager, pin()).await.unwrap();
        let doc = fx
            .documents
            .reject(&doc.id, "hr", &hr, pin(), Some("  overlaps audit week ".to_owned()))
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Rejected);
        assert_eq!(doc.rejection_reason.as_deref(), Some("overlaps audit week"));

        let err = fx
            .documents
            .sign(&doc.id, "witness_signature", &hr, pin())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn unaudited_signatures_are_not_applied() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana"})).await;
        let hr = signer(&fx, "hr-1", false).await;

        let strict = AuditManager::new();
        strict.add_backend(Arc::new(Broken)).await;
        let documents = DocumentService::new(
            fx.blobs.clone(),
            Arc::clone(&fx.documents.catalog),
            Arc::new(strict),
            Arc::new(FixedClock::at_unix(NOW)),
        );

        let err = documents.sign(&doc.id, "hr", &hr, pin()).await.unwrap_err();
        assert!(matches!(err, DocumentError::Audit(AuditError::AllBackendsFailed)));
        assert_eq!(documents.get(&doc.id).await.unwrap(), doc);
        assert!(fx.audit.has_backends().await);
    }

    #[tokio::test]
    async fn assigned_slots_refuse_other_signers() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana", "hr_signature": "hr-1"})).await;
        let intruder = signer(&fx, "mgr-1", false).await;

        let err = fx.documents.sign(&doc.id, "hr", &intruder, pin()).await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::NotAssigned { .. })
        ));
        assert!(fx.audit_log.entries().await.is_empty());
    }

    #[tokio::test]
    async fn drafts_validate_and_lock_after_submit() {
        let fx = fixture().await;
        let template = fx
            .templates
            .upload(TemplateUpload {
                title: "Leave request".to_owned(),
                file_name: "leave.docx".to_owned(),
                bytes: test_package(BODY),
                uploaded_by: "admin".to_owned(),
            })
            .await
            .unwrap();

        let err = fx
            .documents
            .create_draft(NewDocument {
                template_version_id: template.id.clone(),
                title: String::new(),
                fields: json!({"days": 0}).as_object().unwrap().clone(),
                created_by: "author".to_owned(),
            })
            .await
            .unwrap_err();
        let DocumentError::Validation(failed) = err else {
            unreachable!("expected a validation failure");
        };
        let names: Vec<_> = failed.failures.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["employee", "days"]);

        let draft = fx
            .documents
            .create_draft(NewDocument {
                template_version_id: template.id,
                title: String::new(),
                fields: json!({"employee": "Ana"}).as_object().unwrap().clone(),
                created_by: "author".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(draft.title, "Leave request");

        let err = fx.documents.submit(&draft.id, "author").await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::UnassignedSlot { .. })
        ));

        let assigned = json!({"employee": "Bo", "manager_signature": "mgr-1", "hr_signature": "hr-1"});
        let updated = fx
            .documents
            .update_draft(&draft.id, "author", assigned.as_object().unwrap())
            .await
            .unwrap();
        assert_ne!(updated.generated_file_ref, draft.generated_file_ref);

        fx.documents.submit(&draft.id, "author").await.unwrap();
        let err = fx
            .documents
            .update_draft(&draft.id, "author", json!({"employee": "Cy"}).as_object().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn only_the_creator_edits_and_submits() {
        let fx = fixture().await;
        let template = fx
            .templates
            .upload(TemplateUpload {
                title: "Leave request".to_owned(),
                file_name: "leave.docx".to_owned(),
                bytes: test_package(BODY),
                uploaded_by: "admin".to_owned(),
            })
            .await
            .unwrap();
        let fields = json!({"employee": "Ana", "manager_signature": "mgr-1", "hr_signature": "hr-1"});
        let draft = fx
            .documents
            .create_draft(NewDocument {
                template_version_id: template.id,
                title: String::new(),
                fields: fields.as_object().unwrap().clone(),
                created_by: "author".to_owned(),
            })
            .await
            .unwrap();

        let err = fx
            .documents
            .update_draft(&draft.id, "mgr-1", json!({"employee": "Eve"}).as_object().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::NotCreator { .. })
        ));
        let err = fx.documents.submit(&draft.id, "mgr-1").await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Signing(SigningError::NotCreator { .. })
        ));
        assert_eq!(fx.documents.get(&draft.id).await.unwrap(), draft);
    }

    #[tokio::test]
    async fn pending_lists_follow_each_signer() {
        let fx = fixture().await;
        let first = submitted(&fx, json!({"employee": "Ana"})).await;
        let second = submitted(&fx, json!({"employee": "Bo", "hr_signature": "hr-2"})).await;

        let ids = |docs: Vec<Document>| docs.into_iter().map(|d| d.id).collect::<Vec<_>>();
        let manager_queue = ids(fx.documents.pending_for("mgr-1").await.unwrap());
        assert_eq!(manager_queue.len(), 2);
        assert!(manager_queue.contains(&first.id) && manager_queue.contains(&second.id));
        assert_eq!(ids(fx.documents.pending_for("hr-1").await.unwrap()), vec![first.id.clone()]);
        assert_eq!(ids(fx.documents.pending_for("hr-2").await.unwrap()), vec![second.id.clone()]);
        assert!(fx.documents.pending_for("author").await.unwrap().is_empty());

        let manager = signer(&fx, "mgr-1", false).await;
        fx.documents.sign(&first.id, "manager", &manager, pin()).await.unwrap();
        assert_eq!(ids(fx.documents.pending_for("mgr-1").await.unwrap()), vec![second.id.clone()]);

        let hr = signer(&fx, "hr-1", false).await;
        fx.documents.reject(&first.id, "hr", &hr, pin(), None).await.unwrap();
        assert!(fx.documents.pending_for("hr-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_signers_of_one_document_both_land() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana"})).await;
        let manager = signer(&fx, "mgr-1", false).await;
        let hr = signer(&fx, "hr-1", false).await;

        let (by_manager, by_hr) = tokio::join!(
            fx.documents.sign(&doc.id, "manager", &manager, pin()),
            fx.documents.sign(&doc.id, "hr", &hr, pin()),
        );
        by_manager.unwrap();
        by_hr.unwrap();

        let doc = fx.documents.get(&doc.id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
        let required: Vec<_> = doc.signature_slots.iter().filter(|s| s.required).collect();
        assert!(required.iter().all(|s| s.status == SlotStatus::Signed));

        let artifact = fx.documents.export(&doc.id, ExportFormat::Docx).await.unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(artifact.bytes.clone())).unwrap();
        let media: Vec<_> = archive
            .file_names()
            .filter(|n| n.starts_with("word/media/"))
            .collect();
        assert_eq!(media.len(), 2);
        let text = document_text(&artifact.bytes).unwrap();
        assert!(text[1].contains("mgr-1 Person"));
        assert!(text[2].contains("hr-1 Person"));
    }

    #[tokio::test]
    async fn document_locks_do_not_accumulate() {
        let fx = fixture().await;
        for employee in ["Ana", "Bo", "Cy"] {
            submitted(&fx, json!({"employee": employee})).await;
        }
        let locks = fx.documents.locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.values().all(|lock| lock.strong_count() == 0));
    }

    #[tokio::test]
    async fn pdf_export_renders_the_current_artifact() {
        let fx = fixture().await;
        let doc = submitted(&fx, json!({"employee": "Ana"})).await;
        let artifact = fx.documents.export(&doc.id, ExportFormat::Pdf).await.unwrap();
        assert_eq!(artifact.content_type, PDF_CONTENT_TYPE);
        assert!(artifact.bytes.starts_with(b"%PDF-1.5"));
    }

    #[test]
    fn file_stems_are_safe() {
        assert_eq!(file_stem("Offer / Ana"), "Offer _ Ana");
        assert_eq!(file_stem("  "), "document");
    }
}
