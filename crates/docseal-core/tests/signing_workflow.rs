//! End-to-end signing scenarios over in-memory storage.

#![allow(clippy::unwrap_used)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use docseal_core::audit::{AttemptOutcome, AuditManager, MemoryAuditBackend};
use docseal_core::blob::BlobStore;
use docseal_core::catalog::{Catalog, DocumentStatus, SlotStatus, StorageCatalog};
use docseal_core::clock::{Clock, FixedClock};
use docseal_core::credentials::{Signer, SigningCredentials, hash_pin_with};
use docseal_core::documents::{DocumentService, ExportFormat, NewDocument};
use docseal_core::docx::document_text;
use docseal_core::error::{DocumentError, SigningError, VerificationFailure};
use docseal_core::templates::{TemplateService, TemplateUpload};
use docseal_storage::{MemoryBackend, StorageBackend};
use serde_json::json;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const TOTP_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

fn paragraph(text: &str) -> String {
    format!(r#"<w:p><w:r><w:rPr><w:sz w:val="24"/></w:rPr><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
}

fn offer_template() -> Vec<u8> {
    let body: String = [
        "Offer for {{candidate|text|Candidate|required}}",
        "Salary: {{salary|number|Salary|required|min:1000}}",
        "Relocation: {{relocation|checkbox}}",
        "Approved by {{manager_name}} {{manager_signature|signature|Hiring manager|required}}",
        "Countersigned by {{finance_name}} {{finance_signature|signature|Finance|required}}",
    ]
    .iter()
    .map(|t| paragraph(t))
    .collect();
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{body}<w:sectPr/></w:body></w:document>"#
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("word/document.xml", document.as_str()),
    ] {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn signature_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image::RgbaImage::new(300, 100))
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

struct Harness {
    documents: DocumentService,
    audit_log: Arc<MemoryAuditBackend>,
    clock: Arc<FixedClock>,
    manager: Signer,
    finance: Signer,
    document_id: String,
}

async fn harness(finance_totp: bool) -> Harness {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let blobs = BlobStore::new(Arc::clone(&storage));
    let catalog: Arc<dyn Catalog> = Arc::new(StorageCatalog::new(storage));
    let clock = Arc::new(FixedClock::at_unix(1_750_000_000));
    let audit = Arc::new(AuditManager::new());
    let audit_log = Arc::new(MemoryAuditBackend::new());
    audit.add_backend(audit_log.clone()).await;

    let templates = TemplateService::new(
        blobs.clone(),
        Arc::clone(&catalog),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    let documents = DocumentService::new(
        blobs.clone(),
        catalog,
        audit,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let image_ref = blobs.put(&signature_png()).await.unwrap();
    let pin_hash = hash_pin_with("1357", "integration", 10).unwrap();
    let manager = Signer {
        id: "u-manager".to_owned(),
        display_name: "Maya Chen".to_owned(),
        signature_image_ref: Some(image_ref.clone()),
        pin_hash: Some(pin_hash.clone()),
        totp_secret: None,
        totp_enabled: false,
    };
    let finance = Signer {
        id: "u-finance".to_owned(),
        display_name: "Femi Okafor".to_owned(),
        signature_image_ref: Some(image_ref),
        pin_hash: Some(pin_hash),
        totp_secret: finance_totp.then(|| TOTP_SECRET.to_owned()),
        totp_enabled: finance_totp,
    };

    let template = templates
        .upload(TemplateUpload {
            title: "Offer letter".to_owned(),
            file_name: "offer.docx".to_owned(),
            bytes: offer_template(),
            uploaded_by: "u-admin".to_owned(),
        })
        .await
        .unwrap();
    let draft = documents
        .create_draft(NewDocument {
            template_version_id: template.id,
            title: "Offer: Jordan".to_owned(),
            fields: json!({
                "candidate": "Jordan",
                "salary": "5200",
                "relocation": "yes",
                "manager_signature": "u-manager",
                "finance_signature": "u-finance"
            })
            .as_object()
            .unwrap()
            .clone(),
            created_by: "u-recruiter".to_owned(),
        })
        .await
        .unwrap();
    let submitted = documents.submit(&draft.id, "u-recruiter").await.unwrap();
    assert_eq!(submitted.status, DocumentStatus::PendingSignature);

    Harness {
        documents,
        audit_log,
        clock,
        manager,
        finance,
        document_id: draft.id,
    }
}

fn pin() -> SigningCredentials {
    SigningCredentials::new("1357", None)
}

async fn image_count(h: &Harness) -> usize {
    let artifact = h
        .documents
        .export(&h.document_id, ExportFormat::Docx)
        .await
        .unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(artifact.bytes)).unwrap();
    archive
        .file_names()
        .filter(|n| n.starts_with("word/media/"))
        .count()
}

#[tokio::test]
async fn two_required_slots_approve_in_either_order() {
    for manager_first in [true, false] {
        let h = harness(false).await;
        let order = if manager_first {
            [("manager", &h.manager), ("finance", &h.finance)]
        } else {
            [("finance", &h.finance), ("manager", &h.manager)]
        };

        let first = h
            .documents
            .sign(&h.document_id, order[0].0, order[0].1, pin())
            .await
            .unwrap();
        assert_eq!(first.status, DocumentStatus::PendingSignature);
        assert_eq!(image_count(&h).await, 1);

        let done = h
            .documents
            .sign(&h.document_id, order[1].0, order[1].1, pin())
            .await
            .unwrap();
        assert_eq!(done.status, DocumentStatus::Approved);
        assert_eq!(done.approved_by.as_deref(), Some(order[1].1.id.as_str()));
        assert!(done
            .signature_slots
            .iter()
            .all(|s| s.status == SlotStatus::Signed));
        assert_eq!(image_count(&h).await, 2);

        let artifact = h
            .documents
            .export(&h.document_id, ExportFormat::Docx)
            .await
            .unwrap();
        let text = document_text(&artifact.bytes).unwrap();
        assert_eq!(
            text,
            vec![
                "Offer for Jordan",
                "Salary: 5200",
                "Relocation: Yes",
                "Approved by Maya Chen ",
                "Countersigned by Femi Okafor ",
            ]
        );
    }
}

#[tokio::test]
async fn one_signature_then_a_rejection_ends_rejected() {
    let h = harness(false).await;
    h.documents
        .sign(&h.document_id, "manager", &h.manager, pin())
        .await
        .unwrap();
    let rejected = h
        .documents
        .reject(
            &h.document_id,
            "finance",
            &h.finance,
            pin(),
            Some("salary above band".to_owned()),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, DocumentStatus::Rejected);
    assert_eq!(rejected.rejected_by.as_deref(), Some("u-finance"));

    let outcomes: Vec<_> = h
        .audit_log
        .entries()
        .await
        .into_iter()
        .map(|e| e.attempt.outcome)
        .collect();
    assert_eq!(outcomes, vec![AttemptOutcome::Signed, AttemptOutcome::Rejected]);
}

#[tokio::test]
async fn missing_totp_leaves_the_document_pending() {
    let h = harness(true).await;
    let err = h
        .documents
        .sign(&h.document_id, "finance", &h.finance, pin())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DocumentError::Signing(SigningError::SignatureVerificationFailed {
            reason: VerificationFailure::MissingTotpCode
        })
    ));

    let document = h.documents.get(&h.document_id).await.unwrap();
    assert_eq!(document.status, DocumentStatus::PendingSignature);
    assert!(document
        .signature_slots
        .iter()
        .all(|s| s.status == SlotStatus::Pending));

    let entries = h.audit_log.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt.outcome, AttemptOutcome::VerificationFailed);
    assert!(entries[0].attempt.pin_verified);
    assert!(!entries[0].attempt.totp_verified);

    h.clock.advance(chrono::Duration::seconds(45));
    let code = docseal_core::credentials::totp_code(TOTP_SECRET, h.clock.unix_seconds()).unwrap();
    let signed = h
        .documents
        .sign(
            &h.document_id,
            "finance",
            &h.finance,
            SigningCredentials::new("1357", Some(code)),
        )
        .await
        .unwrap();
    assert_eq!(signed.status, DocumentStatus::PendingSignature);
}
