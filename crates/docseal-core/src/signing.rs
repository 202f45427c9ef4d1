//! The signing state machine.
//!
//! ```text
//! draft ──submit──▶ pending_signature ──last required slot signed──▶ approved
//!   │                      │
//!   └─(no required slots)──┼──────────────────────────────────────▶ approved
//!                          └──any required slot rejected─────────▶ rejected
//! ```
//!
//! Everything here is a pure transformation of a [`Document`] record. The
//! documents service supplies the resolved signer, verifies credentials,
//! regenerates the artifact, and persists the result; none of that happens
//! here. A function that returns an error leaves the document untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::blob::BlobRef;
use crate::catalog::{Document, DocumentStatus, SignatureSlot, SlotStatus, TemplateVersion};
use crate::credentials::{Signer, Verification};
use crate::error::SigningError;
use crate::schema::FieldValue;
use crate::signature_group::signing_slots;

/// Actions named in transition errors.
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_SUBMIT: &str = "submit";
pub const ACTION_SIGN: &str = "sign";
pub const ACTION_REJECT: &str = "reject";

/// Fail unless the document is in `expected`.
///
/// # Errors
///
/// Returns [`SigningError::InvalidStateTransition`].
pub fn require_status(
    document: &Document,
    expected: DocumentStatus,
    action: &str,
) -> Result<(), SigningError> {
    if document.status == expected {
        Ok(())
    } else {
        Err(SigningError::InvalidStateTransition {
            status: document.status.to_string(),
            action: action.to_owned(),
        })
    }
}

/// Fail unless `user` created the document.
///
/// # Errors
///
/// Returns [`SigningError::NotCreator`].
pub fn require_creator(document: &Document, user: &str, action: &str) -> Result<(), SigningError> {
    if document.created_by == user {
        Ok(())
    } else {
        Err(SigningError::NotCreator {
            action: action.to_owned(),
            user: user.to_owned(),
        })
    }
}

/// Move a draft into signing. Field values must already be validated.
///
/// Each slot is assigned to the signer named in any of its signature
/// fields, and every required slot must have one. With no required slots
/// the document is approved on the spot, by the submitter.
///
/// # Errors
///
/// Returns [`SigningError::NotCreator`] unless the submitter created the
/// document, [`SigningError::InvalidStateTransition`] unless it is a draft,
/// and [`SigningError::UnassignedSlot`] for a required slot with no signer.
pub fn submit(
    document: &mut Document,
    template: &TemplateVersion,
    submitter: &str,
    now: DateTime<Utc>,
) -> Result<(), SigningError> {
    require_creator(document, submitter, ACTION_SUBMIT)?;
    require_status(document, DocumentStatus::Draft, ACTION_SUBMIT)?;

    let slots: Vec<SignatureSlot> = signing_slots(&template.fields, &template.signature_groups)
        .into_iter()
        .map(|definition| {
            let assigned = definition
                .signature_fields
                .iter()
                .find_map(|f| document.field_values.assigned_signer(f))
                .map(str::to_owned);
            SignatureSlot::pending(definition, assigned)
        })
        .collect();
    if let Some(slot) = slots.iter().find(|s| s.required && s.assigned_to.is_none()) {
        return Err(SigningError::UnassignedSlot {
            slot: slot.id.clone(),
        });
    }

    document.signature_slots = slots;
    document.submitted_at = Some(now);
    document.updated_at = now;
    if document.signature_slots.iter().any(|s| s.required) {
        document.status = DocumentStatus::PendingSignature;
    } else {
        approve(document, submitter, now);
    }
    Ok(())
}

/// Checks that do not involve credentials: status, slot, and assignment.
///
/// # Errors
///
/// Returns [`SigningError::InvalidStateTransition`] unless the document is
/// pending, [`SigningError::UnknownSlot`], [`SigningError::SlotAlreadySigned`]
/// for a slot that is no longer pending, [`SigningError::NotAssigned`]
/// unless the slot is assigned to this signer, and (for rejections)
/// [`SigningError::SlotNotRequired`].
pub fn check_slot<'a>(
    document: &'a Document,
    slot_id: &str,
    signer_id: &str,
    action: &str,
) -> Result<&'a SignatureSlot, SigningError> {
    require_status(document, DocumentStatus::PendingSignature, action)?;
    let slot = find_slot(document, slot_id)?;
    if slot.status != SlotStatus::Pending {
        return Err(SigningError::SlotAlreadySigned {
            slot: slot_id.to_owned(),
        });
    }
    if slot.assigned_to.as_deref() != Some(signer_id) {
        return Err(SigningError::NotAssigned {
            slot: slot_id.to_owned(),
            signer: signer_id.to_owned(),
        });
    }
    if action == ACTION_REJECT && !slot.required {
        return Err(SigningError::SlotNotRequired {
            slot: slot_id.to_owned(),
        });
    }
    Ok(slot)
}

/// Turn a failed verification into an error.
///
/// # Errors
///
/// Returns [`SigningError::SignatureVerificationFailed`] when verification
/// failed.
pub fn require_verified(verification: &Verification) -> Result<(), SigningError> {
    match verification.failure {
        None => Ok(()),
        Some(reason) => Err(SigningError::SignatureVerificationFailed { reason }),
    }
}

/// Record a verified signature on a slot. Fills the slot's name field with
/// the signer's display name and approves the document once every required
/// slot is signed.
///
/// # Errors
///
/// Any error from [`check_slot`].
pub fn apply_signature(
    document: &mut Document,
    slot_id: &str,
    signer: &Signer,
    now: DateTime<Utc>,
) -> Result<(), SigningError> {
    check_slot(document, slot_id, &signer.id, ACTION_SIGN)?;
    let slot = find_slot_mut(document, slot_id)?;
    slot.status = SlotStatus::Signed;
    slot.signed_by = Some(signer.id.clone());
    slot.signer_name = Some(signer.display_name.clone());
    slot.signature_image_ref.clone_from(&signer.signature_image_ref);
    slot.signed_at = Some(now);
    let name_field = slot.name_field.clone();

    if let Some(name_field) = name_field {
        document
            .field_values
            .insert(name_field, FieldValue::Text(signer.display_name.clone()));
    }
    document.updated_at = now;

    let complete = document
        .signature_slots
        .iter()
        .filter(|s| s.required)
        .all(|s| s.status == SlotStatus::Signed);
    if complete {
        approve(document, &signer.id, now);
    }
    Ok(())
}

/// Reject the document through one of its required slots.
///
/// # Errors
///
/// Any error from [`check_slot`].
pub fn apply_rejection(
    document: &mut Document,
    slot_id: &str,
    signer: &Signer,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), SigningError> {
    check_slot(document, slot_id, &signer.id, ACTION_REJECT)?;
    let slot = find_slot_mut(document, slot_id)?;
    slot.status = SlotStatus::Rejected;
    slot.signed_by = Some(signer.id.clone());
    slot.signer_name = Some(signer.display_name.clone());
    slot.signed_at = Some(now);

    document.status = DocumentStatus::Rejected;
    document.rejected_by = Some(signer.id.clone());
    document.rejected_at = Some(now);
    document.rejection_reason = reason;
    document.updated_at = now;
    Ok(())
}

/// Signature image per signature field, for every signed slot.
#[must_use]
pub fn signed_images(document: &Document) -> BTreeMap<String, BlobRef> {
    document
        .signature_slots
        .iter()
        .filter(|s| s.status == SlotStatus::Signed)
        .filter_map(|s| s.signature_image_ref.as_ref().map(|r| (s, r)))
        .flat_map(|(slot, image)| {
            slot.signature_fields
                .iter()
                .map(move |field| (field.clone(), image.clone()))
        })
        .collect()
}

fn approve(document: &mut Document, approver: &str, now: DateTime<Utc>) {
    document.status = DocumentStatus::Approved;
    document.approved_by = Some(approver.to_owned());
    document.approved_at = Some(now);
}

fn find_slot<'a>(document: &'a Document, slot_id: &str) -> Result<&'a SignatureSlot, SigningError> {
    document
        .signature_slots
        .iter()
        .find(|s| s.id == slot_id)
        .ok_or_else(|| SigningError::UnknownSlot {
            slot: slot_id.to_owned(),
        })
}

fn find_slot_mut<'a>(
    document: &'a mut Document,
    slot_id: &str,
) -> Result<&'a mut SignatureSlot, SigningError> {
    document
        .signature_slots
        .iter_mut()
        .find(|s| s.id == slot_id)
        .ok_or_else(|| SigningError::UnknownSlot {
            slot: slot_id.to_owned(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::VerificationFailure;
    use crate::placeholder::TemplateField;
    use crate::schema::FieldValues;
    use crate::signature_group::group_signature_fields;

    fn template(tokens: &[&str]) -> TemplateVersion {
        let fields: Vec<TemplateField> = tokens
            .iter()
            .map(|t| TemplateField::parse(t).unwrap())
            .collect();
        TemplateVersion {
            id: "t1".to_owned(),
            title: "Leave request".to_owned(),
            version: 1,
            file_ref: BlobRef::for_content(b"t"),
            file_name: "leave.docx".to_owned(),
            signature_groups: group_signature_fields(&fields),
            fields,
            warnings: Vec::new(),
            is_active: true,
            uploaded_by: "admin".to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn two_slot_template() -> TemplateVersion {
        template(&[
            "{{manager_name}}",
            "{{manager_signature|signature|Manager|required}}",
            "{{hr_name}}",
            "{{hr_signature|signature|HR|required}}",
            "{{witness_signature|signature|Witness}}",
        ])
    }

    fn draft() -> Document {
        Document {
            id: "d1".to_owned(),
            template_version_id: "t1".to_owned(),
            title: "Leave".to_owned(),
            status: DocumentStatus::Draft,
            field_values: FieldValues::new(),
            generated_file_ref: None,
            signature_slots: Vec::new(),
            created_by: "author".to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            submitted_at: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
        }
    }

    fn signer(id: &str) -> Signer {
        Signer {
            id: id.to_owned(),
            display_name: format!("Person {id}"),
            signature_image_ref: Some(BlobRef::for_content(id.as_bytes())),
            pin_hash: None,
            totp_secret: None,
            totp_enabled: false,
        }
    }

    fn assign(doc: &mut Document, field: &str, signer: &str) {
        doc.field_values
            .insert(field, FieldValue::Signature(Some(signer.to_owned())));
    }

    fn submitted() -> Document {
        let mut doc = draft();
        assign(&mut doc, "manager_signature", "m");
        assign(&mut doc, "hr_signature", "h");
        assign(&mut doc, "witness_signature", "w");
        submit(&mut doc, &two_slot_template(), "author", Utc::now()).unwrap();
        doc
    }

    #[test]
    fn submit_builds_slots_and_waits_for_signatures() {
        let doc = submitted();
        assert_eq!(doc.status, DocumentStatus::PendingSignature);
        let ids: Vec<_> = doc.signature_slots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["manager", "hr", "witness_signature"]);
        assert!(doc.submitted_at.is_some());
    }

    #[test]
    fn submit_without_required_slots_approves() {
        let mut doc = draft();
        submit(&mut doc, &template(&["{{a}}", "{{b_signature|signature}}"]), "author", Utc::now())
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
        assert_eq!(doc.approved_by.as_deref(), Some("author"));
    }

    #[test]
    fn submit_twice_is_an_invalid_transition() {
        let mut doc = submitted();
        let err = submit(&mut doc, &two_slot_template(), "author", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            SigningError::InvalidStateTransition {
                status: "pending_signature".to_owned(),
                action: "submit".to_owned(),
            }
        );
    }

    #[test]
    fn approval_needs_every_required_slot_in_any_order() {
        let mut doc = submitted();
        apply_signature(&mut doc, "hr", &signer("h"), Utc::now()).unwrap();
        assert_eq!(doc.status, DocumentStatus::PendingSignature);
        apply_signature(&mut doc, "manager", &signer("m"), Utc::now()).unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
        assert_eq!(doc.approved_by.as_deref(), Some("m"));
        assert_eq!(
            doc.field_values.get("manager_name"),
            Some(&FieldValue::Text("Person m".to_owned()))
        );
        let images = signed_images(&doc);
        assert_eq!(
            images.keys().collect::<Vec<_>>(),
            vec!["hr_signature", "manager_signature"]
        );
    }

    #[test]
    fn rejection_after_a_signature_is_terminal() {
        let mut doc = submitted();
        apply_signature(&mut doc, "manager", &signer("m"), Utc::now()).unwrap();
        apply_rejection(&mut doc, "hr", &signer("h"), Some("dates clash".into()), Utc::now())
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Rejected);
        assert_eq!(doc.rejection_reason.as_deref(), Some("dates clash"));

        let err = apply_signature(&mut doc, "witness_signature", &signer("w"), Utc::now()).unwrap_err();
        assert!(matches!(err, SigningError::InvalidStateTransition { .. }));
    }

    #[test]
    fn slot_errors_leave_the_document_alone() {
        let mut doc = submitted();
        let before = doc.clone();
        assert!(matches!(
            apply_signature(&mut doc, "ceo", &signer("c"), Utc::now()).unwrap_err(),
            SigningError::UnknownSlot { .. }
        ));
        assert!(matches!(
            apply_rejection(&mut doc, "witness_signature", &signer("w"), None, Utc::now())
                .unwrap_err(),
            SigningError::SlotNotRequired { .. }
        ));
        assert_eq!(doc, before);

        apply_signature(&mut doc, "hr", &signer("h"), Utc::now()).unwrap();
        assert!(matches!(
            apply_signature(&mut doc, "hr", &signer("h"), Utc::now()).unwrap_err(),
            SigningError::SlotAlreadySigned { .. }
        ));
    }

    #[test]
    fn assigned_slots_only_accept_their_signer() {
        let doc = submitted();
        let err = check_slot(&doc, "hr", "intruder", ACTION_SIGN).unwrap_err();
        assert_eq!(
            err,
            SigningError::NotAssigned {
                slot: "hr".to_owned(),
                signer: "intruder".to_owned(),
            }
        );
        assert!(check_slot(&doc, "hr", "h", ACTION_SIGN).is_ok());
        assert!(check_slot(&doc, "hr", "intruder", ACTION_REJECT).is_err());
    }

    #[test]
    fn unassigned_optional_slots_accept_nobody() {
        let mut doc = draft();
        assign(&mut doc, "manager_signature", "m");
        assign(&mut doc, "hr_signature", "h");
        submit(&mut doc, &two_slot_template(), "author", Utc::now()).unwrap();

        let witness = doc
            .signature_slots
            .iter()
            .find(|s| s.id == "witness_signature")
            .unwrap();
        assert!(witness.assigned_to.is_none());
        assert!(matches!(
            check_slot(&doc, "witness_signature", "m", ACTION_SIGN).unwrap_err(),
            SigningError::NotAssigned { .. }
        ));
    }

    #[test]
    fn submit_needs_a_signer_for_every_required_slot() {
        let mut doc = draft();
        assign(&mut doc, "manager_signature", "m");
        let before = doc.clone();
        let err = submit(&mut doc, &two_slot_template(), "author", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            SigningError::UnassignedSlot {
                slot: "hr".to_owned()
            }
        );
        assert_eq!(doc, before);
    }

    #[test]
    fn only_the_creator_submits() {
        let mut doc = draft();
        assign(&mut doc, "manager_signature", "m");
        assign(&mut doc, "hr_signature", "h");
        let err = submit(&mut doc, &two_slot_template(), "m", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            SigningError::NotCreator {
                action: "submit".to_owned(),
                user: "m".to_owned(),
            }
        );
        assert_eq!(doc.status, DocumentStatus::Draft);
        assert!(require_creator(&doc, "author", ACTION_UPDATE).is_ok());
    }

    #[test]
    fn drafts_cannot_be_signed() {
        let doc = draft();
        assert!(matches!(
            check_slot(&doc, "hr", "h", ACTION_SIGN).unwrap_err(),
            SigningError::InvalidStateTransition { .. }
        ));
    }

    #[test]
    fn failed_verification_maps_to_its_reason() {
        let failed = Verification {
            pin_verified: true,
            totp_verified: false,
            failure: Some(VerificationFailure::MissingTotpCode),
        };
        assert_eq!(
            require_verified(&failed).unwrap_err(),
            SigningError::SignatureVerificationFailed {
                reason: VerificationFailure::MissingTotpCode
            }
        );
    }
}
