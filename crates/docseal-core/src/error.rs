//! Error types for `docseal-core`.
//!
//! Each subsystem owns one enum. Variants carry enough context to diagnose
//! the problem from a log line; credential errors never include the PIN,
//! the TOTP secret, or the submitted code.

use std::fmt;

use serde::Serialize;

use docseal_storage::StorageError;

/// A placeholder token that does not follow the grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceholderError {
    /// The token is excluded from the field list and left in the document.
    #[error("malformed placeholder '{token}': {reason}")]
    Malformed { token: String, reason: String },
}

/// Errors reading or writing a WordprocessingML package.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// The bytes are not a readable zip archive.
    #[error("not a valid document package: {reason}")]
    Archive { reason: String },

    /// A part the package needs is absent.
    #[error("document package is missing part '{part}'")]
    MissingPart { part: String },

    /// A part contains XML that cannot be parsed.
    #[error("malformed XML in part '{part}': {reason}")]
    Xml { part: String, reason: String },

    /// Re-assembling the package failed.
    #[error("failed to write document package: {reason}")]
    Write { reason: String },
}

/// Errors from scanning a template for placeholders.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The same field name was declared with two different types.
    #[error(
        "field '{name}' is declared as both '{first_type}' and '{second_type}'; \
         a field name must keep one type across the template"
    )]
    ConflictingFieldDefinition {
        name: String,
        first_type: String,
        second_type: String,
    },

    /// The template package could not be read.
    #[error("template package error: {0}")]
    Package(#[from] PackageError),
}

/// Why a single field value was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FailureReason {
    /// A required field has no usable value.
    Required,
    /// A required checkbox was not checked.
    MustBeChecked,
    /// The value is not a number.
    NotNumeric { value: String },
    /// The value is below the declared minimum.
    BelowMinimum { min: f64 },
    /// The value is above the declared maximum.
    AboveMaximum { max: f64 },
    /// The value is not one of the declared options.
    NotAnOption { options: Vec<String> },
    /// The value cannot be read as a checkbox state.
    NotBoolean { value: String },
    /// The value cannot be read as text (arrays, objects).
    NotText,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "a value is required"),
            Self::MustBeChecked => write!(f, "must be checked"),
            Self::NotNumeric { value } => write!(f, "'{value}' is not a number"),
            Self::BelowMinimum { min } => write!(f, "must be at least {min}"),
            Self::AboveMaximum { max } => write!(f, "must be at most {max}"),
            Self::NotAnOption { options } => {
                write!(f, "must be one of: {}", options.join(", "))
            }
            Self::NotBoolean { value } => write!(f, "'{value}' is not a yes/no value"),
            Self::NotText => write!(f, "must be text"),
        }
    }
}

/// One field that failed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFailure {
    /// The field name.
    pub field: String,
    /// What was wrong with it.
    pub reason: FailureReason,
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Every field failure found in one validation pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("validation failed for {} field(s): {}", .failures.len(), summarize(.failures))]
pub struct ValidationFailed {
    /// All failures, in field order.
    pub failures: Vec<FieldFailure>,
}

fn summarize(failures: &[FieldFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors producing a document artifact.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The template package is corrupt or could not be rewritten.
    #[error("generation failed: {0}")]
    Package(#[from] PackageError),

    /// A signature image is not a PNG or JPEG we can embed.
    #[error("signature image for '{field}' cannot be embedded: {reason}")]
    UnsupportedImage { field: String, reason: String },

    /// The fixed-layout export failed.
    #[error("PDF export failed: {reason}")]
    Pdf { reason: String },

    /// The blocking generation task did not complete.
    #[error("generation task failed: {reason}")]
    Internal { reason: String },
}

/// Errors from the content-addressed blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob exists under the reference.
    #[error("blob '{blob_ref}' not found")]
    NotFound { blob_ref: String },

    /// The reference is not one this store issues.
    #[error("invalid blob reference '{blob_ref}'")]
    InvalidRef { blob_ref: String },

    /// The storage backend failed.
    #[error("blob storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the template and document catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The requested record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A record with this id already exists.
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    /// A stored record could not be encoded or decoded.
    #[error("catalog record error: {reason}")]
    Serialization { reason: String },

    /// The storage backend failed.
    #[error("catalog storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors handling PINs and TOTP secrets outside of a signing attempt.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The PIN does not meet the length policy.
    #[error("invalid PIN: {reason}")]
    InvalidPin { reason: String },

    /// A stored PIN hash is not in the expected format.
    #[error("unreadable PIN hash: {reason}")]
    MalformedHash { reason: String },

    /// The TOTP secret cannot be decoded or is too short.
    #[error("invalid TOTP secret: {reason}")]
    InvalidTotpSecret { reason: String },
}

/// Why a signing attempt failed credential verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    /// The signer has no signature image on file.
    MissingSignatureImage,
    /// The PIN does not match the stored hash.
    IncorrectPin,
    /// The signer has 2FA enabled and no code was supplied.
    MissingTotpCode,
    /// The TOTP code is malformed or outside the accepted window.
    InvalidTotpCode,
    /// The signer's stored credentials are unusable.
    CredentialsUnavailable,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::MissingSignatureImage => "signer has no signature image on file",
            Self::IncorrectPin => "incorrect PIN",
            Self::MissingTotpCode => "a TOTP code is required for this signer",
            Self::InvalidTotpCode => "invalid or expired TOTP code",
            Self::CredentialsUnavailable => "signer credentials are not set up",
        };
        f.write_str(msg)
    }
}

/// Errors from the signing state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    /// The document's status does not allow the action.
    #[error("cannot {action} a document in status '{status}'")]
    InvalidStateTransition { status: String, action: String },

    /// No signing slot has this id.
    #[error("document has no signature slot '{slot}'")]
    UnknownSlot { slot: String },

    /// The slot already carries a verified signature.
    #[error("signature slot '{slot}' is already signed")]
    SlotAlreadySigned { slot: String },

    /// The slot is not assigned to this signer.
    #[error("signature slot '{slot}' is not assigned to signer '{signer}'")]
    NotAssigned { slot: String, signer: String },

    /// A required slot has no signer, so the document cannot be submitted.
    #[error("required signature slot '{slot}' has no assigned signer")]
    UnassignedSlot { slot: String },

    /// Only the document's creator may edit or submit it.
    #[error("'{user}' did not create this document and cannot {action} it")]
    NotCreator { action: String, user: String },

    /// Only required slots can reject a document.
    #[error("signature slot '{slot}' is optional and cannot reject the document")]
    SlotNotRequired { slot: String },

    /// PIN, TOTP, or signature image check failed. The caller may retry.
    #[error("signature verification failed: {reason}")]
    SignatureVerificationFailed { reason: VerificationFailure },
}

/// Errors from audit logging.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Every registered backend failed to persist the entry.
    #[error("all audit backends failed")]
    AllBackendsFailed,

    /// A single backend failed.
    #[error("audit backend '{name}' failed: {reason}")]
    BackendFailure { name: String, reason: String },

    /// The entry could not be serialized.
    #[error("audit serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors from template upload and lookup.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The upload is not an acceptable template file.
    #[error("invalid template upload: {reason}")]
    InvalidUpload { reason: String },

    /// The upload exceeds the size ceiling.
    #[error("template is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// The template has a fatal scan problem.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The template file could not be stored or fetched.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The catalog rejected the record.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The blocking scan task did not complete.
    #[error("template task failed: {reason}")]
    Internal { reason: String },
}

/// Errors from document drafting, submission, signing, and export.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Field values violate the template schema.
    #[error(transparent)]
    Validation(#[from] ValidationFailed),

    /// The state machine refused the transition.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The artifact could not be produced.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// A blob could not be stored or fetched.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The catalog failed or lacks a record.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The signing attempt could not be audited, so it was not applied.
    #[error("signing attempt not applied: {0}")]
    Audit(#[from] AuditError),
}
