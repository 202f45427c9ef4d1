//! HTTP error types for the `DocSeal` server.
//!
//! Maps domain errors from `docseal-core` into HTTP responses. Every error
//! variant produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`; validation failures add a `failures` array.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use docseal_core::error::{
    BlobError, CatalogError, DocumentError, FieldFailure, GenerationError, ScanError,
    SigningError, TemplateError, ValidationFailed,
};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// No caller identity, or an unknown one.
    Unauthorized(String),
    /// The caller may not act on this resource, or failed verification.
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// The resource is not in a state that allows the action.
    Conflict(String),
    /// The upload exceeds the configured ceiling.
    PayloadTooLarge(String),
    /// Field values failed validation.
    Validation(ValidationFailed),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<Vec<FieldFailure>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut failures = None;
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg),
            Self::Validation(err) => {
                let message = err.to_string();
                failures = Some(err.failures);
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", message)
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
            failures,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { .. } => Self::NotFound(err.to_string()),
            CatalogError::AlreadyExists { .. } => Self::Conflict(err.to_string()),
            CatalogError::Serialization { .. } | CatalogError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        // Every ref the API sees was issued by the store, so a miss is ours.
        Self::Internal(err.to_string())
    }
}

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::InvalidUpload { .. } => Self::BadRequest(err.to_string()),
            TemplateError::TooLarge { .. } => Self::PayloadTooLarge(err.to_string()),
            TemplateError::Scan(ScanError::ConflictingFieldDefinition { .. }) => {
                Self::Conflict(err.to_string())
            }
            TemplateError::Scan(ScanError::Package(_)) => Self::BadRequest(err.to_string()),
            TemplateError::Blob(inner) => inner.into(),
            TemplateError::Catalog(inner) => inner.into(),
            TemplateError::Internal { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<SigningError> for AppError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::InvalidStateTransition { .. } | SigningError::SlotAlreadySigned { .. } => {
                Self::Conflict(err.to_string())
            }
            SigningError::UnknownSlot { .. } => Self::NotFound(err.to_string()),
            SigningError::SlotNotRequired { .. } | SigningError::UnassignedSlot { .. } => {
                Self::BadRequest(err.to_string())
            }
            SigningError::NotAssigned { .. }
            | SigningError::NotCreator { .. }
            | SigningError::SignatureVerificationFailed { .. } => Self::Forbidden(err.to_string()),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::UnsupportedImage { .. } => Self::BadRequest(err.to_string()),
            GenerationError::Package(_)
            | GenerationError::Pdf { .. }
            | GenerationError::Internal { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Validation(inner) => Self::Validation(inner),
            DocumentError::Signing(inner) => inner.into(),
            DocumentError::Generation(inner) => inner.into(),
            DocumentError::Blob(inner) => inner.into(),
            DocumentError::Catalog(inner) => inner.into(),
            DocumentError::Audit(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use docseal_core::error::{FailureReason, VerificationFailure};

    use super::*;

    async fn body(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_failures_are_listed() {
        let err = DocumentError::Validation(ValidationFailed {
            failures: vec![FieldFailure {
                field: "salary".to_owned(),
                reason: FailureReason::BelowMinimum { min: 1000.0 },
            }],
        });
        let (status, json) = body(err.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "validation_failed");
        assert_eq!(json["failures"][0]["field"], "salary");
        assert_eq!(json["failures"][0]["reason"]["code"], "below_minimum");
    }

    #[tokio::test]
    async fn signing_errors_map_to_statuses() {
        let (status, json) = body(
            SigningError::SignatureVerificationFailed {
                reason: VerificationFailure::IncorrectPin,
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(json.get("failures").is_none());

        let (status, _) = body(
            SigningError::InvalidStateTransition {
                status: "approved".to_owned(),
                action: "sign".to_owned(),
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = body(
            SigningError::NotCreator {
                action: "update".to_owned(),
                user: "mgr-1".to_owned(),
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = body(
            SigningError::UnassignedSlot {
                slot: "hr".to_owned(),
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}