//! Document routes: `/v1/documents/*`
//!
//! Drafting, submission, signing, rejection, and artifact download. The
//! caller's identity doubles as the signer for approve and reject.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use docseal_core::catalog::Document;
use docseal_core::credentials::SigningCredentials;
use docseal_core::documents::{ExportFormat, NewDocument};

use crate::error::AppError;
use crate::middleware::CallerIdentity;
use crate::routes::attachment;
use crate::state::AppState;

/// Build the `/v1/documents` router.
///
/// - `POST /v1/documents` — create a draft
/// - `GET  /v1/documents/pending-signatures` — documents awaiting the caller
/// - `GET  /v1/documents/{id}` — document record
/// - `PUT  /v1/documents/{id}/fields` — update a draft
/// - `POST /v1/documents/{id}/submit` — submit for signing
/// - `POST /v1/documents/{id}/approve` — sign a slot
/// - `POST /v1/documents/{id}/reject` — reject through a required slot
/// - `GET  /v1/documents/{id}/file?format=docx|pdf` — download
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_document))
        .route("/pending-signatures", get(pending_signatures))
        .route("/{id}", get(get_document))
        .route("/{id}/fields", put(update_fields))
        .route("/{id}/submit", post(submit_document))
        .route("/{id}/approve", post(approve_document))
        .route("/{id}/reject", post(reject_document))
        .route("/{id}/file", get(download_document))
}

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub template_version_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PendingSignaturesResponse {
    pub documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFieldsRequest {
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Body of approve and reject. The slot is named by `fieldName` for a lone
/// signature field or `groupId` for a signature group.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    pub field_name: Option<String>,
    pub group_id: Option<String>,
    pub pin: String,
    pub totp_code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SigningRequest {
    fn into_parts(self) -> Result<(String, SigningCredentials, Option<String>), AppError> {
        let slot = self
            .field_name
            .or(self.group_id)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("fieldName or groupId is required".to_owned()))?;
        Ok((
            slot,
            SigningCredentials::new(self.pin, self.totp_code),
            self.reason,
        ))
    }
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("field_name", &self.field_name)
            .field("group_id", &self.group_id)
            .field("pin", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn create_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let document = state
        .documents
        .create_draft(NewDocument {
            template_version_id: body.template_version_id,
            title: body.title,
            fields: body.fields,
            created_by: caller.user_id().to_owned(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn pending_signatures(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<Json<PendingSignaturesResponse>, AppError> {
    let documents = state.documents.pending_for(caller.user_id()).await?;
    Ok(Json(PendingSignaturesResponse { documents }))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(state.documents.get(&id).await?))
}

async fn update_fields(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(body): Json<UpdateFieldsRequest>,
) -> Result<Json<Document>, AppError> {
    let document = state
        .documents
        .update_draft(&id, caller.user_id(), &body.fields)
        .await?;
    Ok(Json(document))
}

async fn submit_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(state.documents.submit(&id, caller.user_id()).await?))
}

async fn approve_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(body): Json<SigningRequest>,
) -> Result<Json<Document>, AppError> {
    let (slot, credentials, _) = body.into_parts()?;
    let document = state
        .documents
        .sign(&id, &slot, &caller.signer, credentials)
        .await?;
    Ok(Json(document))
}

async fn reject_document(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(body): Json<SigningRequest>,
) -> Result<Json<Document>, AppError> {
    let (slot, credentials, reason) = body.into_parts()?;
    let document = state
        .documents
        .reject(&id, &slot, &caller.signer, credentials, reason)
        .await?;
    Ok(Json(document))
}

async fn download_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Response, AppError> {
    let artifact = state.documents.export(&id, query.format).await?;
    Ok(attachment(
        &artifact.file_name,
        artifact.content_type,
        artifact.bytes,
    ))
}
