//! Template routes: `/v1/templates/*`

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;

use docseal_core::catalog::TemplateVersion;
use docseal_core::documents::DOCX_CONTENT_TYPE;
use docseal_core::templates::{TemplateSchema, TemplateUpload};

use crate::error::AppError;
use crate::middleware::CallerIdentity;
use crate::routes::attachment;
use crate::state::AppState;

/// Build the `/v1/templates` router.
///
/// - `POST /v1/templates` — upload (multipart `title` + `file`)
/// - `GET  /v1/templates/{id}` — version record
/// - `GET  /v1/templates/{id}/fields` — form schema
/// - `GET  /v1/templates/{id}/file` — download the `.docx`
/// - `GET  /v1/templates/by-title/{title}` — version history
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(upload_template))
        .route("/{id}", get(get_template))
        .route("/{id}/fields", get(get_fields))
        .route("/{id}/file", get(download_template))
        .route("/by-title/{title}", get(list_versions))
}

#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub versions: Vec<TemplateVersion>,
}

async fn upload_template(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<TemplateVersion>), AppError> {
    let mut title = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("title") => {
                title = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let title = title.ok_or_else(|| AppError::BadRequest("missing 'title' field".to_owned()))?;
    let (file_name, bytes) =
        file.ok_or_else(|| AppError::BadRequest("missing 'file' field".to_owned()))?;

    let version = state
        .templates
        .upload(TemplateUpload {
            title,
            file_name,
            bytes,
            uploaded_by: caller.user_id().to_owned(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::BadRequest(format!("invalid multipart body: {}", err.body_text()))
    }
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TemplateVersion>, AppError> {
    Ok(Json(state.templates.get(&id).await?))
}

async fn get_fields(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TemplateSchema>, AppError> {
    Ok(Json(state.templates.fields(&id).await?))
}

async fn download_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (version, bytes) = state.templates.file(&id).await?;
    Ok(attachment(&version.file_name, DOCX_CONTENT_TYPE, bytes))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(title): Path<String>,
) -> Result<Json<VersionsResponse>, AppError> {
    let versions = state.templates.versions(&title).await?;
    if versions.is_empty() {
        return Err(AppError::NotFound(format!("no template titled '{title}'")));
    }
    Ok(Json(VersionsResponse { versions }))
}
