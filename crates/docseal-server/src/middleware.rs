//! Caller identity middleware.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user id in `X-User-Id`. The id is resolved through the identity provider
//! and the resulting [`CallerIdentity`] is attached as a request extension.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use docseal_core::credentials::Signer;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The resolved caller of a request.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub signer: Signer,
}

impl CallerIdentity {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.signer.id
    }
}

/// Resolve `X-User-Id` or reject the request with 401.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] if the header is missing, empty, or
/// names an unknown user.
pub async fn identity_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing X-User-Id header".to_owned()))?
        .to_owned();

    let signer = state.identities.signer(&user_id).await.ok_or_else(|| {
        tracing::debug!(user = %user_id, "unknown caller");
        AppError::Unauthorized(format!("unknown user '{user_id}'"))
    })?;

    req.extensions_mut().insert(CallerIdentity { signer });
    Ok(next.run(req).await)
}
