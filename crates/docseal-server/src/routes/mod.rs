//! HTTP route handlers for the `DocSeal` API.
//!
//! Each module provides a `router()` function returning an Axum `Router`
//! that is nested under `/v1/` in the main application.

pub mod documents;
pub mod health;
pub mod templates;

use axum::http::header;
use axum::response::{IntoResponse, Response};

/// A file download response.
pub(crate) fn attachment(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Response {
    let safe_name: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    (
        [
            (header::CONTENT_TYPE, content_type.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{safe_name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}
