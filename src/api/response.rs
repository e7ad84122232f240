//! Wire envelope for operation results and error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Status returned by mutating endpoints and by every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Success or failure
    pub success: bool,

    /// Status message
    pub message: String,

    /// Error kind, set on failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl OperationStatus {
    /// Create success status
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
        }
    }

    /// Create failure status from an error
    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            message: error.message(),
            kind: Some(error.kind().to_string()),
        }
    }
}

/// HTTP status used for each error kind
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) | Error::VersionMismatch { .. } => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
        Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (status_for(&self), Json(OperationStatus::failure(&self))).into_response()
    }
}

/// Rebuild an [`Error`] from a failed response.
///
/// The `kind` field wins when present so an error keeps its variant across a
/// hop; otherwise the HTTP status decides.
pub fn error_from_response(status: StatusCode, body: &str) -> Error {
    let parsed: Option<OperationStatus> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .map(|s| s.message.clone())
        .unwrap_or_else(|| body.to_string());
    let kind = parsed.and_then(|s| s.kind);

    match kind.as_deref() {
        Some("not_found") => Error::NotFound(message),
        Some("validation") => Error::Validation(message),
        Some("conflict") => Error::Conflict(message),
        Some("upstream") => Error::Upstream(message),
        Some("unauthorized") => Error::Unauthorized(message),
        Some("permission_denied") => Error::PermissionDenied(message),
        Some("store") => Error::Store(message),
        // version mismatch messages already carry their full text
        Some("version_mismatch") => Error::Validation(message),
        _ => match status {
            StatusCode::NOT_FOUND => Error::NotFound(message),
            StatusCode::BAD_REQUEST => Error::Validation(message),
            StatusCode::CONFLICT => Error::Conflict(message),
            StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
            StatusCode::FORBIDDEN => Error::PermissionDenied(message),
            _ => Error::Upstream(format!("status {}: {}", status.as_u16(), message)),
        },
    }
}
