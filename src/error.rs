//! Error taxonomy shared by the manager and provider tiers

use thiserror::Error;

/// Errors surfaced by control plane operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("unsupported provider api version: {got} (expected {expected})")]
    VersionMismatch { got: String, expected: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permission denied: missing '{0}' permission")]
    PermissionDenied(String),

    #[error("store error: {0}")]
    Store(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Error::Upstream(msg.into())
    }

    /// Stable kind label used on the wire and in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::Upstream(_) => "upstream",
            Error::VersionMismatch { .. } => "version_mismatch",
            Error::Unauthorized(_) => "unauthorized",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Store(_) => "store",
        }
    }

    /// Strip the variant prefix, keeping the message a caller supplied.
    ///
    /// Used when an error crosses the wire so the receiving side can rebuild
    /// the same variant without doubling the prefix.
    pub fn message(&self) -> String {
        match self {
            Error::NotFound(m)
            | Error::Validation(m)
            | Error::Conflict(m)
            | Error::Upstream(m)
            | Error::Unauthorized(m)
            | Error::PermissionDenied(m)
            | Error::Store(m) => m.clone(),
            Error::VersionMismatch { .. } => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Upstream(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_message() {
        let err = Error::VersionMismatch {
            got: "2.0.0".to_string(),
            expected: "1.0.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unsupported provider api version: 2.0.0 (expected 1.0.0)"
        );
        assert_eq!(err.kind(), "version_mismatch");
    }

    #[test]
    fn test_message_drops_prefix() {
        let err = Error::not_found("provider p1");
        assert_eq!(err.to_string(), "not found: provider p1");
        assert_eq!(err.message(), "provider p1");
    }
}
