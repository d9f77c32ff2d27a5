//! Error types for evidence-gate

use hyper::StatusCode;

/// Message returned for both expired and forged access tokens.
pub const INVALID_OR_EXPIRED: &str = "invalid or expired access token";

/// Main error type for evidence-gate operations
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access token expired")]
    Expired,

    #[error("Access token signature invalid: {0}")]
    InvalidSignature(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Terminal state violation: {0}")]
    TerminalStateViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Convert error to HTTP status code
    ///
    /// `Expired` maps to 403 here; the file route opts into 410 separately.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Expired => StatusCode::FORBIDDEN,
            Self::InvalidSignature(_) => StatusCode::FORBIDDEN,
            Self::IntegrityViolation(_) => StatusCode::CONFLICT,
            Self::TerminalStateViolation(_) => StatusCode::CONFLICT,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to an external caller.
    ///
    /// Expired and forged tokens must be indistinguishable from outside.
    pub fn public_message(&self) -> String {
        match self {
            Self::Expired | Self::InvalidSignature(_) => INVALID_OR_EXPIRED.to_string(),
            Self::Database(_) | Self::Internal(_) | Self::Config(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Short machine-readable code for JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Expired | Self::InvalidSignature(_) => "invalid_token",
            Self::IntegrityViolation(_) => "integrity_violation",
            Self::TerminalStateViolation(_) => "terminal_state",
            Self::Config(_) => "configuration",
            Self::BadRequest(_) => "bad_request",
            Self::Database(_) => "database",
            Self::Upstream(_) => "upstream",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for GateError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for GateError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::de::Error> for GateError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON decode error: {}", err))
    }
}

impl From<bson::ser::Error> for GateError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode error: {}", err))
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for GateError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthenticated(format!("JWT error: {}", err))
    }
}

/// Result type alias for evidence-gate operations
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_and_forged_look_identical() {
        let expired = GateError::Expired;
        let forged = GateError::InvalidSignature("mac mismatch".into());

        assert_eq!(expired.public_message(), forged.public_message());
        assert_eq!(expired.status_code(), forged.status_code());
        assert_eq!(expired.code(), forged.code());
        // Internal display still tells them apart for diagnostics
        assert_ne!(expired.to_string(), forged.to_string());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GateError::NotFound("doc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GateError::IntegrityViolation("two open".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GateError::Unauthenticated("no token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GateError::Unauthorized("applicant".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = GateError::Database("connection string leaked".into());
        assert!(!err.public_message().contains("connection"));
    }
}
