//! Authentication and authorization
//!
//! Provides:
//! - Bearer JWT verification (the identity provider's tokens)
//! - Role levels and the operation whitelist
//! - The document access check used before token issuance and again at
//!   byte-serving time

pub mod access;
pub mod jwt;
pub mod roles;

use serde::{Deserialize, Serialize};

pub use access::AccessPolicy;
pub use jwt::{extract_token_from_header, Claims, JwtValidator};
pub use roles::{is_operation_allowed, required_role, Role};

use crate::types::GateError;

/// The authenticated identity behind a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub subject_id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
        }
    }

    /// Fail with `Unauthorized` unless the caller's role allows `operation`
    pub fn require(&self, operation: &str) -> Result<(), GateError> {
        if is_operation_allowed(operation, self.role) {
            Ok(())
        } else {
            Err(GateError::Unauthorized(format!(
                "{} may not {}",
                self.role, operation
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_reviewer_operation() {
        let applicant = Caller::new("alice", Role::Applicant);
        let reviewer = Caller::new("rita", Role::Reviewer);

        assert!(matches!(
            applicant.require("record_outcome"),
            Err(GateError::Unauthorized(_))
        ));
        assert!(reviewer.require("record_outcome").is_ok());
    }
}
