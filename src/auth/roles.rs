//! Role levels and the operation table that gates them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role levels, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
#[derive(Default)]
pub enum Role {
    /// Submitting party; may only touch their own applications
    #[default]
    Applicant = 0,
    /// Reviews evidence documents and records outcomes
    Reviewer = 1,
    /// Everything a reviewer can do, plus operator tasks
    Admin = 2,
}

impl Role {
    /// Parse a role claim; unknown claims are ignored by callers
    pub fn from_claim(claim: &str) -> Option<Self> {
        match claim.trim().to_ascii_lowercase().as_str() {
            "applicant" | "user" => Some(Role::Applicant),
            "reviewer" | "examiner" => Some(Role::Reviewer),
            "admin" | "administrator" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Highest role among a set of claims, defaulting to applicant
    pub fn highest<'a>(claims: impl IntoIterator<Item = &'a str>) -> Self {
        claims
            .into_iter()
            .filter_map(Role::from_claim)
            .max()
            .unwrap_or_default()
    }

    /// Privileged roles may read any application's documents
    pub fn is_privileged(self) -> bool {
        self >= Role::Reviewer
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Applicant => write!(f, "applicant"),
            Role::Reviewer => write!(f, "reviewer"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Minimum role for an operation. Unknown operations return None and are blocked.
pub fn required_role(operation: &str) -> Option<Role> {
    match operation {
        // Owner-scoped; ownership is checked separately
        "issue_access_token" | "register_upload" | "view_history" | "view_own_counts" => {
            Some(Role::Applicant)
        }

        "record_outcome" | "verify_upload" | "view_any_counts" => Some(Role::Reviewer),

        _ => None,
    }
}

/// Check if an operation is allowed for the given role
pub fn is_operation_allowed(operation: &str, role: Role) -> bool {
    match required_role(operation) {
        Some(required) => role >= required,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::Reviewer);
        assert!(Role::Reviewer > Role::Applicant);
        assert!(Role::Reviewer.is_privileged());
        assert!(!Role::Applicant.is_privileged());
    }

    #[test]
    fn test_highest_claim_wins() {
        assert_eq!(Role::highest(["applicant", "reviewer"]), Role::Reviewer);
        assert_eq!(Role::highest(["Admin"]), Role::Admin);
        assert_eq!(Role::highest(["nonsense"]), Role::Applicant);
        assert_eq!(Role::highest(Vec::<&str>::new()), Role::Applicant);
    }

    #[test]
    fn test_reviewer_operations() {
        assert!(!is_operation_allowed("record_outcome", Role::Applicant));
        assert!(is_operation_allowed("record_outcome", Role::Reviewer));
        assert!(is_operation_allowed("verify_upload", Role::Admin));
    }

    #[test]
    fn test_unknown_operations_blocked() {
        assert!(!is_operation_allowed("delete_history", Role::Admin));
    }
}
