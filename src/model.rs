//! Domain model: slots, uploads, applications and outcome records
//!
//! These are storage-agnostic. MongoDB documents in `db::schemas` convert to
//! and from them; the in-memory stores hold them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::GateError;

/// The logical (application, document type) pairing that holds at most one
/// current upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotId {
    pub application_id: String,
    pub document_type_id: String,
}

impl SlotId {
    pub fn new(application_id: impl Into<String>, document_type_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            document_type_id: document_type_id.into(),
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application_id, self.document_type_id)
    }
}

/// Review status of one physical upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Verified,
    Referred,
}

/// One physical submission into a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpload {
    pub id: String,
    pub slot: SlotId,
    pub blob_ref: String,
    pub original_filename: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
    pub review_status: ReviewStatus,
    /// Newer upload in the same slot that replaced this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl DocumentUpload {
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// Lifecycle of the owning application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Cancelled,
}

impl ApplicationStatus {
    /// Frozen applications accept no further slot transitions
    pub fn is_frozen(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Approved | ApplicationStatus::Rejected | ApplicationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub owner_id: String,
    pub status: ApplicationStatus,
}

/// Discriminator persisted by the current store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    DocumentIssue,
    MedicalReferral,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::DocumentIssue => "document_issue",
            IssueType::MedicalReferral => "medical_referral",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "document_issue" => Some(IssueType::DocumentIssue),
            "medical_referral" => Some(IssueType::MedicalReferral),
            _ => None,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clinician and finding detail carried by a medical referral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalReferral {
    pub doctor_name: String,
    pub clinic_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_address: Option<String>,
    pub finding: String,
}

impl MedicalReferral {
    pub fn validate(&self) -> Result<(), GateError> {
        if self.doctor_name.trim().is_empty() {
            return Err(GateError::BadRequest(
                "medical referral requires a doctor name".into(),
            ));
        }
        if self.clinic_name.trim().is_empty() {
            return Err(GateError::BadRequest(
                "medical referral requires a clinic name".into(),
            ));
        }
        if self.finding.trim().is_empty() {
            return Err(GateError::BadRequest(
                "medical referral requires a finding description".into(),
            ));
        }
        Ok(())
    }
}

/// Kind-specific extension of an outcome record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issueType", rename_all = "snake_case")]
pub enum OutcomeKind {
    DocumentIssue,
    MedicalReferral(MedicalReferral),
}

impl OutcomeKind {
    pub fn issue_type(&self) -> IssueType {
        match self {
            OutcomeKind::DocumentIssue => IssueType::DocumentIssue,
            OutcomeKind::MedicalReferral(_) => IssueType::MedicalReferral,
        }
    }
}

/// Resubmission linkage; set once when a new upload lands in the slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Replacement {
    pub was_replaced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_upload_id: Option<String>,
}

impl Replacement {
    pub fn replaced(at: DateTime<Utc>, upload_id: impl Into<String>) -> Self {
        Self {
            was_replaced: true,
            replaced_at: Some(at),
            replacement_upload_id: Some(upload_id.into()),
        }
    }
}

/// One reviewer decision against one upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub id: String,
    pub slot: SlotId,
    pub attempt_number: u32,
    pub upload_id: String,
    pub reviewer_id: String,
    pub category: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specific_issues: Vec<String>,
    pub decided_at: DateTime<Utc>,
    #[serde(flatten)]
    pub replacement: Replacement,
    #[serde(flatten)]
    pub kind: OutcomeKind,
}

impl OutcomeRecord {
    pub fn issue_type(&self) -> IssueType {
        self.kind.issue_type()
    }

    pub fn is_unresolved(&self) -> bool {
        !self.replacement.was_replaced
    }

    pub fn key(&self) -> OutcomeKey {
        OutcomeKey {
            slot: self.slot.clone(),
            attempt_number: self.attempt_number,
        }
    }
}

/// Deduplication key shared by both stores
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutcomeKey {
    pub slot: SlotId,
    pub attempt_number: u32,
}

/// What a reviewer submits when flagging a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeDraft {
    pub category: String,
    pub reason: String,
    #[serde(default)]
    pub specific_issues: Vec<String>,
    #[serde(flatten)]
    pub kind: OutcomeKind,
}

impl OutcomeDraft {
    pub fn document_issue(category: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            reason: reason.into(),
            specific_issues: Vec::new(),
            kind: OutcomeKind::DocumentIssue,
        }
    }

    pub fn medical_referral(
        category: impl Into<String>,
        reason: impl Into<String>,
        referral: MedicalReferral,
    ) -> Self {
        Self {
            category: category.into(),
            reason: reason.into(),
            specific_issues: Vec::new(),
            kind: OutcomeKind::MedicalReferral(referral),
        }
    }

    pub fn with_specific_issues(mut self, issues: Vec<String>) -> Self {
        self.specific_issues = issues;
        self
    }

    pub fn validate(&self) -> Result<(), GateError> {
        if self.category.trim().is_empty() {
            return Err(GateError::BadRequest("category is required".into()));
        }
        if self.reason.trim().is_empty() {
            return Err(GateError::BadRequest("reason is required".into()));
        }
        if let OutcomeKind::MedicalReferral(referral) = &self.kind {
            referral.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frozen_statuses() {
        assert!(ApplicationStatus::Approved.is_frozen());
        assert!(ApplicationStatus::Rejected.is_frozen());
        assert!(ApplicationStatus::Cancelled.is_frozen());
        assert!(!ApplicationStatus::Submitted.is_frozen());
        assert!(!ApplicationStatus::UnderReview.is_frozen());
    }

    #[test]
    fn test_draft_json_shape() {
        let json = serde_json::json!({
            "category": "clinical",
            "reason": "abnormal chest x-ray",
            "issueType": "medical_referral",
            "doctorName": "Dr. X",
            "clinicName": "City Clinic",
            "finding": "opacity in upper left lobe"
        });

        let draft: OutcomeDraft = serde_json::from_value(json).unwrap();
        assert_eq!(draft.kind.issue_type(), IssueType::MedicalReferral);
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_referral_requires_doctor() {
        let draft = OutcomeDraft::medical_referral(
            "clinical",
            "needs follow-up",
            MedicalReferral {
                doctor_name: " ".into(),
                clinic_name: "City Clinic".into(),
                clinic_address: None,
                finding: "elevated reading".into(),
            },
        );
        assert!(matches!(draft.validate(), Err(GateError::BadRequest(_))));
    }

    #[test]
    fn test_issue_type_round_trip_names() {
        assert_eq!(IssueType::parse("document_issue"), Some(IssueType::DocumentIssue));
        assert_eq!(IssueType::MedicalReferral.as_str(), "medical_referral");
        assert_eq!(IssueType::parse("other"), None);
    }
}
