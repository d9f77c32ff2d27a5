//! Current referral schema
//!
//! Superset of the legacy rejection shape: an `issue_type` discriminator plus
//! clinician/clinic detail for medical referrals.

use bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{IssueType, MedicalReferral, OutcomeKind, OutcomeRecord, Replacement, SlotId};
use crate::types::GateError;

pub const REFERRAL_COLLECTION: &str = "document_referrals";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReferralDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub record_id: String,

    pub application_id: String,

    pub document_type_id: String,

    /// `document_issue` or `medical_referral`
    pub issue_type: String,

    pub category: String,

    pub reason: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specific_issues: Vec<String>,

    pub attempt_number: u32,

    /// Upload that was flagged
    pub upload_id: String,

    pub referred_by: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub referred_at: DateTime<Utc>,

    #[serde(default)]
    pub was_replaced: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_at: Option<BsonDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_upload_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding: Option<String>,

    /// Copied from the legacy collection when it had to be marked replaced
    #[serde(default)]
    pub promoted_from_legacy: bool,
}

impl ReferralDoc {
    pub fn from_record(record: OutcomeRecord, promoted_from_legacy: bool) -> Self {
        let issue_type = record.issue_type().as_str().to_string();
        let (doctor_name, clinic_name, clinic_address, finding) = match record.kind {
            OutcomeKind::DocumentIssue => (None, None, None, None),
            OutcomeKind::MedicalReferral(referral) => (
                Some(referral.doctor_name),
                Some(referral.clinic_name),
                referral.clinic_address,
                Some(referral.finding),
            ),
        };

        ReferralDoc {
            _id: None,
            metadata: Metadata::new(),
            record_id: record.id,
            application_id: record.slot.application_id,
            document_type_id: record.slot.document_type_id,
            issue_type,
            category: record.category,
            reason: record.reason,
            specific_issues: record.specific_issues,
            attempt_number: record.attempt_number,
            upload_id: record.upload_id,
            referred_by: record.reviewer_id,
            referred_at: record.decided_at,
            was_replaced: record.replacement.was_replaced,
            replaced_at: record.replacement.replaced_at.map(BsonDateTime::from_chrono),
            replacement_upload_id: record.replacement.replacement_upload_id,
            doctor_name,
            clinic_name,
            clinic_address,
            finding,
            promoted_from_legacy,
        }
    }
}

impl TryFrom<ReferralDoc> for OutcomeRecord {
    type Error = GateError;

    fn try_from(doc: ReferralDoc) -> Result<Self, Self::Error> {
        let issue_type = IssueType::parse(&doc.issue_type).ok_or_else(|| {
            GateError::Database(format!(
                "referral {} has unknown issue_type '{}'",
                doc.record_id, doc.issue_type
            ))
        })?;

        let kind = match issue_type {
            IssueType::DocumentIssue => OutcomeKind::DocumentIssue,
            IssueType::MedicalReferral => match (doc.doctor_name, doc.clinic_name, doc.finding) {
                (Some(doctor_name), Some(clinic_name), Some(finding)) => {
                    OutcomeKind::MedicalReferral(MedicalReferral {
                        doctor_name,
                        clinic_name,
                        clinic_address: doc.clinic_address,
                        finding,
                    })
                }
                _ => {
                    return Err(GateError::Database(format!(
                        "medical referral {} is missing clinician detail",
                        doc.record_id
                    )))
                }
            },
        };

        Ok(OutcomeRecord {
            id: doc.record_id,
            slot: SlotId::new(doc.application_id, doc.document_type_id),
            attempt_number: doc.attempt_number,
            upload_id: doc.upload_id,
            reviewer_id: doc.referred_by,
            category: doc.category,
            reason: doc.reason,
            specific_issues: doc.specific_issues,
            decided_at: doc.referred_at,
            replacement: Replacement {
                was_replaced: doc.was_replaced,
                replaced_at: doc.replaced_at.map(|at| at.to_chrono()),
                replacement_upload_id: doc.replacement_upload_id,
            },
            kind,
        })
    }
}

impl IntoIndexes for ReferralDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "record_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("record_id_unique".to_string())
                        .build(),
                ),
            ),
            // One record per attempt per slot
            (
                doc! { "application_id": 1, "document_type_id": 1, "attempt_number": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("slot_attempt_unique".to_string())
                        .build(),
                ),
            ),
            // At most one unresolved record per slot
            (
                doc! { "application_id": 1, "document_type_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "was_replaced": false })
                        .name("slot_unresolved_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ReferralDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referral_record() -> OutcomeRecord {
        OutcomeRecord {
            id: "rec-1".into(),
            slot: SlotId::new("app-1", "chest-xray"),
            attempt_number: 1,
            upload_id: "u1".into(),
            reviewer_id: "reviewer-1".into(),
            category: "clinical".into(),
            reason: "follow-up needed".into(),
            specific_issues: vec![],
            decided_at: Utc::now(),
            replacement: Replacement::default(),
            kind: OutcomeKind::MedicalReferral(MedicalReferral {
                doctor_name: "Dr. X".into(),
                clinic_name: "City Clinic".into(),
                clinic_address: None,
                finding: "shadow on lung".into(),
            }),
        }
    }

    #[test]
    fn test_referral_doc_preserves_clinician_detail() {
        let record = referral_record();
        let doc = ReferralDoc::from_record(record.clone(), false);
        assert_eq!(doc.issue_type, "medical_referral");
        assert_eq!(doc.doctor_name.as_deref(), Some("Dr. X"));

        let back = OutcomeRecord::try_from(doc).unwrap();
        assert_eq!(back.kind, record.kind);
        assert_eq!(back.slot, record.slot);
    }

    #[test]
    fn test_unknown_issue_type_rejected() {
        let mut doc = ReferralDoc::from_record(referral_record(), false);
        doc.issue_type = "billing".into();
        assert!(matches!(
            OutcomeRecord::try_from(doc),
            Err(GateError::Database(_))
        ));
    }

    #[test]
    fn test_medical_referral_without_doctor_rejected() {
        let mut doc = ReferralDoc::from_record(referral_record(), false);
        doc.doctor_name = None;
        assert!(OutcomeRecord::try_from(doc).is_err());
    }
}
