//! Legacy rejection schema
//!
//! The original, narrower audit-trail shape. It has no issue-type
//! discriminator: every rejection was a content defect, so it always
//! normalizes to `OutcomeKind::DocumentIssue`. Nothing writes this collection
//! any more.

use bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{OutcomeKind, OutcomeRecord, Replacement, SlotId};

pub const REJECTION_COLLECTION: &str = "document_rejections";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RejectionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub application_id: String,

    pub document_type_id: String,

    /// Upload that was rejected
    pub upload_id: String,

    pub rejection_category: String,

    pub rejection_reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_issues: Option<Vec<String>>,

    pub attempt_number: u32,

    pub rejected_by: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub rejected_at: DateTime<Utc>,

    #[serde(default)]
    pub was_replaced: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_at: Option<BsonDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_upload_id: Option<String>,
}

impl RejectionDoc {
    /// Legacy rows predate string record ids; the ObjectId stands in.
    fn record_id(&self) -> String {
        match &self._id {
            Some(oid) => oid.to_hex(),
            None => format!(
                "legacy:{}:{}:{}",
                self.application_id, self.document_type_id, self.attempt_number
            ),
        }
    }
}

impl From<RejectionDoc> for OutcomeRecord {
    fn from(doc: RejectionDoc) -> Self {
        let id = doc.record_id();
        OutcomeRecord {
            id,
            slot: SlotId::new(doc.application_id, doc.document_type_id),
            attempt_number: doc.attempt_number,
            upload_id: doc.upload_id,
            reviewer_id: doc.rejected_by,
            category: doc.rejection_category,
            reason: doc.rejection_reason,
            specific_issues: doc.specific_issues.unwrap_or_default(),
            decided_at: doc.rejected_at,
            replacement: Replacement {
                was_replaced: doc.was_replaced,
                replaced_at: doc.replaced_at.map(|at| at.to_chrono()),
                replacement_upload_id: doc.replacement_upload_id,
            },
            kind: OutcomeKind::DocumentIssue,
        }
    }
}

impl IntoIndexes for RejectionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "application_id": 1, "document_type_id": 1, "attempt_number": 1 },
            Some(
                IndexOptions::builder()
                    .name("slot_attempt_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for RejectionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
