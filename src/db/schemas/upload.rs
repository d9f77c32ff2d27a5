//! Document upload schema

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{DocumentUpload, ReviewStatus, SlotId};

pub const UPLOAD_COLLECTION: &str = "document_uploads";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UploadDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub upload_id: String,

    pub application_id: String,

    pub document_type_id: String,

    /// Reference into the blob store
    pub blob_ref: String,

    pub original_filename: String,

    pub content_type: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub uploaded_at: DateTime<Utc>,

    pub uploaded_by: String,

    #[serde(default)]
    pub review_status: ReviewStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl From<UploadDoc> for DocumentUpload {
    fn from(doc: UploadDoc) -> Self {
        DocumentUpload {
            id: doc.upload_id,
            slot: SlotId::new(doc.application_id, doc.document_type_id),
            blob_ref: doc.blob_ref,
            original_filename: doc.original_filename,
            content_type: doc.content_type,
            uploaded_at: doc.uploaded_at,
            uploaded_by: doc.uploaded_by,
            review_status: doc.review_status,
            superseded_by: doc.superseded_by,
        }
    }
}

impl From<DocumentUpload> for UploadDoc {
    fn from(upload: DocumentUpload) -> Self {
        UploadDoc {
            _id: None,
            metadata: Metadata::new(),
            upload_id: upload.id,
            application_id: upload.slot.application_id,
            document_type_id: upload.slot.document_type_id,
            blob_ref: upload.blob_ref,
            original_filename: upload.original_filename,
            content_type: upload.content_type,
            uploaded_at: upload.uploaded_at,
            uploaded_by: upload.uploaded_by,
            review_status: upload.review_status,
            superseded_by: upload.superseded_by,
        }
    }
}

impl IntoIndexes for UploadDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "upload_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("upload_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "application_id": 1, "document_type_id": 1, "uploaded_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("slot_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UploadDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
