//! MongoDB-backed stores
//!
//! The unresolved-per-slot invariant is enforced twice: a re-check right
//! before the insert, and the partial unique index on `document_referrals`
//! which turns a racing second insert into a duplicate-key error.

use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime, Document};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{
    ApplicationStore, LegacyOutcomeStore, OutcomeSource, OutcomeStore, RoleDirectory, UploadStore,
};
use crate::auth::Role;
use crate::db::schemas::{
    ApplicationDoc, ReferralDoc, RejectionDoc, SubjectRoleDoc, UploadDoc, APPLICATION_COLLECTION,
    REFERRAL_COLLECTION, REJECTION_COLLECTION, SUBJECT_ROLE_COLLECTION, UPLOAD_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::model::{Application, DocumentUpload, OutcomeRecord, ReviewStatus, SlotId};
use crate::types::{GateError, Result};

fn slot_filter(slot: &SlotId) -> Document {
    doc! {
        "application_id": slot.application_id.as_str(),
        "document_type_id": slot.document_type_id.as_str(),
    }
}

fn review_status_bson(status: ReviewStatus) -> Result<bson::Bson> {
    Ok(bson::to_bson(&status)?)
}

// =============================================================================
// Applications and roles
// =============================================================================

pub struct MongoApplicationStore {
    collection: MongoCollection<ApplicationDoc>,
}

impl MongoApplicationStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection(APPLICATION_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl ApplicationStore for MongoApplicationStore {
    async fn get(&self, application_id: &str) -> Result<Option<Application>> {
        Ok(self
            .collection
            .find_one(doc! { "application_id": application_id })
            .await?
            .map(Application::from))
    }

    async fn owned_by(&self, subject_id: &str) -> Result<Vec<Application>> {
        Ok(self
            .collection
            .find_many(doc! { "owner_id": subject_id })
            .await?
            .into_iter()
            .map(Application::from)
            .collect())
    }
}

pub struct MongoRoleDirectory {
    collection: MongoCollection<SubjectRoleDoc>,
}

impl MongoRoleDirectory {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection(SUBJECT_ROLE_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl RoleDirectory for MongoRoleDirectory {
    async fn role_of(&self, subject_id: &str) -> Result<Role> {
        Ok(self
            .collection
            .find_one(doc! { "subject_id": subject_id })
            .await?
            .map(|d| d.role)
            .unwrap_or_default())
    }
}

// =============================================================================
// Uploads
// =============================================================================

pub struct MongoUploadStore {
    collection: MongoCollection<UploadDoc>,
}

impl MongoUploadStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection(UPLOAD_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl UploadStore for MongoUploadStore {
    async fn get(&self, upload_id: &str) -> Result<Option<DocumentUpload>> {
        Ok(self
            .collection
            .find_one(doc! { "upload_id": upload_id })
            .await?
            .map(DocumentUpload::from))
    }

    async fn current_for(&self, slot: &SlotId) -> Result<Option<DocumentUpload>> {
        let mut filter = slot_filter(slot);
        filter.insert("superseded_by", doc! { "$exists": false });

        let mut current: Vec<DocumentUpload> = self
            .collection
            .find_many(filter)
            .await?
            .into_iter()
            .map(DocumentUpload::from)
            .collect();
        current.sort_by_key(|u| u.uploaded_at);
        Ok(current.pop())
    }

    async fn list_for(&self, slot: &SlotId) -> Result<Vec<DocumentUpload>> {
        let mut uploads: Vec<DocumentUpload> = self
            .collection
            .find_many(slot_filter(slot))
            .await?
            .into_iter()
            .map(DocumentUpload::from)
            .collect();
        uploads.sort_by_key(|u| u.uploaded_at);
        Ok(uploads)
    }

    async fn insert_superseding(&self, upload: DocumentUpload) -> Result<Option<String>> {
        let previous = self.current_for(&upload.slot).await?;
        let new_id = upload.id.clone();
        let slot = upload.slot.clone();

        self.collection.insert_one(UploadDoc::from(upload)).await?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        let mut filter = slot_filter(&slot);
        filter.insert("upload_id", previous.id.as_str());
        filter.insert("superseded_by", doc! { "$exists": false });

        let result = self
            .collection
            .update_one(filter, doc! { "$set": { "superseded_by": new_id.as_str() } })
            .await?;

        if result.modified_count == 0 {
            warn!(
                slot = %slot,
                previous = %previous.id,
                "previous upload was superseded concurrently"
            );
        }

        Ok(Some(previous.id))
    }

    async fn remove_superseding(&self, upload_id: &str) -> Result<()> {
        let Some(upload) = self.get(upload_id).await? else {
            return Ok(());
        };

        let mut superseded = slot_filter(&upload.slot);
        superseded.insert("superseded_by", upload_id);
        self.collection
            .update_many(superseded, doc! { "$unset": { "superseded_by": "" } })
            .await?;
        self.collection
            .delete_one(doc! { "upload_id": upload_id })
            .await?;

        debug!(slot = %upload.slot, upload = %upload_id, "upload insert undone");
        Ok(())
    }

    async fn transition(
        &self,
        upload_id: &str,
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> Result<bool> {
        let filter = doc! {
            "upload_id": upload_id,
            "review_status": review_status_bson(expected)?,
            "superseded_by": { "$exists": false },
        };
        let result = self
            .collection
            .update_one(
                filter,
                doc! { "$set": { "review_status": review_status_bson(status)? } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}

// =============================================================================
// Outcome records
// =============================================================================

/// Legacy rejections; read-only
pub struct MongoLegacyOutcomeStore {
    collection: MongoCollection<RejectionDoc>,
}

impl MongoLegacyOutcomeStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection(REJECTION_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl OutcomeSource for MongoLegacyOutcomeStore {
    async fn for_slot(&self, slot: &SlotId) -> Result<Vec<OutcomeRecord>> {
        Ok(self
            .collection
            .find_many(slot_filter(slot))
            .await?
            .into_iter()
            .map(OutcomeRecord::from)
            .collect())
    }

    async fn for_applications(&self, application_ids: &[String]) -> Result<Vec<OutcomeRecord>> {
        Ok(self
            .collection
            .find_many(doc! { "application_id": { "$in": application_ids.to_vec() } })
            .await?
            .into_iter()
            .map(OutcomeRecord::from)
            .collect())
    }
}

impl LegacyOutcomeStore for MongoLegacyOutcomeStore {}

/// Current referrals
pub struct MongoOutcomeStore {
    collection: MongoCollection<ReferralDoc>,
}

impl MongoOutcomeStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection(REFERRAL_COLLECTION).await?,
        })
    }

    fn decode(docs: Vec<ReferralDoc>) -> Result<Vec<OutcomeRecord>> {
        docs.into_iter().map(OutcomeRecord::try_from).collect()
    }
}

#[async_trait]
impl OutcomeSource for MongoOutcomeStore {
    async fn for_slot(&self, slot: &SlotId) -> Result<Vec<OutcomeRecord>> {
        Self::decode(self.collection.find_many(slot_filter(slot)).await?)
    }

    async fn for_applications(&self, application_ids: &[String]) -> Result<Vec<OutcomeRecord>> {
        Self::decode(
            self.collection
                .find_many(doc! { "application_id": { "$in": application_ids.to_vec() } })
                .await?,
        )
    }
}

#[async_trait]
impl OutcomeStore for MongoOutcomeStore {
    async fn insert_unresolved(&self, record: OutcomeRecord) -> Result<()> {
        let mut unresolved = slot_filter(&record.slot);
        unresolved.insert("was_replaced", false);

        // Re-verify right before committing; the partial unique index
        // catches anything that slips in between.
        let open = self.collection.count(unresolved).await?;
        if open > 0 {
            return Err(GateError::IntegrityViolation(format!(
                "slot {} already has {} unresolved outcome(s)",
                record.slot, open
            )));
        }

        debug!(
            slot = %record.slot,
            attempt = record.attempt_number,
            "inserting referral"
        );

        let mut doc = ReferralDoc::from_record(record, false);
        doc.was_replaced = false;
        doc.replaced_at = None;
        doc.replacement_upload_id = None;
        self.collection.insert_one(doc).await
    }

    async fn insert_promoted(&self, record: OutcomeRecord) -> Result<()> {
        self.collection
            .insert_one(ReferralDoc::from_record(record, true))
            .await
    }

    async fn mark_replaced(
        &self,
        record_id: &str,
        replaced_at: DateTime<Utc>,
        replacement_upload_id: &str,
    ) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "record_id": record_id, "was_replaced": false },
                doc! {
                    "$set": {
                        "was_replaced": true,
                        "replaced_at": BsonDateTime::from_chrono(replaced_at),
                        "replacement_upload_id": replacement_upload_id,
                    }
                },
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}
