//! Storage seams
//!
//! Every collaborator store is an `async_trait` so the MongoDB implementations
//! used in production and the in-memory ones used in dev mode and tests are
//! interchangeable.
//!
//! The legacy outcome store is read-only: nothing in this crate writes
//! rejection records, and only the reconciliation layer reads them.

pub mod memory;
pub mod mongo;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::Role;
use crate::db::MongoClient;
use crate::model::{Application, DocumentUpload, OutcomeRecord, ReviewStatus, SlotId};
use crate::types::Result;

pub use memory::{
    MemoryApplicationStore, MemoryLegacyOutcomeStore, MemoryOutcomeStore, MemoryRoleDirectory,
    MemoryUploadStore,
};
pub use mongo::{
    MongoApplicationStore, MongoLegacyOutcomeStore, MongoOutcomeStore, MongoRoleDirectory,
    MongoUploadStore,
};

/// Application ownership and status
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn get(&self, application_id: &str) -> Result<Option<Application>>;

    /// Applications owned by a subject
    async fn owned_by(&self, subject_id: &str) -> Result<Vec<Application>>;
}

/// Current roles for subjects, re-read at byte-serving time
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Unknown subjects are applicants
    async fn role_of(&self, subject_id: &str) -> Result<Role>;
}

/// Document uploads, one current per slot
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn get(&self, upload_id: &str) -> Result<Option<DocumentUpload>>;

    async fn current_for(&self, slot: &SlotId) -> Result<Option<DocumentUpload>>;

    /// All uploads for a slot, oldest first
    async fn list_for(&self, slot: &SlotId) -> Result<Vec<DocumentUpload>>;

    /// Insert a new current upload and mark the previous current one as
    /// superseded by it. Returns the superseded upload id, if any.
    async fn insert_superseding(&self, upload: DocumentUpload) -> Result<Option<String>>;

    /// Undo `insert_superseding`: delete the upload and make the one it
    /// superseded current again.
    async fn remove_superseding(&self, upload_id: &str) -> Result<()>;

    /// Move an upload from `expected` to `status`. Returns false when the
    /// upload was not in `expected` (or is no longer current).
    async fn transition(
        &self,
        upload_id: &str,
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> Result<bool>;
}

/// Read access shared by both outcome stores
#[async_trait]
pub trait OutcomeSource: Send + Sync {
    async fn for_slot(&self, slot: &SlotId) -> Result<Vec<OutcomeRecord>>;

    async fn for_applications(&self, application_ids: &[String]) -> Result<Vec<OutcomeRecord>>;
}

/// Rejection records under the original schema
pub trait LegacyOutcomeStore: OutcomeSource {}

/// Referral records under the expanded schema; the only outcome store written to
#[async_trait]
pub trait OutcomeStore: OutcomeSource {
    /// Insert a new unresolved record.
    ///
    /// Fails with `IntegrityViolation` if the slot already holds an unresolved
    /// record in this store or the attempt number is taken. The check and the
    /// insert happen as one conditional write.
    async fn insert_unresolved(&self, record: OutcomeRecord) -> Result<()>;

    /// Insert a full current-shape copy of a legacy record that is being
    /// marked replaced. Fails with `IntegrityViolation` if the key is taken.
    async fn insert_promoted(&self, record: OutcomeRecord) -> Result<()>;

    /// Set the replacement fields on an unresolved record. Returns false if
    /// the record was already replaced (or does not exist).
    async fn mark_replaced(
        &self,
        record_id: &str,
        replaced_at: DateTime<Utc>,
        replacement_upload_id: &str,
    ) -> Result<bool>;
}

/// Every store the service needs, behind its trait
#[derive(Clone)]
pub struct Stores {
    pub applications: Arc<dyn ApplicationStore>,
    pub roles: Arc<dyn RoleDirectory>,
    pub uploads: Arc<dyn UploadStore>,
    pub legacy_outcomes: Arc<dyn LegacyOutcomeStore>,
    pub outcomes: Arc<dyn OutcomeStore>,
}

impl Stores {
    /// MongoDB-backed stores; creates collection indexes on the way
    pub async fn mongo(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            applications: Arc::new(MongoApplicationStore::new(mongo).await?),
            roles: Arc::new(MongoRoleDirectory::new(mongo).await?),
            uploads: Arc::new(MongoUploadStore::new(mongo).await?),
            legacy_outcomes: Arc::new(MongoLegacyOutcomeStore::new(mongo).await?),
            outcomes: Arc::new(MongoOutcomeStore::new(mongo).await?),
        })
    }
}

/// In-memory stores with concrete handles kept for seeding
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub applications: Arc<MemoryApplicationStore>,
    pub roles: Arc<MemoryRoleDirectory>,
    pub uploads: Arc<MemoryUploadStore>,
    pub legacy_outcomes: Arc<MemoryLegacyOutcomeStore>,
    pub outcomes: Arc<MemoryOutcomeStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> Stores {
        Stores {
            applications: self.applications.clone(),
            roles: self.roles.clone(),
            uploads: self.uploads.clone(),
            legacy_outcomes: self.legacy_outcomes.clone(),
            outcomes: self.outcomes.clone(),
        }
    }
}
