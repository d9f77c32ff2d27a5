//! In-memory stores for dev mode and tests
//!
//! Slot-scoped writes go through `DashMap::entry`, which holds the shard lock
//! for the whole read-check-write, so concurrent writers on one slot are
//! serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    ApplicationStore, LegacyOutcomeStore, OutcomeSource, OutcomeStore, RoleDirectory, UploadStore,
};
use crate::auth::Role;
use crate::model::{
    Application, ApplicationStatus, DocumentUpload, OutcomeRecord, Replacement, ReviewStatus,
    SlotId,
};
use crate::types::{GateError, Result};

// =============================================================================
// Applications and roles
// =============================================================================

#[derive(Default)]
pub struct MemoryApplicationStore {
    applications: DashMap<String, Application>,
}

impl MemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, application: Application) {
        self.applications
            .insert(application.id.clone(), application);
    }

    pub fn set_status(&self, application_id: &str, status: ApplicationStatus) -> bool {
        match self.applications.get_mut(application_id) {
            Some(mut app) => {
                app.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ApplicationStore for MemoryApplicationStore {
    async fn get(&self, application_id: &str) -> Result<Option<Application>> {
        Ok(self.applications.get(application_id).map(|a| a.clone()))
    }

    async fn owned_by(&self, subject_id: &str) -> Result<Vec<Application>> {
        let mut owned: Vec<Application> = self
            .applications
            .iter()
            .filter(|entry| entry.owner_id == subject_id)
            .map(|entry| entry.value().clone())
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(owned)
    }
}

#[derive(Default)]
pub struct MemoryRoleDirectory {
    roles: DashMap<String, Role>,
}

impl MemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, subject_id: &str, role: Role) {
        self.roles.insert(subject_id.to_string(), role);
    }
}

#[async_trait]
impl RoleDirectory for MemoryRoleDirectory {
    async fn role_of(&self, subject_id: &str) -> Result<Role> {
        Ok(self
            .roles
            .get(subject_id)
            .map(|r| *r)
            .unwrap_or_default())
    }
}

// =============================================================================
// Uploads
// =============================================================================

#[derive(Default)]
pub struct MemoryUploadStore {
    /// Uploads per slot, oldest first
    by_slot: DashMap<SlotId, Vec<DocumentUpload>>,
    /// upload id -> slot
    index: DashMap<String, SlotId>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn get(&self, upload_id: &str) -> Result<Option<DocumentUpload>> {
        let Some(slot) = self.index.get(upload_id).map(|s| s.clone()) else {
            return Ok(None);
        };
        Ok(self
            .by_slot
            .get(&slot)
            .and_then(|uploads| uploads.iter().find(|u| u.id == upload_id).cloned()))
    }

    async fn current_for(&self, slot: &SlotId) -> Result<Option<DocumentUpload>> {
        Ok(self
            .by_slot
            .get(slot)
            .and_then(|uploads| uploads.iter().rev().find(|u| u.is_current()).cloned()))
    }

    async fn list_for(&self, slot: &SlotId) -> Result<Vec<DocumentUpload>> {
        Ok(self
            .by_slot
            .get(slot)
            .map(|uploads| uploads.clone())
            .unwrap_or_default())
    }

    async fn insert_superseding(&self, upload: DocumentUpload) -> Result<Option<String>> {
        if self.index.contains_key(&upload.id) {
            return Err(GateError::IntegrityViolation(format!(
                "upload {} already exists",
                upload.id
            )));
        }

        let mut uploads = self.by_slot.entry(upload.slot.clone()).or_default();
        let mut superseded = None;
        for previous in uploads.iter_mut().filter(|u| u.is_current()) {
            previous.superseded_by = Some(upload.id.clone());
            superseded = Some(previous.id.clone());
        }
        self.index.insert(upload.id.clone(), upload.slot.clone());
        uploads.push(upload);

        Ok(superseded)
    }

    async fn remove_superseding(&self, upload_id: &str) -> Result<()> {
        let Some((_, slot)) = self.index.remove(upload_id) else {
            return Ok(());
        };
        if let Some(mut uploads) = self.by_slot.get_mut(&slot) {
            uploads.retain(|u| u.id != upload_id);
            for previous in uploads
                .iter_mut()
                .filter(|u| u.superseded_by.as_deref() == Some(upload_id))
            {
                previous.superseded_by = None;
            }
        }
        Ok(())
    }

    async fn transition(
        &self,
        upload_id: &str,
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> Result<bool> {
        let Some(slot) = self.index.get(upload_id).map(|s| s.clone()) else {
            return Ok(false);
        };
        let Some(mut uploads) = self.by_slot.get_mut(&slot) else {
            return Ok(false);
        };
        match uploads
            .iter_mut()
            .find(|u| u.id == upload_id && u.is_current() && u.review_status == expected)
        {
            Some(upload) => {
                upload.review_status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// =============================================================================
// Outcome records
// =============================================================================

/// Shared slot-keyed record table
#[derive(Default)]
struct OutcomeTable {
    by_slot: DashMap<SlotId, Vec<OutcomeRecord>>,
}

impl OutcomeTable {
    fn for_slot(&self, slot: &SlotId) -> Vec<OutcomeRecord> {
        self.by_slot
            .get(slot)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn for_applications(&self, application_ids: &[String]) -> Vec<OutcomeRecord> {
        self.by_slot
            .iter()
            .filter(|entry| application_ids.contains(&entry.key().application_id))
            .flat_map(|entry| entry.value().clone())
            .collect()
    }
}

/// Legacy rejection records; seeded directly, never written by the service
#[derive(Default)]
pub struct MemoryLegacyOutcomeStore {
    table: OutcomeTable,
}

impl MemoryLegacyOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a historical record (fixtures and migration snapshots)
    pub fn seed(&self, record: OutcomeRecord) {
        self.table
            .by_slot
            .entry(record.slot.clone())
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl OutcomeSource for MemoryLegacyOutcomeStore {
    async fn for_slot(&self, slot: &SlotId) -> Result<Vec<OutcomeRecord>> {
        Ok(self.table.for_slot(slot))
    }

    async fn for_applications(&self, application_ids: &[String]) -> Result<Vec<OutcomeRecord>> {
        Ok(self.table.for_applications(application_ids))
    }
}

impl LegacyOutcomeStore for MemoryLegacyOutcomeStore {}

/// Current referral records
#[derive(Default)]
pub struct MemoryOutcomeStore {
    table: OutcomeTable,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutcomeSource for MemoryOutcomeStore {
    async fn for_slot(&self, slot: &SlotId) -> Result<Vec<OutcomeRecord>> {
        Ok(self.table.for_slot(slot))
    }

    async fn for_applications(&self, application_ids: &[String]) -> Result<Vec<OutcomeRecord>> {
        Ok(self.table.for_applications(application_ids))
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn insert_unresolved(&self, record: OutcomeRecord) -> Result<()> {
        let mut records = self.table.by_slot.entry(record.slot.clone()).or_default();

        if let Some(open) = records.iter().find(|r| r.is_unresolved()) {
            return Err(GateError::IntegrityViolation(format!(
                "slot {} already has unresolved outcome {} (attempt {})",
                record.slot, open.id, open.attempt_number
            )));
        }
        if records
            .iter()
            .any(|r| r.attempt_number == record.attempt_number)
        {
            return Err(GateError::IntegrityViolation(format!(
                "slot {} already has attempt {}",
                record.slot, record.attempt_number
            )));
        }

        records.push(OutcomeRecord {
            replacement: Replacement::default(),
            ..record
        });
        Ok(())
    }

    async fn insert_promoted(&self, record: OutcomeRecord) -> Result<()> {
        let mut records = self.table.by_slot.entry(record.slot.clone()).or_default();

        if records
            .iter()
            .any(|r| r.attempt_number == record.attempt_number)
        {
            return Err(GateError::IntegrityViolation(format!(
                "slot {} already has attempt {} in the current store",
                record.slot, record.attempt_number
            )));
        }

        records.push(record);
        Ok(())
    }

    async fn mark_replaced(
        &self,
        record_id: &str,
        replaced_at: DateTime<Utc>,
        replacement_upload_id: &str,
    ) -> Result<bool> {
        for mut entry in self.table.by_slot.iter_mut() {
            if let Some(record) = entry.value_mut().iter_mut().find(|r| r.id == record_id) {
                if record.replacement.was_replaced {
                    return Ok(false);
                }
                record.replacement = Replacement::replaced(replaced_at, replacement_upload_id);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
