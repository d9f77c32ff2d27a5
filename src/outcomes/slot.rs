//! Document slot state machine
//!
//! ```text
//! Uploaded(Pending) --verify--> Verified   (terminal)
//! Uploaded(Pending) --flag----> Referred   (one unresolved outcome)
//! Referred ---------new upload-> Uploaded(Pending), outcome marked replaced
//! ```
//!
//! Writes for one slot are serialized by an in-process lock; the current
//! outcome store additionally refuses a second unresolved record.
//!
//! Each transition touches two stores. The first write is undone when the
//! second fails, so a slot never shows an upload and an outcome that disagree.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::reconcile::{OutcomeCounts, RecordSource, Reconciler, SourcedRecord};
use crate::auth::{AccessPolicy, Caller};
use crate::clock::Clock;
use crate::logging::{AuditEventType, AuditLogger};
use crate::model::{
    Application, DocumentUpload, OutcomeDraft, OutcomeRecord, Replacement, ReviewStatus, SlotId,
};
use crate::store::{ApplicationStore, OutcomeStore, UploadStore};
use crate::types::{GateError, Result};

/// File metadata for a new upload; the bytes are already in the blob store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUpload {
    pub blob_ref: String,
    pub original_filename: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

/// Result of placing a new upload into a slot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub upload: DocumentUpload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_upload_id: Option<String>,
    /// Outcome record that this upload resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_outcome_id: Option<String>,
}

/// Per-slot write locks. An entry lives only while someone holds or waits
/// on it.
#[derive(Default)]
struct SlotLocks {
    locks: DashMap<SlotId, Arc<Mutex<()>>>,
}

impl SlotLocks {
    async fn lock(&self, slot: &SlotId) -> SlotGuard<'_> {
        let mutex = self.locks.entry(slot.clone()).or_default().clone();
        SlotGuard {
            locks: self,
            slot: slot.clone(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct SlotGuard<'a> {
    locks: &'a SlotLocks,
    slot: SlotId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map holds the only remaining handle when idle
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.slot, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct SlotService {
    applications: Arc<dyn ApplicationStore>,
    uploads: Arc<dyn UploadStore>,
    outcomes: Arc<dyn OutcomeStore>,
    reconciler: Arc<Reconciler>,
    policy: Arc<AccessPolicy>,
    clock: Arc<dyn Clock>,
    audit: AuditLogger,
    locks: SlotLocks,
}

impl SlotService {
    pub fn new(
        applications: Arc<dyn ApplicationStore>,
        uploads: Arc<dyn UploadStore>,
        outcomes: Arc<dyn OutcomeStore>,
        reconciler: Arc<Reconciler>,
        policy: Arc<AccessPolicy>,
        clock: Arc<dyn Clock>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            applications,
            uploads,
            outcomes,
            reconciler,
            policy,
            clock,
            audit,
            locks: SlotLocks::default(),
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Place a new upload into a slot, resolving the outstanding outcome if
    /// there is one.
    ///
    /// The upload is stored before the outcome is patched, so a record is
    /// never marked replaced by an upload that does not exist. If the patch
    /// fails the upload is removed again.
    pub async fn register_upload(
        &self,
        caller: &Caller,
        slot: &SlotId,
        upload: NewUpload,
    ) -> Result<UploadReceipt> {
        caller.require("register_upload")?;
        if upload.blob_ref.trim().is_empty() {
            return Err(GateError::BadRequest("blobRef is required".into()));
        }

        let application = self
            .policy
            .authorize_application(caller, &slot.application_id)
            .await?;
        ensure_open(&application)?;

        let _guard = self.locks.lock(slot).await;

        if let Some(current) = self.uploads.current_for(slot).await? {
            if current.review_status == ReviewStatus::Verified {
                return Err(GateError::TerminalStateViolation(format!(
                    "slot {} is verified; upload {} is final",
                    slot, current.id
                )));
            }
        }

        let unresolved = self.reconciler.unresolved_for(slot).await?;
        if unresolved.len() > 1 {
            return Err(corrupt_slot(slot, &unresolved));
        }

        let now = self.clock.now();
        let upload = DocumentUpload {
            id: Uuid::new_v4().to_string(),
            slot: slot.clone(),
            blob_ref: upload.blob_ref,
            original_filename: upload.original_filename,
            content_type: upload.content_type,
            uploaded_at: now,
            uploaded_by: caller.subject_id.clone(),
            review_status: ReviewStatus::Pending,
            superseded_by: None,
        };

        let superseded_upload_id = self.uploads.insert_superseding(upload.clone()).await?;

        let resolved_outcome_id = match unresolved.into_iter().next() {
            Some(open) => match self.mark_replaced(open, now, &upload.id).await {
                Ok(record_id) => Some(record_id),
                Err(e) => {
                    warn!(
                        slot = %slot,
                        upload = %upload.id,
                        error = %e,
                        "outcome patch failed, removing upload"
                    );
                    if let Err(undo) = self.uploads.remove_superseding(&upload.id).await {
                        error!(
                            slot = %slot,
                            upload = %upload.id,
                            error = %undo,
                            "could not remove upload after failed outcome patch"
                        );
                    }
                    return Err(e);
                }
            },
            None => None,
        };

        info!(
            slot = %slot,
            upload = %upload.id,
            superseded = superseded_upload_id.as_deref().unwrap_or("-"),
            resolved = resolved_outcome_id.as_deref().unwrap_or("-"),
            "upload registered"
        );
        self.audit
            .log(
                self.audit
                    .event(AuditEventType::UploadRegistered)
                    .at(now)
                    .with_caller(caller)
                    .with_slot(slot)
                    .with_document(&upload.id),
            )
            .await;

        Ok(UploadReceipt {
            upload,
            superseded_upload_id,
            resolved_outcome_id,
        })
    }

    /// Flag the slot's current upload. Creates exactly one unresolved record
    /// with the next attempt number and moves the upload to Referred.
    ///
    /// The upload moves to Referred first; if the record cannot be stored it
    /// goes back to Pending.
    pub async fn record_outcome(
        &self,
        caller: &Caller,
        slot: &SlotId,
        draft: OutcomeDraft,
    ) -> Result<OutcomeRecord> {
        caller.require("record_outcome")?;
        draft.validate()?;

        let application = self.application(&slot.application_id).await?;
        ensure_open(&application)?;

        let _guard = self.locks.lock(slot).await;

        let upload = self
            .uploads
            .current_for(slot)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("no current upload in slot {}", slot)))?;

        let unresolved = self.reconciler.unresolved_for(slot).await?;
        match unresolved.len() {
            0 => {}
            1 => {
                return Err(GateError::IntegrityViolation(format!(
                    "slot {} already has an unresolved outcome ({})",
                    slot, unresolved[0].record.id
                )))
            }
            _ => return Err(corrupt_slot(slot, &unresolved)),
        }

        match upload.review_status {
            ReviewStatus::Pending => {}
            ReviewStatus::Verified => {
                return Err(GateError::TerminalStateViolation(format!(
                    "slot {} is verified",
                    slot
                )))
            }
            ReviewStatus::Referred => {
                error!(
                    slot = %slot,
                    upload = %upload.id,
                    "upload is referred but has no open outcome"
                );
                return Err(GateError::IntegrityViolation(format!(
                    "upload {} is already referred",
                    upload.id
                )));
            }
        }

        let attempt_number = self.reconciler.latest_attempt(slot).await? + 1;

        let record = OutcomeRecord {
            id: Uuid::new_v4().to_string(),
            slot: slot.clone(),
            attempt_number,
            upload_id: upload.id.clone(),
            reviewer_id: caller.subject_id.clone(),
            category: draft.category,
            reason: draft.reason,
            specific_issues: draft.specific_issues,
            decided_at: self.clock.now(),
            replacement: Replacement::default(),
            kind: draft.kind,
        };

        if !self
            .uploads
            .transition(&upload.id, ReviewStatus::Pending, ReviewStatus::Referred)
            .await?
        {
            return Err(GateError::IntegrityViolation(format!(
                "upload {} changed state while being flagged",
                upload.id
            )));
        }

        if let Err(e) = self.outcomes.insert_unresolved(record.clone()).await {
            warn!(
                slot = %slot,
                upload = %upload.id,
                error = %e,
                "outcome insert failed, returning upload to pending"
            );
            match self
                .uploads
                .transition(&upload.id, ReviewStatus::Referred, ReviewStatus::Pending)
                .await
            {
                Ok(true) => {}
                Ok(false) => error!(
                    slot = %slot,
                    upload = %upload.id,
                    "upload left its referred state before it could be restored"
                ),
                Err(undo) => error!(
                    slot = %slot,
                    upload = %upload.id,
                    error = %undo,
                    "could not return upload to pending"
                ),
            }
            return Err(e);
        }

        info!(
            slot = %slot,
            record = %record.id,
            attempt = record.attempt_number,
            issue_type = %record.issue_type(),
            "outcome recorded"
        );
        self.audit
            .log(
                self.audit
                    .event(AuditEventType::OutcomeRecorded)
                    .at(record.decided_at)
                    .with_caller(caller)
                    .with_slot(slot)
                    .with_document(&upload.id)
                    .with_metadata(serde_json::json!({
                        "attempt": record.attempt_number,
                        "issueType": record.issue_type(),
                    })),
            )
            .await;

        Ok(record)
    }

    /// Accept the slot's current upload. The slot is terminal afterwards, so
    /// a slot with any open outcome is refused.
    pub async fn verify_upload(&self, caller: &Caller, slot: &SlotId) -> Result<DocumentUpload> {
        caller.require("verify_upload")?;

        let application = self.application(&slot.application_id).await?;
        ensure_open(&application)?;

        let _guard = self.locks.lock(slot).await;

        let mut upload = self
            .uploads
            .current_for(slot)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("no current upload in slot {}", slot)))?;

        match upload.review_status {
            ReviewStatus::Pending => {}
            ReviewStatus::Verified => {
                return Err(GateError::TerminalStateViolation(format!(
                    "slot {} is already verified",
                    slot
                )))
            }
            ReviewStatus::Referred => {
                return Err(GateError::TerminalStateViolation(format!(
                    "upload {} was referred; slot {} needs a new upload",
                    upload.id, slot
                )))
            }
        }

        let unresolved = self.reconciler.unresolved_for(slot).await?;
        if let Some(open) = unresolved.first() {
            warn!(
                slot = %slot,
                upload = %upload.id,
                record = %open.record.id,
                "refusing to verify a slot with an open outcome"
            );
            return Err(GateError::IntegrityViolation(format!(
                "slot {} has an open outcome ({})",
                slot, open.record.id
            )));
        }

        if !self
            .uploads
            .transition(&upload.id, ReviewStatus::Pending, ReviewStatus::Verified)
            .await?
        {
            return Err(GateError::TerminalStateViolation(format!(
                "upload {} changed state during verification",
                upload.id
            )));
        }
        upload.review_status = ReviewStatus::Verified;

        info!(slot = %slot, upload = %upload.id, "upload verified");
        self.audit
            .log(
                self.audit
                    .event(AuditEventType::UploadVerified)
                    .at(self.clock.now())
                    .with_caller(caller)
                    .with_slot(slot)
                    .with_document(&upload.id),
            )
            .await;

        Ok(upload)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Outcome history for a slot, newest first, with the store each record
    /// came from
    pub async fn history(&self, caller: &Caller, slot: &SlotId) -> Result<Vec<SourcedRecord>> {
        caller.require("view_history")?;
        self.policy
            .authorize_application(caller, &slot.application_id)
            .await?;
        self.reconciler.history_for(slot).await
    }

    /// Uploads in a slot, oldest first
    pub async fn uploads(&self, caller: &Caller, slot: &SlotId) -> Result<Vec<DocumentUpload>> {
        caller.require("view_history")?;
        self.policy
            .authorize_application(caller, &slot.application_id)
            .await?;
        self.uploads.list_for(slot).await
    }

    /// Counts over the given applications, or the caller's own when none are
    /// named. Only reviewers may name applications they do not own.
    pub async fn counts(
        &self,
        caller: &Caller,
        application_ids: Option<Vec<String>>,
    ) -> Result<OutcomeCounts> {
        caller.require("view_own_counts")?;

        let ids = match application_ids {
            Some(ids) if !ids.is_empty() => {
                if !caller.role.is_privileged() {
                    let owned: Vec<String> = self
                        .applications
                        .owned_by(&caller.subject_id)
                        .await?
                        .into_iter()
                        .map(|a| a.id)
                        .collect();
                    if let Some(foreign) = ids.iter().find(|id| !owned.contains(id)) {
                        caller.require("view_any_counts").map_err(|_| {
                            GateError::Unauthorized(format!(
                                "{} does not own application {}",
                                caller.subject_id, foreign
                            ))
                        })?;
                    }
                }
                ids
            }
            _ => self
                .applications
                .owned_by(&caller.subject_id)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect(),
        };

        self.reconciler.counts_for(&ids).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn application(&self, application_id: &str) -> Result<Application> {
        self.applications
            .get(application_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("application {}", application_id)))
    }

    /// Patch the single open record. Legacy records are copied into the
    /// current store with the replacement set rather than edited in place.
    async fn mark_replaced(
        &self,
        open: SourcedRecord,
        now: DateTime<Utc>,
        upload_id: &str,
    ) -> Result<String> {
        let record_id = open.record.id.clone();
        match open.source {
            RecordSource::Current => {
                if !self.outcomes.mark_replaced(&record_id, now, upload_id).await? {
                    error!(
                        record = %record_id,
                        "outcome was already replaced by a concurrent upload"
                    );
                    return Err(GateError::IntegrityViolation(format!(
                        "outcome {} was already replaced",
                        record_id
                    )));
                }
            }
            RecordSource::Legacy => {
                let promoted = OutcomeRecord {
                    replacement: Replacement::replaced(now, upload_id),
                    ..open.record
                };
                self.outcomes.insert_promoted(promoted).await?;
                info!(record = %record_id, "legacy outcome promoted on replacement");
            }
        }
        Ok(record_id)
    }
}

fn ensure_open(application: &Application) -> Result<()> {
    if application.status.is_frozen() {
        return Err(GateError::TerminalStateViolation(format!(
            "application {} is {:?}",
            application.id, application.status
        )));
    }
    Ok(())
}

fn corrupt_slot(slot: &SlotId, unresolved: &[SourcedRecord]) -> GateError {
    let ids: Vec<&str> = unresolved.iter().map(|s| s.record.id.as_str()).collect();
    error!(
        slot = %slot,
        unresolved = ?ids,
        "slot holds more than one unresolved outcome"
    );
    GateError::IntegrityViolation(format!(
        "slot {} holds {} unresolved outcomes",
        slot,
        unresolved.len()
    ))
}
