//! Reconciliation over the legacy and current outcome stores
//!
//! Every read consults both stores and merges on `(slot, attempt_number)`.
//! A current-store record replaces a legacy one with the same key as a whole;
//! fields are never mixed across sources. Nothing outside this module reads
//! the legacy store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::model::{IssueType, OutcomeKey, OutcomeRecord, SlotId};
use crate::store::{LegacyOutcomeStore, OutcomeStore};
use crate::types::Result;

/// Which store a merged record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Legacy,
    Current,
}

/// A merged record and the store it came from. `source` is informational.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcedRecord {
    pub source: RecordSource,
    #[serde(flatten)]
    pub record: OutcomeRecord,
}

/// Aggregate figures over a set of applications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub total: usize,
    /// Records still waiting on a new upload
    pub pending_resubmission: usize,
    pub by_type: BTreeMap<IssueType, usize>,
}

pub struct Reconciler {
    legacy: Arc<dyn LegacyOutcomeStore>,
    current: Arc<dyn OutcomeStore>,
}

impl Reconciler {
    pub fn new(legacy: Arc<dyn LegacyOutcomeStore>, current: Arc<dyn OutcomeStore>) -> Self {
        Self { legacy, current }
    }

    /// Merged records for a slot, newest first
    pub async fn history_for(&self, slot: &SlotId) -> Result<Vec<SourcedRecord>> {
        let (legacy, current) =
            tokio::try_join!(self.legacy.for_slot(slot), self.current.for_slot(slot))?;
        Ok(newest_first(merge(legacy, current)))
    }

    /// Unresolved records for a slot after merging. More than one means the
    /// slot is corrupt.
    pub async fn unresolved_for(&self, slot: &SlotId) -> Result<Vec<SourcedRecord>> {
        Ok(self
            .history_for(slot)
            .await?
            .into_iter()
            .filter(|s| s.record.is_unresolved())
            .collect())
    }

    /// Highest attempt number seen in either store, 0 if none
    pub async fn latest_attempt(&self, slot: &SlotId) -> Result<u32> {
        Ok(self
            .history_for(slot)
            .await?
            .iter()
            .map(|s| s.record.attempt_number)
            .max()
            .unwrap_or(0))
    }

    pub async fn counts_for(&self, application_ids: &[String]) -> Result<OutcomeCounts> {
        if application_ids.is_empty() {
            return Ok(OutcomeCounts::default());
        }

        // Dedupe ids so a repeated filter cannot double count
        let ids: Vec<String> = application_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .cloned()
            .collect();

        let (legacy, current) = tokio::try_join!(
            self.legacy.for_applications(&ids),
            self.current.for_applications(&ids)
        )?;
        let legacy_len = legacy.len();
        let current_len = current.len();

        let merged = merge(legacy, current);
        debug!(
            applications = ids.len(),
            legacy = legacy_len,
            current = current_len,
            merged = merged.len(),
            "outcome counts reconciled"
        );

        let mut counts = OutcomeCounts::default();
        for sourced in merged {
            counts.total += 1;
            if sourced.record.is_unresolved() {
                counts.pending_resubmission += 1;
            }
            *counts.by_type.entry(sourced.record.issue_type()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Key both sources; current entries overwrite legacy ones.
fn merge(legacy: Vec<OutcomeRecord>, current: Vec<OutcomeRecord>) -> Vec<SourcedRecord> {
    let mut merged: BTreeMap<OutcomeKey, SourcedRecord> = BTreeMap::new();

    for record in legacy {
        merged.insert(
            record.key(),
            SourcedRecord {
                source: RecordSource::Legacy,
                record,
            },
        );
    }
    for record in current {
        merged.insert(
            record.key(),
            SourcedRecord {
                source: RecordSource::Current,
                record,
            },
        );
    }

    merged.into_values().collect()
}

fn newest_first(mut records: Vec<SourcedRecord>) -> Vec<SourcedRecord> {
    records.sort_by(|a, b| {
        b.record
            .decided_at
            .cmp(&a.record.decided_at)
            .then(b.record.attempt_number.cmp(&a.record.attempt_number))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MedicalReferral, OutcomeKind, Replacement};
    use crate::store::{MemoryLegacyOutcomeStore, MemoryOutcomeStore};
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: &str, slot: &SlotId, attempt: u32, kind: OutcomeKind) -> OutcomeRecord {
        OutcomeRecord {
            id: id.into(),
            slot: slot.clone(),
            attempt_number: attempt,
            upload_id: format!("upload-{}", attempt),
            reviewer_id: "rita".into(),
            category: "quality".into(),
            reason: format!("reason {}", id),
            specific_issues: vec![],
            decided_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + Duration::hours(attempt as i64),
            replacement: Replacement::default(),
            kind,
        }
    }

    fn referral() -> OutcomeKind {
        OutcomeKind::MedicalReferral(MedicalReferral {
            doctor_name: "Dr. X".into(),
            clinic_name: "City Clinic".into(),
            clinic_address: None,
            finding: "follow-up".into(),
        })
    }

    fn replaced(mut r: OutcomeRecord) -> OutcomeRecord {
        r.replacement = Replacement::replaced(r.decided_at + Duration::minutes(5), "next");
        r
    }

    fn reconciler() -> (Reconciler, Arc<MemoryLegacyOutcomeStore>, Arc<MemoryOutcomeStore>) {
        let legacy = Arc::new(MemoryLegacyOutcomeStore::new());
        let current = Arc::new(MemoryOutcomeStore::new());
        (
            Reconciler::new(legacy.clone(), current.clone()),
            legacy,
            current,
        )
    }

    #[tokio::test]
    async fn test_history_newest_first_across_stores() {
        let (reconciler, legacy, current) = reconciler();
        let slot = SlotId::new("app-1", "chest-xray");

        legacy.seed(replaced(record("l1", &slot, 1, OutcomeKind::DocumentIssue)));
        legacy.seed(replaced(record("l2", &slot, 2, OutcomeKind::DocumentIssue)));
        current
            .insert_unresolved(record("c3", &slot, 3, referral()))
            .await
            .unwrap();

        let history = reconciler.history_for(&slot).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|s| s.record.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "l2", "l1"]);
        assert_eq!(reconciler.latest_attempt(&slot).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_current_wins_on_shared_key() {
        let (reconciler, legacy, current) = reconciler();
        let slot = SlotId::new("app-1", "chest-xray");

        legacy.seed(record("legacy-1", &slot, 1, OutcomeKind::DocumentIssue));
        current
            .insert_promoted(replaced(record("current-1", &slot, 1, OutcomeKind::DocumentIssue)))
            .await
            .unwrap();

        let history = reconciler.history_for(&slot).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, RecordSource::Current);
        assert_eq!(history[0].record.id, "current-1");
        assert!(reconciler.unresolved_for(&slot).await.unwrap().is_empty());

        let json = serde_json::to_value(&history[0]).unwrap();
        assert_eq!(json["source"], "current");
        assert_eq!(json["id"], "current-1");
        assert_eq!(json["wasReplaced"], true);
    }

    #[tokio::test]
    async fn test_counts_over_mixed_sources() {
        let (reconciler, legacy, current) = reconciler();
        let xray = SlotId::new("app-1", "chest-xray");
        let passport = SlotId::new("app-1", "passport");
        let other = SlotId::new("app-2", "passport");

        // Shared key: legacy unresolved, current replaced. Counted once, resolved.
        legacy.seed(record("l-x1", &xray, 1, OutcomeKind::DocumentIssue));
        current
            .insert_promoted(replaced(record("c-x1", &xray, 1, OutcomeKind::DocumentIssue)))
            .await
            .unwrap();
        // Current only, unresolved referral
        current
            .insert_unresolved(record("c-x2", &xray, 2, referral()))
            .await
            .unwrap();
        // Legacy only, resolved
        legacy.seed(replaced(record("l-p1", &passport, 1, OutcomeKind::DocumentIssue)));
        // Outside the filter
        legacy.seed(record("l-o1", &other, 1, OutcomeKind::DocumentIssue));

        let counts = reconciler
            .counts_for(&["app-1".to_string(), "app-1".to_string()])
            .await
            .unwrap();

        assert_eq!(counts.total, 3);
        assert_eq!(counts.pending_resubmission, 1);
        assert_eq!(counts.by_type.get(&IssueType::DocumentIssue), Some(&2));
        assert_eq!(counts.by_type.get(&IssueType::MedicalReferral), Some(&1));
    }

    #[tokio::test]
    async fn test_counts_empty_filter() {
        let (reconciler, legacy, _) = reconciler();
        legacy.seed(record("l1", &SlotId::new("app-1", "x"), 1, OutcomeKind::DocumentIssue));
        assert_eq!(
            reconciler.counts_for(&[]).await.unwrap(),
            OutcomeCounts::default()
        );
    }

    #[test]
    fn test_counts_json_shape() {
        let mut counts = OutcomeCounts {
            total: 2,
            pending_resubmission: 1,
            by_type: BTreeMap::new(),
        };
        counts.by_type.insert(IssueType::MedicalReferral, 2);

        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json["pendingResubmission"], 1);
        assert_eq!(json["byType"]["medical_referral"], 2);
    }
}
