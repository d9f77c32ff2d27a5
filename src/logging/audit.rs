//! Audit trail for document access and slot decisions
//!
//! Events are written as JSONL. Writing is best effort: a failing sink is
//! logged and the caller carries on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::auth::{Caller, Role};
use crate::model::SlotId;

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Capability URL handed out
    AccessTokenIssued,
    /// Capability URL refused at the file endpoint
    AccessTokenRejected,
    /// Bytes served for a capability URL
    DocumentServed,
    /// New upload placed into a slot
    UploadRegistered,
    /// Reviewer flagged an upload
    OutcomeRecorded,
    /// Reviewer accepted an upload
    UploadVerified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Node that handled the request
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, node_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            node_id,
            subject_id: None,
            role: None,
            document_id: None,
            slot: None,
            metadata: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_caller(mut self, caller: &Caller) -> Self {
        self.subject_id = Some(caller.subject_id.clone());
        self.role = Some(caller.role);
        self
    }

    pub fn with_subject(mut self, subject_id: &str) -> Self {
        self.subject_id = Some(subject_id.to_string());
        self
    }

    pub fn with_document(mut self, document_id: &str) -> Self {
        self.document_id = Some(document_id.to_string());
        self
    }

    pub fn with_slot(mut self, slot: &SlotId) -> Self {
        self.slot = Some(slot.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Audit logger that appends events to a JSONL file
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
    node_id: String,
}

struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    written: u64,
}

impl AuditLogger {
    /// Logger with no sink; events only reach `tracing`
    pub fn new(node_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditLoggerInner {
                writer: None,
                path: None,
                written: 0,
            })),
            node_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Audit logging initialized to {}", path.display());
        Ok(())
    }

    /// Start an event stamped with this node's id
    pub fn event(&self, event_type: AuditEventType) -> AuditEvent {
        AuditEvent::new(event_type, self.node_id.clone())
    }

    /// Record an event. Never fails.
    pub async fn log(&self, event: AuditEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        info!(
            target: "evidence_gate::audit",
            event = ?event.event_type,
            subject = event.subject_id.as_deref().unwrap_or("-"),
            document = event.document_id.as_deref().unwrap_or("-"),
            slot = event.slot.as_deref().unwrap_or("-"),
            "audit"
        );

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write audit event: {}", e);
                return;
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush audit log: {}", e);
                return;
            }
            inner.written += 1;
        }
    }

    /// Events successfully written to the file sink
    pub async fn written(&self) -> u64 {
        self.inner.lock().await.written
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}
