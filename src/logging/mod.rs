//! Logging infrastructure for evidence-gate
//!
//! Operational logs go through `tracing`. Security-relevant decisions are also
//! appended to a JSONL audit trail.

pub mod audit;

pub use audit::{AuditEvent, AuditEventType, AuditLogger};
