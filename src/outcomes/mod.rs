//! Outcome records and the slot state machine
//!
//! - `reconcile`: merged reads over the legacy and current outcome stores
//! - `slot`: upload, flag and verify transitions for one document slot

pub mod reconcile;
pub mod slot;

pub use reconcile::{OutcomeCounts, RecordSource, Reconciler, SourcedRecord};
pub use slot::{NewUpload, SlotService, UploadReceipt};
