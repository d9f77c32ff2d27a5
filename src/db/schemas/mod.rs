//! Database schemas
//!
//! MongoDB document structures for applications, uploads and both outcome
//! collections (legacy rejections and current referrals).

mod application;
mod metadata;
mod referral;
mod rejection;
mod upload;

pub use application::{
    ApplicationDoc, SubjectRoleDoc, APPLICATION_COLLECTION, SUBJECT_ROLE_COLLECTION,
};
pub use metadata::Metadata;
pub use referral::{ReferralDoc, REFERRAL_COLLECTION};
pub use rejection::{RejectionDoc, REJECTION_COLLECTION};
pub use upload::{UploadDoc, UPLOAD_COLLECTION};
