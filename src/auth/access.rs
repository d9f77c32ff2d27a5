//! Document access check
//!
//! A caller may read a document when they own the application it belongs to
//! or hold a privileged review role. Every call re-reads the stores; ownership
//! and roles can change between token issuance and byte serving.

use std::sync::Arc;

use tracing::debug;

use crate::auth::Caller;
use crate::model::{Application, ApplicationStatus, DocumentUpload};
use crate::store::{ApplicationStore, RoleDirectory, UploadStore};
use crate::types::{GateError, Result};

/// Resolved document together with its owning application
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub upload: DocumentUpload,
    pub application: Application,
}

pub struct AccessPolicy {
    uploads: Arc<dyn UploadStore>,
    applications: Arc<dyn ApplicationStore>,
    roles: Arc<dyn RoleDirectory>,
}

impl AccessPolicy {
    pub fn new(
        uploads: Arc<dyn UploadStore>,
        applications: Arc<dyn ApplicationStore>,
        roles: Arc<dyn RoleDirectory>,
    ) -> Self {
        Self {
            uploads,
            applications,
            roles,
        }
    }

    /// Look up a document and its application. Unknown → `NotFound`.
    pub async fn resolve(&self, document_id: &str) -> Result<DocumentContext> {
        let upload = self
            .uploads
            .get(document_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("document {}", document_id)))?;

        let application = self
            .applications
            .get(&upload.slot.application_id)
            .await?
            .ok_or_else(|| {
                GateError::NotFound(format!("application {}", upload.slot.application_id))
            })?;

        Ok(DocumentContext {
            upload,
            application,
        })
    }

    /// Subject id of the application owner for a document
    pub async fn owner_of(&self, document_id: &str) -> Result<String> {
        Ok(self.resolve(document_id).await?.application.owner_id)
    }

    /// Lifecycle status of the application a document belongs to
    pub async fn application_status(&self, document_id: &str) -> Result<ApplicationStatus> {
        Ok(self.resolve(document_id).await?.application.status)
    }

    /// Whether `caller` may access `document_id`
    pub async fn can_access(&self, caller: &Caller, document_id: &str) -> Result<bool> {
        let context = self.resolve(document_id).await?;
        Ok(Self::permits(caller, &context.application))
    }

    /// Load `application_id` for a caller who owns it or holds a review role.
    /// Unknown → `NotFound`; anyone else → `Unauthorized`.
    pub async fn authorize_application(
        &self,
        caller: &Caller,
        application_id: &str,
    ) -> Result<Application> {
        let application = self
            .applications
            .get(application_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("application {}", application_id)))?;
        if !Self::permits(caller, &application) {
            return Err(GateError::Unauthorized(format!(
                "{} does not own application {}",
                caller.subject_id, application.id
            )));
        }
        Ok(application)
    }

    /// Re-check for a bare subject id (the one embedded in a capability
    /// token), reading the subject's current role from the directory.
    pub async fn can_subject_access(&self, subject_id: &str, document_id: &str) -> Result<bool> {
        let role = self.roles.role_of(subject_id).await?;
        let caller = Caller::new(subject_id, role);
        self.can_access(&caller, document_id).await
    }

    fn permits(caller: &Caller, application: &Application) -> bool {
        let allowed = application.owner_id == caller.subject_id || caller.role.is_privileged();
        debug!(
            subject = %caller.subject_id,
            role = %caller.role,
            application = %application.id,
            allowed,
            "access check"
        );
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::model::{ApplicationStatus, ReviewStatus, SlotId};
    use crate::store::{MemoryApplicationStore, MemoryRoleDirectory, MemoryUploadStore};
    use chrono::Utc;

    async fn fixture() -> (AccessPolicy, Arc<MemoryRoleDirectory>) {
        let uploads = Arc::new(MemoryUploadStore::new());
        let applications = Arc::new(MemoryApplicationStore::new());
        let roles = Arc::new(MemoryRoleDirectory::new());

        applications.upsert(Application {
            id: "app-1".into(),
            owner_id: "alice".into(),
            status: ApplicationStatus::Submitted,
        });
        uploads
            .insert_superseding(DocumentUpload {
                id: "doc-1".into(),
                slot: SlotId::new("app-1", "id-card"),
                blob_ref: "blob-1".into(),
                original_filename: "card.jpg".into(),
                content_type: "image/jpeg".into(),
                uploaded_at: Utc::now(),
                uploaded_by: "alice".into(),
                review_status: ReviewStatus::Pending,
                superseded_by: None,
            })
            .await
            .unwrap();

        let policy = AccessPolicy::new(uploads, applications, roles.clone());
        (policy, roles)
    }

    #[tokio::test]
    async fn test_owner_and_reviewer_allowed() {
        let (policy, _) = fixture().await;

        let owner = Caller::new("alice", Role::Applicant);
        let reviewer = Caller::new("rita", Role::Reviewer);
        let stranger = Caller::new("mallory", Role::Applicant);

        assert!(policy.can_access(&owner, "doc-1").await.unwrap());
        assert!(policy.can_access(&reviewer, "doc-1").await.unwrap());
        assert!(!policy.can_access(&stranger, "doc-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_document_not_found() {
        let (policy, _) = fixture().await;
        let owner = Caller::new("alice", Role::Applicant);

        let err = policy.can_access(&owner, "doc-404").await.unwrap_err();
        assert!(matches!(err, GateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subject_recheck_reads_current_role() {
        let (policy, roles) = fixture().await;

        assert!(!policy.can_subject_access("rita", "doc-1").await.unwrap());
        roles.assign("rita", Role::Reviewer);
        assert!(policy.can_subject_access("rita", "doc-1").await.unwrap());
        roles.assign("rita", Role::Applicant);
        assert!(!policy.can_subject_access("rita", "doc-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_authorize_application() {
        let (policy, _) = fixture().await;

        let owner = Caller::new("alice", Role::Applicant);
        let admin = Caller::new("root", Role::Admin);
        let stranger = Caller::new("mallory", Role::Applicant);

        assert_eq!(
            policy.authorize_application(&owner, "app-1").await.unwrap().owner_id,
            "alice"
        );
        assert!(policy.authorize_application(&admin, "app-1").await.is_ok());
        assert!(matches!(
            policy.authorize_application(&stranger, "app-1").await,
            Err(GateError::Unauthorized(_))
        ));
        assert!(matches!(
            policy.authorize_application(&owner, "app-404").await,
            Err(GateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_of() {
        let (policy, _) = fixture().await;
        assert_eq!(policy.owner_of("doc-1").await.unwrap(), "alice");
        assert_eq!(
            policy.application_status("doc-1").await.unwrap(),
            ApplicationStatus::Submitted
        );
    }
}
