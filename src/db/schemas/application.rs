//! Application and subject-role documents
//!
//! Both collections are owned by the registration product; this service only
//! reads them.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{Application, ApplicationStatus};

pub const APPLICATION_COLLECTION: &str = "applications";
pub const SUBJECT_ROLE_COLLECTION: &str = "subject_roles";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ApplicationDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub application_id: String,

    pub owner_id: String,

    #[serde(default)]
    pub status: ApplicationStatus,
}

impl From<ApplicationDoc> for Application {
    fn from(doc: ApplicationDoc) -> Self {
        Application {
            id: doc.application_id,
            owner_id: doc.owner_id,
            status: doc.status,
        }
    }
}

impl IntoIndexes for ApplicationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "application_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("application_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "owner_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ApplicationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Reviewer and admin grants; subjects without a document are applicants
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SubjectRoleDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub subject_id: String,

    pub role: Role,
}

impl IntoIndexes for SubjectRoleDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "subject_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("subject_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for SubjectRoleDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
