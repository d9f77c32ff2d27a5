//! Capability URL issuance and validation
//!
//! A signed reference looks like
//! `{documentId}?exp={epochMillis}&sub={subjectId}&sig={signature}` and is
//! served under `{public_url}/files/`. Nothing is stored server-side; the
//! signature over `documentId.exp.sub` is the whole grant.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::signer::{canonical_payload, sign, verify, SigningKey, PAYLOAD_SEPARATOR};
use crate::auth::access::DocumentContext;
use crate::auth::{AccessPolicy, Caller};
use crate::clock::Clock;
use crate::logging::{AuditEventType, AuditLogger};
use crate::types::{GateError, Result};

/// Route prefix that serves signed references
pub const FILES_PREFIX: &str = "/files/";

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const MIN_TTL: Duration = Duration::from_secs(60);
pub const MAX_TTL: Duration = Duration::from_secs(3600);

/// Query half of a signed reference
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReferenceQuery {
    exp: i64,
    sub: String,
    sig: String,
}

/// A freshly issued capability URL
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub url: String,
    #[serde(skip)]
    pub signed_reference: String,
    pub expires_at: DateTime<Utc>,
}

/// What a valid reference grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub document_id: String,
    pub subject_id: String,
    pub expires_at_millis: i64,
}

pub struct TokenService {
    key: SigningKey,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    public_url: String,
    policy: Arc<AccessPolicy>,
    audit: AuditLogger,
}

impl TokenService {
    pub fn new(
        key: SigningKey,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        public_url: &str,
        policy: Arc<AccessPolicy>,
        audit: AuditLogger,
    ) -> Result<Self> {
        if ttl < MIN_TTL || ttl > MAX_TTL {
            return Err(GateError::Config(format!(
                "access token ttl must be between {}s and {}s, got {}s",
                MIN_TTL.as_secs(),
                MAX_TTL.as_secs(),
                ttl.as_secs()
            )));
        }
        Ok(Self {
            key,
            clock,
            ttl,
            public_url: public_url.trim_end_matches('/').to_string(),
            policy,
            audit,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a capability URL for one document, bound to the requesting
    /// subject. Fails with `Unauthorized` if the caller may not read it.
    pub async fn issue(&self, caller: &Caller, document_id: &str) -> Result<IssuedToken> {
        if document_id.is_empty() || document_id.contains(PAYLOAD_SEPARATOR) {
            return Err(GateError::BadRequest(format!(
                "document id must be non-empty and must not contain '{}'",
                PAYLOAD_SEPARATOR
            )));
        }
        if caller.subject_id.is_empty() {
            return Err(GateError::Unauthenticated("caller has no subject".into()));
        }

        if !self.policy.can_access(caller, document_id).await? {
            warn!(
                subject = %caller.subject_id,
                document = %document_id,
                "access token refused: not owner or reviewer"
            );
            return Err(GateError::Unauthorized(format!(
                "{} may not access document {}",
                caller.subject_id, document_id
            )));
        }

        let ttl_millis = i64::try_from(self.ttl.as_millis())
            .map_err(|_| GateError::Internal("ttl overflow".into()))?;
        let expires_at_millis = self.clock.now_millis() + ttl_millis;

        let payload = canonical_payload(document_id, expires_at_millis, &caller.subject_id);
        let signature = sign(&payload, &self.key)?;
        let signed_reference = render_reference(
            document_id,
            expires_at_millis,
            &caller.subject_id,
            &signature,
        )?;

        let expires_at = Utc
            .timestamp_millis_opt(expires_at_millis)
            .single()
            .ok_or_else(|| GateError::Internal("expiry out of range".into()))?;

        self.audit
            .log(
                self.audit
                    .event(AuditEventType::AccessTokenIssued)
                    .at(self.clock.now())
                    .with_caller(caller)
                    .with_document(document_id)
                    .with_metadata(serde_json::json!({ "expiresAt": expires_at_millis })),
            )
            .await;

        debug!(
            subject = %caller.subject_id,
            document = %document_id,
            expires_at = expires_at_millis,
            "access token issued"
        );

        Ok(IssuedToken {
            url: format!("{}{}{}", self.public_url, FILES_PREFIX, signed_reference),
            signed_reference,
            expires_at,
        })
    }

    /// Check a signed reference: well-formed, untampered, unexpired.
    ///
    /// Forged and expired references return different variants so they can be
    /// logged apart; both render the same public message.
    pub fn validate(&self, reference: &str) -> Result<TokenGrant> {
        let reference = reference.strip_prefix(FILES_PREFIX).unwrap_or(reference);

        let (grant, signature) = match parse_reference(reference) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(reason = %reason, "access token rejected: malformed");
                return Err(GateError::InvalidSignature(reason));
            }
        };

        let payload = canonical_payload(
            &grant.document_id,
            grant.expires_at_millis,
            &grant.subject_id,
        );
        if !verify(&payload, &signature, &self.key) {
            warn!(
                document = %grant.document_id,
                subject = %grant.subject_id,
                "access token rejected: bad signature"
            );
            return Err(GateError::InvalidSignature("signature mismatch".into()));
        }

        let now = self.clock.now_millis();
        if now > grant.expires_at_millis {
            warn!(
                document = %grant.document_id,
                subject = %grant.subject_id,
                expired_ms_ago = now - grant.expires_at_millis,
                "access token rejected: expired"
            );
            return Err(GateError::Expired);
        }

        Ok(grant)
    }

    /// Validate a reference and re-run the access check against the subject
    /// embedded in it, using that subject's current role.
    pub async fn redeem(&self, reference: &str) -> Result<(TokenGrant, DocumentContext)> {
        let grant = match self.validate(reference) {
            Ok(grant) => grant,
            Err(e) => {
                self.audit
                    .log(
                        self.audit
                            .event(AuditEventType::AccessTokenRejected)
                            .at(self.clock.now())
                            .with_metadata(serde_json::json!({ "reason": e.code() })),
                    )
                    .await;
                return Err(e);
            }
        };

        if !self
            .policy
            .can_subject_access(&grant.subject_id, &grant.document_id)
            .await?
        {
            warn!(
                subject = %grant.subject_id,
                document = %grant.document_id,
                "access token rejected: subject lost access"
            );
            self.audit
                .log(
                    self.audit
                        .event(AuditEventType::AccessTokenRejected)
                        .at(self.clock.now())
                        .with_subject(&grant.subject_id)
                        .with_document(&grant.document_id)
                        .with_metadata(serde_json::json!({ "reason": "revoked" })),
                )
                .await;
            return Err(GateError::Unauthorized(format!(
                "{} may no longer access document {}",
                grant.subject_id, grant.document_id
            )));
        }

        let context = self.policy.resolve(&grant.document_id).await?;
        Ok((grant, context))
    }
}

fn render_reference(
    document_id: &str,
    expires_at_millis: i64,
    subject_id: &str,
    signature: &str,
) -> Result<String> {
    let query = serde_urlencoded::to_string(ReferenceQuery {
        exp: expires_at_millis,
        sub: subject_id.to_string(),
        sig: signature.to_string(),
    })
    .map_err(|e| GateError::Internal(format!("failed to encode reference: {}", e)))?;

    Ok(format!("{}?{}", urlencoding::encode(document_id), query))
}

/// Parse a reference into its grant and signature. Only the canonical
/// rendering is accepted, so two different strings never carry one grant.
fn parse_reference(reference: &str) -> std::result::Result<(TokenGrant, String), String> {
    let (path, query) = reference
        .split_once('?')
        .ok_or_else(|| "missing query".to_string())?;

    let document_id = urlencoding::decode(path)
        .map_err(|e| format!("bad document id: {}", e))?
        .into_owned();
    if document_id.is_empty() || document_id.contains(PAYLOAD_SEPARATOR) {
        return Err("bad document id".to_string());
    }

    let parsed: ReferenceQuery =
        serde_urlencoded::from_str(query).map_err(|e| format!("bad query: {}", e))?;

    let canonical = render_reference(&document_id, parsed.exp, &parsed.sub, &parsed.sig)
        .map_err(|e| e.to_string())?;
    if canonical != reference {
        return Err("non-canonical reference".to_string());
    }

    Ok((
        TokenGrant {
            document_id,
            subject_id: parsed.sub,
            expires_at_millis: parsed.exp,
        },
        parsed.sig,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::clock::ManualClock;
    use crate::model::{Application, ApplicationStatus, DocumentUpload, ReviewStatus, SlotId};
    use crate::store::{
        MemoryApplicationStore, MemoryRoleDirectory, MemoryUploadStore, UploadStore,
    };

    const SECRET: &str = "test-secret-test-secret-test-secret";
    const START: i64 = 1_750_000_000_000;

    struct Fixture {
        service: TokenService,
        clock: Arc<ManualClock>,
        roles: Arc<MemoryRoleDirectory>,
        applications: Arc<MemoryApplicationStore>,
    }

    async fn fixture() -> Fixture {
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
                slot: SlotId::new("app-1", "chest-xray"),
                blob_ref: "blob-1".into(),
                original_filename: "xray.pdf".into(),
                content_type: "application/pdf".into(),
                uploaded_at: Utc::now(),
                uploaded_by: "alice".into(),
                review_status: ReviewStatus::Pending,
                superseded_by: None,
            })
            .await
            .unwrap();

        let policy = Arc::new(AccessPolicy::new(
            uploads,
            applications.clone(),
            roles.clone(),
        ));
        let clock = Arc::new(ManualClock::new(START));
        let service = TokenService::new(
            SigningKey::from_secret(SECRET).unwrap(),
            clock.clone(),
            DEFAULT_TTL,
            "https://gate.example.org/",
            policy,
            AuditLogger::new("test".into()),
        )
        .unwrap();

        Fixture {
            service,
            clock,
            roles,
            applications,
        }
    }

    fn alice() -> Caller {
        Caller::new("alice", Role::Applicant)
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let f = fixture().await;
        let token = f.service.issue(&alice(), "doc-1").await.unwrap();

        assert!(token
            .url
            .starts_with("https://gate.example.org/files/doc-1?exp="));
        assert_eq!(token.expires_at.timestamp_millis(), START + 300_000);

        let grant = f.service.validate(&token.signed_reference).unwrap();
        assert_eq!(grant.document_id, "doc-1");
        assert_eq!(grant.subject_id, "alice");
        assert!(f.clock.now_millis() < grant.expires_at_millis);
    }

    #[tokio::test]
    async fn test_validate_accepts_files_path() {
        let f = fixture().await;
        let token = f.service.issue(&alice(), "doc-1").await.unwrap();
        let path = format!("/files/{}", token.signed_reference);
        assert!(f.service.validate(&path).is_ok());
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let f = fixture().await;
        let token = f.service.issue(&alice(), "doc-1").await.unwrap();

        f.clock.set(START + 300_000);
        assert!(f.service.validate(&token.signed_reference).is_ok());

        f.clock.set(START + 300_001);
        let err = f.service.validate(&token.signed_reference).unwrap_err();
        assert!(matches!(err, GateError::Expired));
        assert_eq!(err.public_message(), crate::types::INVALID_OR_EXPIRED);
    }

    #[tokio::test]
    async fn test_any_single_character_tamper_fails() {
        let f = fixture().await;
        let token = f.service.issue(&alice(), "doc-1").await.unwrap();
        let reference = token.signed_reference;

        for (i, original) in reference.char_indices() {
            for replacement in ['A', '0', '_', '-', 'z'] {
                if replacement == original {
                    continue;
                }
                let mut tampered = String::with_capacity(reference.len());
                tampered.push_str(&reference[..i]);
                tampered.push(replacement);
                tampered.push_str(&reference[i + original.len_utf8()..]);

                let err = f.service.validate(&tampered).unwrap_err();
                assert!(
                    matches!(err, GateError::InvalidSignature(_) | GateError::Expired),
                    "tamper at {} accepted",
                    i
                );
                assert_eq!(err.public_message(), crate::types::INVALID_OR_EXPIRED);
            }
        }
    }

    #[tokio::test]
    async fn test_expired_and_forged_look_the_same() {
        let f = fixture().await;
        let token = f.service.issue(&alice(), "doc-1").await.unwrap();

        let forged = token.signed_reference.replace("sub=alice", "sub=mallory");
        let forged_err = f.service.validate(&forged).unwrap_err();

        f.clock.advance(chrono::Duration::seconds(301));
        let expired_err = f.service.validate(&token.signed_reference).unwrap_err();

        assert!(matches!(forged_err, GateError::InvalidSignature(_)));
        assert!(matches!(expired_err, GateError::Expired));
        assert_eq!(forged_err.public_message(), expired_err.public_message());
        assert_eq!(forged_err.status_code(), expired_err.status_code());
    }

    #[tokio::test]
    async fn test_issue_requires_access() {
        let f = fixture().await;
        let stranger = Caller::new("mallory", Role::Applicant);
        let reviewer = Caller::new("rita", Role::Reviewer);

        assert!(matches!(
            f.service.issue(&stranger, "doc-1").await,
            Err(GateError::Unauthorized(_))
        ));
        assert!(f.service.issue(&reviewer, "doc-1").await.is_ok());
        assert!(matches!(
            f.service.issue(&alice(), "doc-404").await,
            Err(GateError::NotFound(_))
        ));
        assert!(matches!(
            f.service.issue(&alice(), "doc.1").await,
            Err(GateError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_redeem_rechecks_current_role() {
        let f = fixture().await;
        f.roles.assign("rita", Role::Reviewer);
        let reviewer = Caller::new("rita", Role::Reviewer);
        let token = f.service.issue(&reviewer, "doc-1").await.unwrap();

        let (grant, context) = f.service.redeem(&token.signed_reference).await.unwrap();
        assert_eq!(grant.subject_id, "rita");
        assert_eq!(context.upload.blob_ref, "blob-1");

        f.roles.assign("rita", Role::Applicant);
        assert!(matches!(
            f.service.redeem(&token.signed_reference).await,
            Err(GateError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_redeem_follows_ownership_change() {
        let f = fixture().await;
        let token = f.service.issue(&alice(), "doc-1").await.unwrap();

        f.applications.upsert(Application {
            id: "app-1".into(),
            owner_id: "bob".into(),
            status: ApplicationStatus::Submitted,
        });
        assert!(matches!(
            f.service.redeem(&token.signed_reference).await,
            Err(GateError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_ttl_range() {
        let policy = Arc::new(AccessPolicy::new(
            Arc::new(MemoryUploadStore::new()),
            Arc::new(MemoryApplicationStore::new()),
            Arc::new(MemoryRoleDirectory::new()),
        ));
        let build = |ttl| {
            TokenService::new(
                SigningKey::from_secret(SECRET).unwrap(),
                Arc::new(ManualClock::new(START)),
                ttl,
                "http://localhost",
                policy.clone(),
                AuditLogger::new("test".into()),
            )
        };

        assert!(build(Duration::from_secs(59)).is_err());
        assert!(build(Duration::from_secs(60)).is_ok());
        assert!(build(Duration::from_secs(3600)).is_ok());
        assert!(build(Duration::from_secs(3601)).is_err());
    }
}
