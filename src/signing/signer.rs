//! HMAC-SHA256 signer for capability URLs

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::types::GateError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum secret length accepted at startup
pub const MIN_SECRET_BYTES: usize = 32;

/// Separator between the fields of the signed payload
pub const PAYLOAD_SEPARATOR: char = '.';

/// Server-side signing secret. The bytes are wiped on drop and never printed.
#[derive(Clone)]
pub struct SigningKey {
    secret: Zeroizing<Vec<u8>>,
}

impl SigningKey {
    pub fn from_secret(secret: &str) -> Result<Self, GateError> {
        if secret.is_empty() {
            return Err(GateError::Config(
                "ACCESS_TOKEN_SECRET is required".to_string(),
            ));
        }
        if secret.len() < MIN_SECRET_BYTES {
            return Err(GateError::Config(format!(
                "ACCESS_TOKEN_SECRET must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }
        Ok(Self {
            secret: Zeroizing::new(secret.as_bytes().to_vec()),
        })
    }

    fn mac(&self) -> Result<HmacSha256, GateError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| GateError::Internal(format!("hmac key rejected: {}", e)))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").finish_non_exhaustive()
    }
}

/// `documentId.expiresAt.subjectId`
pub fn canonical_payload(document_id: &str, expires_at_millis: i64, subject_id: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        document_id,
        expires_at_millis,
        subject_id,
        sep = PAYLOAD_SEPARATOR
    )
}

pub fn sign(payload: &str, key: &SigningKey) -> Result<String, GateError> {
    let mut mac = key.mac()?;
    mac.update(payload.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Recompute and compare in constant time. Undecodable input is just false.
pub fn verify(payload: &str, signature: &str, key: &SigningKey) -> bool {
    let Ok(presented) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };

    let Ok(mut mac) = key.mac() else {
        return false;
    };
    mac.update(payload.as_bytes());
    let expected = mac.finalize().into_bytes();

    if presented.len() != expected.len() {
        return false;
    }
    expected.as_slice().ct_eq(presented.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_sign_verify() {
        let key = SigningKey::from_secret(SECRET).unwrap();
        let payload = canonical_payload("doc-1", 1_700_000_000_000, "alice");
        assert_eq!(payload, "doc-1.1700000000000.alice");

        let sig = sign(&payload, &key).unwrap();
        assert!(!sig.contains('='));
        assert!(!sig.contains('+'));
        assert!(!sig.contains('/'));
        assert!(verify(&payload, &sig, &key));
    }

    #[test]
    fn test_verify_rejects_other_payload_and_key() {
        let key = SigningKey::from_secret(SECRET).unwrap();
        let other = SigningKey::from_secret("ffffffffffffffffffffffffffffffff").unwrap();
        let sig = sign("doc-1.1.alice", &key).unwrap();

        assert!(!verify("doc-1.1.mallory", &sig, &key));
        assert!(!verify("doc-1.1.alice", &sig, &other));
        assert!(!verify("doc-1.1.alice", "not base64!", &key));
        assert!(!verify("doc-1.1.alice", "", &key));
        assert!(!verify("doc-1.1.alice", &sig[..sig.len() - 2], &key));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            SigningKey::from_secret("short"),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            SigningKey::from_secret(""),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = SigningKey::from_secret(SECRET).unwrap();
        assert!(!format!("{:?}", key).contains(SECRET));
    }
}
