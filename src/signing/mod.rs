//! Signed, short-lived document URLs
//!
//! - `signer`: HMAC-SHA256 over the canonical payload
//! - `token`: issue and validate capability URLs

pub mod signer;
pub mod token;

pub use signer::{canonical_payload, sign, verify, SigningKey};
pub use token::{IssuedToken, TokenGrant, TokenService, DEFAULT_TTL, MAX_TTL, MIN_TTL};
