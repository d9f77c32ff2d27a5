//! Configuration for evidence-gate
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::signing::{SigningKey, MAX_TTL, MIN_TTL};
use crate::types::GateError;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// evidence-gate - signed document access and review outcomes for
/// health-card registration
#[derive(Parser, Debug, Clone)]
#[command(name = "evidence-gate")]
#[command(about = "Signed document URLs and review outcome tracking for health-card registration")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory fallbacks, dev JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "evidence_gate")]
    pub mongodb_db: String,

    /// HMAC secret for document access URLs (at least 32 bytes, always required)
    #[arg(long, env = "ACCESS_TOKEN_SECRET", hide_env_values = true)]
    pub access_token_secret: Option<String>,

    /// Lifetime of a document access URL in seconds (60..=3600)
    #[arg(long, env = "ACCESS_TOKEN_TTL_SECONDS", default_value = "300")]
    pub access_token_ttl_seconds: u64,

    /// Answer expired access URLs with 410 Gone instead of 403
    #[arg(long, env = "EXPIRED_AS_GONE", default_value = "false")]
    pub expired_as_gone: bool,

    /// Identity provider JWT secret (required in production)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds (used for locally minted dev tokens)
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Public base URL that access URLs are built on
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:8090")]
    pub public_url: String,

    /// URL of the blob storage service (e.g., "http://localhost:8091")
    #[arg(long, env = "STORAGE_URL")]
    pub storage_url: Option<String>,

    /// JSONL audit log file (optional)
    #[arg(long, env = "AUDIT_LOG_PATH")]
    pub audit_log_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if !self.dev_mode && self.storage_url.is_none() {
            return Err("STORAGE_URL is required in production mode".to_string());
        }

        // Required in every mode; there is no default signing secret
        self.signing_key().map_err(|e| e.to_string())?;

        let ttl = self.access_token_ttl();
        if ttl < MIN_TTL || ttl > MAX_TTL {
            return Err(format!(
                "ACCESS_TOKEN_TTL_SECONDS must be between {} and {}",
                MIN_TTL.as_secs(),
                MAX_TTL.as_secs()
            ));
        }

        if !self.public_url.starts_with("http://") && !self.public_url.starts_with("https://") {
            return Err("PUBLIC_URL must be an http(s) URL".to_string());
        }

        Ok(())
    }

    /// Build the signing key from `ACCESS_TOKEN_SECRET`
    pub fn signing_key(&self) -> Result<SigningKey, GateError> {
        SigningKey::from_secret(self.access_token_secret.as_deref().unwrap_or(""))
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["evidence-gate"];
        argv.extend_from_slice(args);
        Args::parse_from(argv)
    }

    #[test]
    fn test_dev_mode_still_needs_signing_secret() {
        let args = parse(&["--dev-mode"]);
        assert!(args.validate().is_err());

        let args = parse(&["--dev-mode", "--access-token-secret", SECRET]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_jwt_and_storage() {
        let args = parse(&["--access-token-secret", SECRET]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--access-token-secret",
            SECRET,
            "--jwt-secret",
            SECRET,
            "--storage-url",
            "http://storage:8091",
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_ttl_bounds() {
        let args = parse(&[
            "--dev-mode",
            "--access-token-secret",
            SECRET,
            "--access-token-ttl-seconds",
            "30",
        ]);
        assert!(args.validate().is_err());
        assert_eq!(parse(&["--dev-mode"]).access_token_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_short_secret_rejected() {
        let args = parse(&["--dev-mode", "--access-token-secret", "too-short"]);
        assert!(args.validate().is_err());
    }
}
