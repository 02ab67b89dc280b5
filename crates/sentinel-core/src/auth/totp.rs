use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::SentinelError;

/// Second-factor code generator/verifier.
///
/// Time step and code length belong to the implementation.
pub trait SecondFactor: Send + Sync {
    /// New base32 shared secret.
    fn generate_secret(&self) -> Result<String, SentinelError>;

    /// `otpauth://` URI for authenticator apps.
    fn enrollment_uri(&self, account_label: &str, secret: &str) -> Result<String, SentinelError>;

    /// Check `code` against `secret` at `now`.
    fn verify_code(
        &self,
        secret: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SentinelError>;
}

/// RFC 6238 TOTP: SHA1, 6 digits, 30 second step, one step of skew.
#[derive(Debug, Clone)]
pub struct TotpSecondFactor {
    issuer: String,
}

impl TotpSecondFactor {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    fn totp(&self, secret: &str, account_label: &str) -> Result<TOTP, SentinelError> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| SentinelError::Validation(format!("Invalid TOTP secret: {}", e)))?;
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|e| SentinelError::Internal(format!("Failed to create TOTP: {}", e)))
    }

    /// The code an authenticator app would show at `at`.
    pub fn code_at(&self, secret: &str, at: DateTime<Utc>) -> Result<String, SentinelError> {
        let ts = u64::try_from(at.timestamp())
            .map_err(|_| SentinelError::Internal("Clock before Unix epoch".to_string()))?;
        Ok(self.totp(secret, "")?.generate(ts))
    }
}

impl SecondFactor for TotpSecondFactor {
    fn generate_secret(&self) -> Result<String, SentinelError> {
        Ok(Secret::generate_secret().to_encoded().to_string())
    }

    fn enrollment_uri(&self, account_label: &str, secret: &str) -> Result<String, SentinelError> {
        Ok(self.totp(secret, account_label)?.get_url())
    }

    fn verify_code(
        &self,
        secret: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SentinelError> {
        let ts = u64::try_from(now.timestamp())
            .map_err(|_| SentinelError::Internal("Clock before Unix epoch".to_string()))?;
        Ok(self.totp(secret, "")?.check(code, ts))
    }
}

/// Generate a cryptographically secure random token (hex-encoded).
pub fn generate_secure_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    hex::encode(bytes)
}

/// SHA-256 hash a token for storage; only the hash is persisted.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
