//! Signed, typed session tokens.
//!
//! Access and refresh tokens are HS256 JWTs signed with two different
//! secrets. Validation takes the expected kind from the caller, selects the
//! secret for that kind, and then checks the `token_type` claim as well, so a
//! refresh token is refused where an access token is required even if both
//! secrets were configured to the same value.
//!
//! The role claim is a snapshot taken at issuance. A role change becomes
//! visible at the next refresh, so the staleness window is bounded by the
//! access TTL.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::rbac::Role;
use crate::config::Config;
use crate::error::SentinelError;
use crate::models::{Identity, SessionId};

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Which of the two token families a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

/// JWT claims payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (identity ID)
    pub sub: String,
    /// Role at issuance time
    pub role: Role,
    #[serde(rename = "token_type")]
    pub kind: TokenKind,
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Session the token is bound to
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sid: Option<String>,
}

impl Claims {
    pub fn session_id(&self) -> Option<SessionId> {
        self.sid.as_deref().and_then(SessionId::parse)
    }
}

/// Access and refresh token issued together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Why a token was refused. Callers that face end users collapse all of
/// these into one `Unauthorized`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("expected {expected} token, got {actual}")]
    KindMismatch {
        expected: TokenKind,
        actual: TokenKind,
    },
    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<TokenError> for SentinelError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(reason) => SentinelError::Internal(reason),
            other => SentinelError::Unauthorized(format!("Invalid token: {}", other)),
        }
    }
}

/// Token secrets, TTLs and issuer. Immutable after construction.
pub struct TokenManager {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    issuer: String,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
        issuer: impl Into<String>,
    ) -> Self {
        if access_secret == refresh_secret {
            tracing::warn!("access and refresh tokens share a signing secret");
        }
        TokenManager {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl,
            refresh_ttl,
            issuer: issuer.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.access_secret,
            &config.refresh_secret,
            config.access_ttl,
            config.refresh_ttl,
            config.issuer.clone(),
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue an access/refresh pair for `identity` using its current role.
    pub fn issue_pair(
        &self,
        identity: &Identity,
        session: Option<&SessionId>,
    ) -> Result<TokenPair, TokenError> {
        self.issue_pair_at(identity, session, Utc::now())
    }

    /// [`issue_pair`](Self::issue_pair) with an explicit issuance time.
    pub fn issue_pair_at(
        &self,
        identity: &Identity,
        session: Option<&SessionId>,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let access_token = self.sign(identity, TokenKind::Access, session, now)?;
        let refresh_token = self.sign(identity, TokenKind::Refresh, session, now)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }

    fn sign(
        &self,
        identity: &Identity,
        kind: TokenKind,
        session: Option<&SessionId>,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let (key, ttl) = match kind {
            TokenKind::Access => (&self.access_encoding, self.access_ttl),
            TokenKind::Refresh => (&self.refresh_encoding, self.refresh_ttl),
        };
        let issued_at = now.timestamp();
        let expires_at = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| issued_at.checked_add(secs))
            .ok_or_else(|| TokenError::Signing(format!("{} token TTL out of range", kind)))?;
        let claims = Claims {
            sub: identity.id.clone(),
            role: identity.role,
            kind,
            iss: self.issuer.clone(),
            iat: issued_at,
            nbf: issued_at,
            exp: expires_at,
            sid: session.map(|s| s.as_str().to_string()),
        };

        encode(&Header::new(SIGNING_ALGORITHM), &claims, key)
            .map_err(|e| TokenError::Signing(format!("Failed to create {} token: {}", kind, e)))
    }

    /// Validate `token` as a token of kind `expected`.
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        self.validate_at(token, expected, Utc::now())
    }

    /// [`validate`](Self::validate) against an explicit clock reading.
    ///
    /// The signature and issuer are checked by `jsonwebtoken`; the validity
    /// window is checked here, with zero leeway, against `now`.
    pub fn validate_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let key = match expected {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        let claims = decode::<Claims>(token, key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::UnsupportedAlgorithm
                }
                ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
                _ => TokenError::Malformed,
            })?
            .claims;

        let ts = now.timestamp();
        if ts < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if ts >= claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.kind != expected {
            return Err(TokenError::KindMismatch {
                expected,
                actual: claims.kind,
            });
        }

        Ok(claims)
    }
}
