//! Account lifecycle: registration, login, refresh, password and second
//! factor management.
//!
//! Every credential failure the caller can observe is the same
//! `Unauthorized("Invalid credentials")`, whichever check tripped. The
//! detail goes to the log and the audit trail only.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

use crate::auth::jwt::{Claims, TokenKind, TokenManager, TokenPair};
use crate::auth::password::{
    hash_password_async, validate_password_strength, verify_password_async,
};
use crate::auth::session::SessionStore;
use crate::auth::totp::{generate_secure_token, hash_token, SecondFactor};
use crate::error::SentinelError;
use crate::metrics::Metrics;
use crate::models::{
    AuditAction, AuditEvent, ClientInfo, Identity, IdentityResponse, Session, SessionId,
};
use crate::notify::Notifier;
use crate::oauth::OAuthProvider;
use crate::services::security::SecurityService;
use crate::store::{AuditLogStore, IdentityStore};

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const MAX_PAGE_SIZE: usize = 100;

// ── Request / Response types ──

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// TOTP code (required if 2FA is enabled for the identity)
    #[serde(default)]
    pub totp_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub session_id: SessionId,
    pub identity: IdentityResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetup {
    /// Base32-encoded TOTP secret
    pub secret: String,
    /// otpauth:// URI for QR code generation
    pub otpauth_uri: String,
}

/// Lifetimes and link base for the one-time tokens sent by email.
#[derive(Debug, Clone)]
pub struct AccountLinks {
    pub public_base_url: String,
    pub password_reset_ttl: std::time::Duration,
    pub email_verification_ttl: std::time::Duration,
}

/// Collaborators the authentication service is built from.
pub struct AuthDependencies {
    pub identities: Arc<dyn IdentityStore>,
    pub audit_log: Arc<dyn AuditLogStore>,
    pub tokens: Arc<TokenManager>,
    pub sessions: SessionStore,
    pub security: SecurityService,
    pub second_factor: Arc<dyn SecondFactor>,
    pub notifier: Arc<dyn Notifier>,
    pub oauth: Option<Arc<dyn OAuthProvider>>,
    pub metrics: Arc<Metrics>,
    pub links: AccountLinks,
}

#[derive(Clone)]
pub struct AuthService {
    inner: Arc<AuthDependencies>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn invalid_credentials() -> SentinelError {
    SentinelError::Unauthorized(INVALID_CREDENTIALS.to_string())
}

fn chrono_ttl(ttl: std::time::Duration) -> Result<ChronoDuration, SentinelError> {
    ChronoDuration::from_std(ttl)
        .map_err(|e| SentinelError::Internal(format!("TTL out of range: {}", e)))
}

impl AuthService {
    pub fn new(deps: AuthDependencies) -> Self {
        Self {
            inner: Arc::new(deps),
        }
    }

    async fn load(&self, identity_id: &str) -> Result<Identity, SentinelError> {
        self.inner
            .identities
            .get(identity_id)
            .await?
            .ok_or_else(|| SentinelError::NotFound(format!("Identity {} not found", identity_id)))
    }

    async fn audit(
        &self,
        identity_id: &str,
        action: AuditAction,
        success: bool,
        client: &ClientInfo,
        details: Option<&str>,
    ) -> Result<(), SentinelError> {
        let mut event = AuditEvent::new(identity_id, action, success, client.clone(), Utc::now());
        if let Some(details) = details {
            event = event.with_details(details);
        }
        self.inner.audit_log.append(event).await
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!(
            "{}/{}?token={}",
            self.inner.links.public_base_url.trim_end_matches('/'),
            path,
            token
        )
    }

    // ── Registration ──

    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<IdentityResponse, SentinelError> {
        let email = normalize_email(&request.email);
        if !email.validate_email() {
            return Err(SentinelError::Validation("Invalid email address".to_string()));
        }
        validate_password_strength(&request.password)?;

        if self.inner.identities.find_by_email(&email).await?.is_some() {
            return Err(SentinelError::Conflict("Email already registered".to_string()));
        }

        let now = Utc::now();
        let mut identity = Identity::new(
            uuid::Uuid::new_v4().to_string(),
            email.clone(),
            hash_password_async(&request.password).await?,
            now,
        );

        let verification_token = generate_secure_token();
        identity.email_verification_token = Some(hash_token(&verification_token));
        identity.email_verification_expires_at =
            Some(now + chrono_ttl(self.inner.links.email_verification_ttl)?);

        // The store enforces uniqueness too, for registrations racing past
        // the check above.
        let identity = self.inner.identities.create(identity).await?;

        self.inner
            .notifier
            .send_verification(&email, &self.link("verify-email", &verification_token))
            .await?;

        tracing::info!(identity_id = %identity.id, address = ?client.address, "identity registered");
        Ok(identity.into())
    }

    // ── Login / refresh / logout ──

    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<AuthResponse, SentinelError> {
        let email = normalize_email(&request.email);

        let Some(identity) = self.inner.identities.find_by_email(&email).await? else {
            self.inner.metrics.record_login(false);
            tracing::info!(address = ?client.address, "login for unknown email");
            return Err(invalid_credentials());
        };

        if identity.is_blocked() {
            self.inner.metrics.record_login(false);
            self.audit(&identity.id, AuditAction::Login, false, client, Some("blocked"))
                .await?;
            tracing::warn!(identity_id = %identity.id, "login attempt on blocked identity");
            return Err(invalid_credentials());
        }

        if !verify_password_async(&request.password, &identity.password_hash).await? {
            return Err(self.reject_login(&identity, client, "invalid_password").await);
        }

        if identity.two_factor_enabled {
            let secret = identity.totp_secret.as_deref().ok_or_else(|| {
                SentinelError::Internal("TOTP secret missing for 2FA-enabled identity".to_string())
            })?;
            let accepted = match request.totp_code.as_deref() {
                Some(code) => self
                    .inner
                    .second_factor
                    .verify_code(secret, code, Utc::now())?,
                None => false,
            };
            if !accepted {
                return Err(self.reject_login(&identity, client, "invalid_totp").await);
            }
        }

        let Some(response) = self.open_session(&identity.id, client, Utc::now()).await? else {
            return Err(self.reject_blocked_login(&identity.id, client).await);
        };
        self.audit(&response.identity.id, AuditAction::Login, true, client, None)
            .await?;
        self.inner.metrics.record_login(true);
        Ok(response)
    }

    /// The identity was blocked while the login was in flight.
    async fn reject_blocked_login(
        &self,
        identity_id: &str,
        client: &ClientInfo,
    ) -> SentinelError {
        self.inner.metrics.record_login(false);
        tracing::warn!(%identity_id, "identity blocked during login");
        if let Err(e) = self
            .audit(identity_id, AuditAction::Login, false, client, Some("blocked"))
            .await
        {
            return e;
        }
        invalid_credentials()
    }

    /// Count the failure, audit it, and produce the uniform error. A failure
    /// while recording wins over the credential error.
    async fn reject_login(
        &self,
        identity: &Identity,
        client: &ClientInfo,
        reason: &str,
    ) -> SentinelError {
        self.inner.metrics.record_login(false);
        tracing::info!(identity_id = %identity.id, %reason, "login rejected");

        if let Err(e) = self
            .inner
            .security
            .record_failed_login(&identity.id, client)
            .await
        {
            return e;
        }
        if let Err(e) = self
            .audit(&identity.id, AuditAction::Login, false, client, Some(reason))
            .await
        {
            return e;
        }
        invalid_credentials()
    }

    /// Successful-login side effects: reset the failure counter, record the
    /// login, open a session and issue a pair bound to it.
    ///
    /// The session lives as long as the refresh token, so deleting it
    /// revokes both tokens. Returns `None` when the identity is blocked,
    /// including a block that lands while the session is being opened.
    async fn open_session(
        &self,
        identity_id: &str,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthResponse>, SentinelError> {
        let identity = match self
            .inner
            .identities
            .record_login(identity_id, client.address.as_deref(), now)
            .await?
        {
            Some(identity) if !identity.is_blocked() => identity,
            _ => return Ok(None),
        };

        let ttl = self.inner.tokens.refresh_ttl();
        let session_id = SessionId::generate(&identity.id);
        let session = Session::new(identity.id.clone(), now + chrono_ttl(ttl)?).with_data(
            serde_json::json!({
                "address": client.address,
                "user_agent": client.user_agent,
            }),
        );
        self.inner.sessions.create(&session_id, &session, ttl).await?;

        // A block writes the identity before sweeping sessions, so either
        // its sweep sees this session or this read sees the block.
        let still_active = self
            .inner
            .identities
            .get(&identity.id)
            .await?
            .is_some_and(|current| !current.is_blocked());
        if !still_active {
            self.inner.sessions.delete(&session_id).await?;
            return Ok(None);
        }

        let tokens = self
            .inner
            .tokens
            .issue_pair_at(&identity, Some(&session_id), now)?;

        tracing::info!(identity_id = %identity.id, "session opened");
        Ok(Some(AuthResponse {
            tokens,
            session_id,
            identity: identity.into(),
        }))
    }

    /// Trade a refresh token for a new pair.
    ///
    /// The identity is re-read, so the new access token carries the role as
    /// it is now. The old session is replaced, which makes a refresh token
    /// single-use.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<AuthResponse, SentinelError> {
        let claims = self
            .inner
            .tokens
            .validate(refresh_token, TokenKind::Refresh)
            .map_err(|e| {
                tracing::debug!(error = %e, "refresh token rejected");
                invalid_credentials()
            })?;

        let session_id = claims.session_id().ok_or_else(invalid_credentials)?;
        if session_id.identity_id() != claims.sub
            || !self.inner.sessions.exists(&session_id).await?
        {
            tracing::warn!(identity_id = %claims.sub, "refresh with revoked or reused session");
            return Err(invalid_credentials());
        }

        let active = self
            .inner
            .identities
            .get(&claims.sub)
            .await?
            .is_some_and(|identity| !identity.is_blocked());
        if !active {
            return Err(invalid_credentials());
        }

        self.inner.sessions.delete(&session_id).await?;
        self.open_session(&claims.sub, client, Utc::now())
            .await?
            .ok_or_else(invalid_credentials)
    }

    /// Resolve an access token to its claims, requiring its session (if it
    /// names one) to still be live.
    pub async fn authenticate(&self, access_token: &str) -> Result<Claims, SentinelError> {
        let claims = self
            .inner
            .tokens
            .validate(access_token, TokenKind::Access)
            .map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                SentinelError::from(e)
            })?;

        if let Some(raw) = claims.sid.as_deref() {
            let live = match SessionId::parse(raw) {
                Some(id) if id.identity_id() == claims.sub => self.inner.sessions.exists(&id).await?,
                _ => false,
            };
            if !live {
                return Err(SentinelError::Unauthorized(
                    "Session revoked or expired".to_string(),
                ));
            }
        }
        Ok(claims)
    }

    pub async fn logout(&self, claims: &Claims, client: &ClientInfo) -> Result<(), SentinelError> {
        if let Some(session_id) = claims.session_id() {
            self.inner.sessions.delete(&session_id).await?;
        }
        self.audit(&claims.sub, AuditAction::Logout, true, client, None)
            .await?;
        tracing::info!(identity_id = %claims.sub, "logged out");
        Ok(())
    }

    // ── Passwords ──

    /// Change the password and revoke every session of the identity.
    pub async fn change_password(
        &self,
        identity_id: &str,
        current_password: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<(), SentinelError> {
        let mut identity = self.load(identity_id).await?;

        if !verify_password_async(current_password, &identity.password_hash).await? {
            self.audit(identity_id, AuditAction::PasswordChange, false, client, None)
                .await?;
            return Err(invalid_credentials());
        }
        validate_password_strength(new_password)?;

        identity.password_hash = hash_password_async(new_password).await?;
        identity.updated_at = Utc::now();
        self.inner.identities.update(&identity).await?;
        self.inner.sessions.delete_all_for_identity(identity_id).await?;

        self.audit(identity_id, AuditAction::PasswordChange, true, client, None)
            .await
    }

    /// Email a reset link. Unknown addresses succeed silently.
    pub async fn initiate_password_reset(&self, email: &str) -> Result<(), SentinelError> {
        let email = normalize_email(email);
        let Some(mut identity) = self.inner.identities.find_by_email(&email).await? else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_secure_token();
        let now = Utc::now();
        identity.password_reset_token = Some(hash_token(&token));
        identity.password_reset_expires_at =
            Some(now + chrono_ttl(self.inner.links.password_reset_ttl)?);
        identity.updated_at = now;
        self.inner.identities.update(&identity).await?;

        self.inner
            .notifier
            .send_password_reset(&email, &self.link("reset-password", &token))
            .await
    }

    /// Consume a reset token. The token is cleared on use and every session
    /// of the identity is revoked.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<(), SentinelError> {
        let now = Utc::now();
        let mut identity = match self
            .inner
            .identities
            .find_by_reset_token(&hash_token(token))
            .await?
        {
            Some(identity)
                if identity
                    .password_reset_expires_at
                    .is_some_and(|expires| expires > now) =>
            {
                identity
            }
            _ => {
                return Err(SentinelError::Validation(
                    "Invalid or expired reset token".to_string(),
                ));
            }
        };
        validate_password_strength(new_password)?;

        identity.password_hash = hash_password_async(new_password).await?;
        identity.password_reset_token = None;
        identity.password_reset_expires_at = None;
        identity.updated_at = now;
        self.inner.identities.update(&identity).await?;
        self.inner
            .sessions
            .delete_all_for_identity(&identity.id)
            .await?;

        self.audit(
            &identity.id,
            AuditAction::PasswordChange,
            true,
            client,
            Some("reset"),
        )
        .await
    }

    pub async fn verify_email(&self, token: &str, client: &ClientInfo) -> Result<(), SentinelError> {
        let now = Utc::now();
        let mut identity = match self
            .inner
            .identities
            .find_by_verification_token(&hash_token(token))
            .await?
        {
            Some(identity)
                if identity
                    .email_verification_expires_at
                    .is_some_and(|expires| expires > now) =>
            {
                identity
            }
            _ => {
                return Err(SentinelError::Validation(
                    "Invalid or expired verification token".to_string(),
                ));
            }
        };

        identity.is_verified = true;
        identity.email_verification_token = None;
        identity.email_verification_expires_at = None;
        identity.updated_at = now;
        self.inner.identities.update(&identity).await?;

        self.audit(&identity.id, AuditAction::EmailVerify, true, client, None)
            .await
    }

    // ── Second factor ──

    /// Start enrollment. 2FA is not enforced until [`confirm_2fa`](Self::confirm_2fa).
    pub async fn enable_2fa(&self, identity_id: &str) -> Result<TwoFactorSetup, SentinelError> {
        let mut identity = self.load(identity_id).await?;
        if identity.two_factor_enabled {
            return Err(SentinelError::Conflict("2FA is already enabled".to_string()));
        }

        let secret = self.inner.second_factor.generate_secret()?;
        let otpauth_uri = self
            .inner
            .second_factor
            .enrollment_uri(&identity.email, &secret)?;

        identity.totp_secret = Some(secret.clone());
        identity.updated_at = Utc::now();
        self.inner.identities.update(&identity).await?;

        Ok(TwoFactorSetup {
            secret,
            otpauth_uri,
        })
    }

    pub async fn confirm_2fa(
        &self,
        identity_id: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<(), SentinelError> {
        let mut identity = self.load(identity_id).await?;
        let secret = identity.totp_secret.clone().ok_or_else(|| {
            SentinelError::Validation("2FA setup has not been started".to_string())
        })?;

        if !self
            .inner
            .second_factor
            .verify_code(&secret, code, Utc::now())?
        {
            self.audit(identity_id, AuditAction::TwoFactorEnable, false, client, None)
                .await?;
            return Err(invalid_credentials());
        }

        identity.two_factor_enabled = true;
        identity.updated_at = Utc::now();
        self.inner.identities.update(&identity).await?;

        self.audit(identity_id, AuditAction::TwoFactorEnable, true, client, None)
            .await
    }

    /// Requires both the password and a current code.
    pub async fn disable_2fa(
        &self,
        identity_id: &str,
        password: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<(), SentinelError> {
        let mut identity = self.load(identity_id).await?;
        let Some(secret) = identity.totp_secret.clone().filter(|_| identity.two_factor_enabled)
        else {
            return Err(SentinelError::Validation("2FA is not enabled".to_string()));
        };

        let accepted = verify_password_async(password, &identity.password_hash).await?
            && self
                .inner
                .second_factor
                .verify_code(&secret, code, Utc::now())?;
        if !accepted {
            self.audit(identity_id, AuditAction::TwoFactorDisable, false, client, None)
                .await?;
            return Err(invalid_credentials());
        }

        identity.two_factor_enabled = false;
        identity.totp_secret = None;
        identity.updated_at = Utc::now();
        self.inner.identities.update(&identity).await?;

        self.audit(identity_id, AuditAction::TwoFactorDisable, true, client, None)
            .await
    }

    // ── External identity providers ──

    pub fn oauth_authorize_url(&self, state: &str) -> Result<String, SentinelError> {
        self.inner
            .oauth
            .as_ref()
            .map(|provider| provider.authorize_url(state))
            .ok_or_else(|| SentinelError::Unavailable("OAuth provider not configured".to_string()))
    }

    /// Log in with a provider authorization code, creating a verified
    /// identity on first use.
    pub async fn login_with_oauth(
        &self,
        code: &str,
        client: &ClientInfo,
    ) -> Result<AuthResponse, SentinelError> {
        let provider = self.inner.oauth.as_ref().ok_or_else(|| {
            SentinelError::Unavailable("OAuth provider not configured".to_string())
        })?;
        let info = provider.exchange(code).await?;

        let email = normalize_email(&info.email);
        if !email.validate_email() {
            return Err(SentinelError::Validation(
                "Provider returned an invalid email address".to_string(),
            ));
        }

        let identity = match self.inner.identities.find_by_email(&email).await? {
            Some(identity) => identity,
            None => {
                // Unusable password: nobody knows the random input.
                let mut identity = Identity::new(
                    uuid::Uuid::new_v4().to_string(),
                    email,
                    hash_password_async(&generate_secure_token()).await?,
                    Utc::now(),
                );
                identity.is_verified = true;
                tracing::info!(provider = %info.provider, "identity created from provider login");
                self.inner.identities.create(identity).await?
            }
        };

        if identity.is_blocked() {
            self.inner.metrics.record_login(false);
            self.audit(&identity.id, AuditAction::Login, false, client, Some("blocked"))
                .await?;
            return Err(invalid_credentials());
        }

        let details = format!("oauth:{}", info.provider);
        let Some(response) = self.open_session(&identity.id, client, Utc::now()).await? else {
            return Err(self.reject_blocked_login(&identity.id, client).await);
        };
        self.audit(
            &response.identity.id,
            AuditAction::Login,
            true,
            client,
            Some(&details),
        )
        .await?;
        self.inner.metrics.record_login(true);
        Ok(response)
    }

    // ── Queries ──

    pub async fn get_identity(&self, identity_id: &str) -> Result<IdentityResponse, SentinelError> {
        Ok(self.load(identity_id).await?.into())
    }

    pub async fn list_identities(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<IdentityResponse>, SentinelError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self
            .inner
            .identities
            .list(offset, limit)
            .await?
            .into_iter()
            .map(IdentityResponse::from)
            .collect())
    }

    /// Newest first.
    pub async fn audit_logs(
        &self,
        identity_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>, SentinelError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.inner
            .audit_log
            .list_for_identity(identity_id, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn credential_errors_are_uniform() {
        let err = invalid_credentials();
        assert_eq!(err.public_message(), "Unauthorized");
    }
}
