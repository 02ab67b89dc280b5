use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::rbac::Role;

/// Identity record - the account that authenticates against Sentinel.
///
/// Identities are never hard-deleted; blocking flips `is_active` and keeps
/// the block metadata until an unblock clears it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_verified: bool,

    pub two_factor_enabled: bool,
    /// Base32 TOTP secret. Present once enrollment starts, even before
    /// `two_factor_enabled` is confirmed.
    pub totp_secret: Option<String>,

    pub is_active: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_by: Option<String>,
    pub block_reason: Option<String>,

    pub failed_login_attempts: u32,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,

    pub password_reset_token: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// New active, unverified identity with the default `user` role.
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Identity {
            id: id.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            role: Role::User,
            is_verified: false,
            two_factor_enabled: false,
            totp_secret: None,
            is_active: true,
            blocked_at: None,
            blocked_by: None,
            block_reason: None,
            failed_login_attempts: 0,
            last_failed_login_at: None,
            last_login_at: None,
            last_login_ip: None,
            password_reset_token: None,
            password_reset_expires_at: None,
            email_verification_token: None,
            email_verification_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.is_active
    }

    /// Apply the block transition. Re-blocking overwrites actor and reason.
    pub fn block(&mut self, actor: &str, reason: &str, now: DateTime<Utc>) {
        self.is_active = false;
        self.blocked_at = Some(now);
        self.blocked_by = Some(actor.to_string());
        self.block_reason = Some(reason.to_string());
        self.updated_at = now;
    }

    /// Apply the unblock transition. The failed-login counter restarts so a
    /// single miss right after unblocking does not re-trigger the lockout.
    pub fn unblock(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.blocked_at = None;
        self.blocked_by = None;
        self.block_reason = None;
        self.failed_login_attempts = 0;
        self.updated_at = now;
    }

    pub fn record_failed_login(&mut self, now: DateTime<Utc>) {
        self.failed_login_attempts = self.failed_login_attempts.saturating_add(1);
        self.last_failed_login_at = Some(now);
        self.updated_at = now;
    }

    pub fn record_successful_login(&mut self, address: Option<&str>, now: DateTime<Utc>) {
        self.failed_login_attempts = 0;
        self.last_login_at = Some(now);
        self.last_login_ip = address.map(str::to_string);
        self.updated_at = now;
    }
}

/// Public identity data (safe to return in API responses).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityResponse {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub is_verified: bool,
    pub two_factor_enabled: bool,
    pub is_active: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        IdentityResponse {
            id: identity.id,
            email: identity.email,
            role: identity.role,
            is_verified: identity.is_verified,
            two_factor_enabled: identity.two_factor_enabled,
            is_active: identity.is_active,
            blocked_at: identity.blocked_at,
            last_login_at: identity.last_login_at,
            created_at: identity.created_at,
        }
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        ClientInfo {
            address: Some(address.into()),
            user_agent: Some(user_agent.into()),
        }
    }

    /// Extract address and user-agent from forwarding headers.
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let address = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().to_string())
            });

        let user_agent = headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        ClientInfo {
            address,
            user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_then_unblock_clears_metadata() {
        let now = Utc::now();
        let mut identity = Identity::new("u1", "a@x.com", "hash", now);
        identity.failed_login_attempts = 5;

        identity.block("admin-1", "abuse", now);
        assert!(identity.is_blocked());
        assert_eq!(identity.blocked_by.as_deref(), Some("admin-1"));

        identity.unblock(now);
        assert!(!identity.is_blocked());
        assert!(identity.blocked_at.is_none());
        assert!(identity.block_reason.is_none());
        assert_eq!(identity.failed_login_attempts, 0);
    }

    #[test]
    fn successful_login_resets_counter() {
        let now = Utc::now();
        let mut identity = Identity::new("u1", "a@x.com", "hash", now);
        identity.record_failed_login(now);
        identity.record_failed_login(now);
        assert_eq!(identity.failed_login_attempts, 2);

        identity.record_successful_login(Some("10.0.0.1"), now);
        assert_eq!(identity.failed_login_attempts, 0);
        assert_eq!(identity.last_login_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn response_hides_secrets() {
        let identity = Identity::new("u1", "a@x.com", "$argon2id$secret", Utc::now());
        let json = serde_json::to_value(IdentityResponse::from(identity)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("totp_secret").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn client_info_prefers_first_forwarded_address() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        headers.insert("user-agent", "curl/8".parse().unwrap());

        let info = ClientInfo::from_headers(&headers);
        assert_eq!(info.address.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8"));
    }
}
