//! Account security state machine.
//!
//! ```text
//!            block(actor, reason)
//!   Active ───────────────────────→ Blocked
//!     ↑   failed logins ≥ threshold    │
//!     │   (actor = "system")           │
//!     └────────────────────────────────┘
//!               unblock(actor)
//! ```
//!
//! Blocking flips the identity, sweeps its sessions and appends a security
//! event, in that order. The three steps are not atomic: a failure part-way
//! through is returned to the caller, and the whole `block` is safe to retry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::auth::rbac::Role;
use crate::auth::session::SessionStore;
use crate::error::SentinelError;
use crate::models::{ClientInfo, Identity, SecurityAction, SecurityEvent, SuspiciousIdentity};
use crate::store::{IdentityStore, SecurityLogStore};

/// Actor recorded for transitions the core makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

const LOCKOUT_REASON: &str = "Too many failed login attempts";

/// Trailing window of the suspicious-activity aggregate.
pub const SUSPICIOUS_WINDOW_HOURS: i64 = 24;

const DEFAULT_SUSPICIOUS_THRESHOLD: u64 = 3;

#[derive(Clone)]
pub struct SecurityService {
    identities: Arc<dyn IdentityStore>,
    security_log: Arc<dyn SecurityLogStore>,
    sessions: SessionStore,
    lockout_threshold: u32,
    suspicious_threshold: u64,
}

impl SecurityService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        security_log: Arc<dyn SecurityLogStore>,
        sessions: SessionStore,
        lockout_threshold: u32,
    ) -> Self {
        Self {
            identities,
            security_log,
            sessions,
            lockout_threshold,
            suspicious_threshold: DEFAULT_SUSPICIOUS_THRESHOLD,
        }
    }

    /// Threshold used by [`flagged_identities`](Self::flagged_identities).
    pub fn with_suspicious_threshold(mut self, threshold: u32) -> Self {
        self.suspicious_threshold = u64::from(threshold);
        self
    }

    async fn load(&self, identity_id: &str) -> Result<Identity, SentinelError> {
        self.identities
            .get(identity_id)
            .await?
            .ok_or_else(|| SentinelError::NotFound(format!("Identity {} not found", identity_id)))
    }

    /// Active → Blocked. Re-blocking overwrites actor and reason and appends
    /// another event.
    pub async fn block(
        &self,
        identity_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<Identity, SentinelError> {
        let mut identity = self.load(identity_id).await?;
        let now = Utc::now();

        identity.block(actor, reason, now);
        self.identities.update(&identity).await?;

        let revoked = self.sessions.delete_all_for_identity(identity_id).await?;

        self.security_log
            .append(
                SecurityEvent::new(identity_id, SecurityAction::BlockUser, reason, actor, now)
                    .with_metadata(serde_json::json!({ "revoked_sessions": revoked })),
            )
            .await?;

        tracing::warn!(%identity_id, %actor, %reason, revoked, "identity blocked");
        Ok(identity)
    }

    /// Blocked → Active. Sessions are not restored; the identity has to log
    /// in again.
    pub async fn unblock(&self, identity_id: &str, actor: &str) -> Result<Identity, SentinelError> {
        let mut identity = self.load(identity_id).await?;
        let now = Utc::now();

        identity.unblock(now);
        self.identities.update(&identity).await?;

        self.security_log
            .append(SecurityEvent::new(
                identity_id,
                SecurityAction::UnblockUser,
                "Account unblocked",
                actor,
                now,
            ))
            .await?;

        tracing::info!(%identity_id, %actor, "identity unblocked");
        Ok(identity)
    }

    /// Count a failed login, log it, then run the lockout check.
    ///
    /// Concurrent failures against one identity may under-count; the
    /// counter is last-writer-wins at the store.
    pub async fn record_failed_login(
        &self,
        identity_id: &str,
        client: &ClientInfo,
    ) -> Result<Identity, SentinelError> {
        let mut identity = self.load(identity_id).await?;
        let now = Utc::now();

        identity.record_failed_login(now);
        self.identities.update(&identity).await?;

        self.security_log
            .append(
                SecurityEvent::new(
                    identity_id,
                    SecurityAction::FailedLogin,
                    "Failed login attempt",
                    SYSTEM_ACTOR,
                    now,
                )
                .with_client(client.clone())
                .with_metadata(serde_json::json!({
                    "failed_attempts": identity.failed_login_attempts
                })),
            )
            .await?;

        tracing::debug!(
            %identity_id,
            attempts = identity.failed_login_attempts,
            "failed login recorded"
        );

        self.check_suspicious(identity_id).await
    }

    /// Block with actor `"system"` once the failed-login counter reaches the
    /// lockout threshold. Identities already blocked are left alone.
    pub async fn check_suspicious(&self, identity_id: &str) -> Result<Identity, SentinelError> {
        let identity = self.load(identity_id).await?;
        if identity.is_blocked() || identity.failed_login_attempts < self.lockout_threshold {
            return Ok(identity);
        }
        self.block(identity_id, SYSTEM_ACTOR, LOCKOUT_REASON).await
    }

    /// Revoke every session without blocking.
    pub async fn force_logout(&self, identity_id: &str, actor: &str) -> Result<u64, SentinelError> {
        self.load(identity_id).await?;
        let revoked = self.sessions.delete_all_for_identity(identity_id).await?;

        self.security_log
            .append(
                SecurityEvent::new(
                    identity_id,
                    SecurityAction::ForceLogout,
                    "All sessions revoked",
                    actor,
                    Utc::now(),
                )
                .with_metadata(serde_json::json!({ "revoked_sessions": revoked })),
            )
            .await?;

        tracing::info!(%identity_id, %actor, revoked, "forced logout");
        Ok(revoked)
    }

    /// Persist a new role. Tokens already issued keep the old role until
    /// they are refreshed.
    pub async fn change_role(
        &self,
        identity_id: &str,
        role: Role,
        actor: &str,
    ) -> Result<Identity, SentinelError> {
        let mut identity = self.load(identity_id).await?;
        let previous = identity.role;
        if previous == role {
            return Ok(identity);
        }
        let now = Utc::now();

        identity.role = role;
        identity.updated_at = now;
        self.identities.update(&identity).await?;

        self.security_log
            .append(
                SecurityEvent::new(
                    identity_id,
                    SecurityAction::RoleChange,
                    format!("Role changed from {} to {}", previous, role),
                    actor,
                    now,
                )
                .with_metadata(serde_json::json!({
                    "old_role": previous,
                    "new_role": role,
                })),
            )
            .await?;

        tracing::info!(%identity_id, %actor, from = %previous, to = %role, "role changed");
        Ok(identity)
    }

    /// Append a `suspicious_activity` event; this is the signal the
    /// aggregate in [`suspicious_identities`](Self::suspicious_identities)
    /// counts.
    pub async fn report_suspicious(
        &self,
        identity_id: &str,
        description: &str,
        client: &ClientInfo,
        metadata: serde_json::Value,
    ) -> Result<(), SentinelError> {
        self.security_log
            .append(
                SecurityEvent::new(
                    identity_id,
                    SecurityAction::SuspiciousActivity,
                    description,
                    SYSTEM_ACTOR,
                    Utc::now(),
                )
                .with_client(client.clone())
                .with_metadata(metadata),
            )
            .await?;
        tracing::warn!(%identity_id, %description, "suspicious activity reported");
        Ok(())
    }

    /// Identities with at least `threshold` suspicious-activity events in
    /// the trailing 24 hours. Read-only: nothing is blocked.
    pub async fn suspicious_identities(
        &self,
        threshold: u64,
    ) -> Result<Vec<SuspiciousIdentity>, SentinelError> {
        self.suspicious_identities_at(threshold, Utc::now()).await
    }

    /// [`suspicious_identities`](Self::suspicious_identities) at the
    /// configured threshold.
    pub async fn flagged_identities(&self) -> Result<Vec<SuspiciousIdentity>, SentinelError> {
        self.suspicious_identities(self.suspicious_threshold).await
    }

    pub async fn suspicious_identities_at(
        &self,
        threshold: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SuspiciousIdentity>, SentinelError> {
        let since = now - Duration::hours(SUSPICIOUS_WINDOW_HOURS);
        self.security_log
            .aggregate_by_identity(SecurityAction::SuspiciousActivity, threshold.max(1), since)
            .await
    }

    pub async fn security_logs(
        &self,
        identity_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, SentinelError> {
        if from > to {
            return Err(SentinelError::Validation(
                "'from' must not be after 'to'".to_string(),
            ));
        }
        self.security_log.list_for_identity(identity_id, from, to).await
    }
}
