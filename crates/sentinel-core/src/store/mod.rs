//! Repository interfaces for identities and the two append-only logs.
//!
//! Implementations are injected at construction time. "Not found" is an
//! absent value, never an error; backend failures surface as
//! [`SentinelError::Unavailable`].

use chrono::{DateTime, Utc};

use crate::error::SentinelError;
use crate::models::{AuditEvent, Identity, SecurityAction, SecurityEvent, SuspiciousIdentity};

pub mod memory;

pub use memory::{InMemoryAuditLogStore, InMemoryIdentityStore, InMemorySecurityLogStore};

#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new identity. A taken email is a `Conflict`.
    async fn create(&self, identity: Identity) -> Result<Identity, SentinelError>;

    /// Replace the stored identity with the same id. Last writer wins.
    async fn update(&self, identity: &Identity) -> Result<(), SentinelError>;

    /// Apply a successful login (failure counter reset, last login time and
    /// address) to the stored record without touching any other field, and
    /// return the record as stored afterwards. A blocked identity is
    /// returned unchanged.
    async fn record_login(
        &self,
        id: &str,
        address: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<Identity>, SentinelError>;

    async fn get(&self, id: &str) -> Result<Option<Identity>, SentinelError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, SentinelError>;

    /// Lookup by the stored (hashed) password reset token.
    async fn find_by_reset_token(&self, token_hash: &str)
    -> Result<Option<Identity>, SentinelError>;

    /// Lookup by the stored (hashed) email verification token.
    async fn find_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Identity>, SentinelError>;

    /// Page of identities ordered by creation time.
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Identity>, SentinelError>;

    async fn count_active(&self) -> Result<u64, SentinelError>;

    async fn count_blocked(&self) -> Result<u64, SentinelError>;
}

#[async_trait::async_trait]
pub trait SecurityLogStore: Send + Sync {
    async fn append(&self, event: SecurityEvent) -> Result<(), SentinelError>;

    /// Events for `identity_id` with `from <= created_at < to`, oldest first.
    async fn list_for_identity(
        &self,
        identity_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, SentinelError>;

    /// Every event of `action` in `from <= created_at < to`, oldest first.
    async fn list_by_action(
        &self,
        action: SecurityAction,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, SentinelError>;

    /// Identities with at least `threshold` events of `action` created at or
    /// after `since`.
    ///
    /// The time filter applies to events before they are grouped and
    /// counted, so events older than `since` never contribute. Rows are
    /// sorted by count descending, then identity id.
    async fn aggregate_by_identity(
        &self,
        action: SecurityAction,
        threshold: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SuspiciousIdentity>, SentinelError>;
}

#[async_trait::async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), SentinelError>;

    /// Newest first.
    async fn list_for_identity(
        &self,
        identity_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>, SentinelError>;
}
