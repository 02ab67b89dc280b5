use std::time::Duration;

use chrono::Utc;

use crate::cache::CacheService;
use crate::error::SentinelError;
use crate::models::{Session, SessionId};

/// TTL-bound session records in the shared cache.
///
/// Keys are namespaced per identity (see [`SessionId`]), which is what lets
/// [`delete_all_for_identity`](Self::delete_all_for_identity) revoke by
/// prefix.
#[derive(Clone)]
pub struct SessionStore {
    cache: CacheService,
}

impl SessionStore {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    /// Upsert `session` under `id` for at most `ttl`.
    ///
    /// The stored TTL never outlives `session.expires_at`; a session that has
    /// already expired is refused.
    pub async fn create(
        &self,
        id: &SessionId,
        session: &Session,
        ttl: Duration,
    ) -> Result<(), SentinelError> {
        if session.identity_id != id.identity_id() {
            return Err(SentinelError::Validation(
                "Session id is not namespaced under its identity".to_string(),
            ));
        }

        let remaining = (session.expires_at - Utc::now())
            .to_std()
            .map_err(|_| SentinelError::Validation("Session has already expired".to_string()))?;
        if remaining.is_zero() {
            return Err(SentinelError::Validation(
                "Session has already expired".to_string(),
            ));
        }

        self.cache
            .set_json(id.as_str(), session, Some(ttl.min(remaining)))
            .await
    }

    /// Absence is `Ok(None)`.
    pub async fn get(&self, id: &SessionId) -> Result<Option<Session>, SentinelError> {
        self.cache.get_json(id.as_str()).await
    }

    pub async fn exists(&self, id: &SessionId) -> Result<bool, SentinelError> {
        self.cache.exists(id.as_str()).await
    }

    /// Idempotent.
    pub async fn delete(&self, id: &SessionId) -> Result<(), SentinelError> {
        self.cache.del(id.as_str()).await?;
        Ok(())
    }

    /// Delete every session of `identity_id`. Best-effort against sessions
    /// created while the sweep runs.
    pub async fn delete_all_for_identity(&self, identity_id: &str) -> Result<u64, SentinelError> {
        let removed = self
            .cache
            .del_prefix(&SessionId::identity_prefix(identity_id))
            .await?;
        tracing::debug!(%identity_id, removed, "revoked sessions");
        Ok(removed)
    }
}
