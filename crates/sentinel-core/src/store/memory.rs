use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AuditLogStore, IdentityStore, SecurityLogStore};
use crate::error::SentinelError;
use crate::models::{AuditEvent, Identity, SecurityAction, SecurityEvent, SuspiciousIdentity};

/// In-memory identity store. Email uniqueness is enforced by a secondary
/// index updated under the same lock as the records.
#[derive(Clone, Default)]
pub struct InMemoryIdentityStore {
    inner: Arc<RwLock<IdentityTable>>,
}

#[derive(Default)]
struct IdentityTable {
    by_id: HashMap<String, Identity>,
    id_by_email: HashMap<String, String>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find_where<F>(&self, pred: F) -> Option<Identity>
    where
        F: Fn(&Identity) -> bool,
    {
        self.inner
            .read()
            .await
            .by_id
            .values()
            .find(|identity| pred(identity))
            .cloned()
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn create(&self, identity: Identity) -> Result<Identity, SentinelError> {
        let mut table = self.inner.write().await;
        if table.id_by_email.contains_key(&identity.email) {
            return Err(SentinelError::Conflict("Email already registered".to_string()));
        }
        if table.by_id.contains_key(&identity.id) {
            return Err(SentinelError::Conflict(format!(
                "Identity {} already exists",
                identity.id
            )));
        }
        table
            .id_by_email
            .insert(identity.email.clone(), identity.id.clone());
        table.by_id.insert(identity.id.clone(), identity.clone());
        Ok(identity)
    }

    async fn update(&self, identity: &Identity) -> Result<(), SentinelError> {
        let mut table = self.inner.write().await;
        let previous_email = match table.by_id.get(&identity.id) {
            Some(existing) => existing.email.clone(),
            None => {
                return Err(SentinelError::NotFound(format!(
                    "Identity {} not found",
                    identity.id
                )));
            }
        };

        if previous_email != identity.email {
            if table.id_by_email.contains_key(&identity.email) {
                return Err(SentinelError::Conflict("Email already registered".to_string()));
            }
            table.id_by_email.remove(&previous_email);
            table
                .id_by_email
                .insert(identity.email.clone(), identity.id.clone());
        }
        table.by_id.insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn record_login(
        &self,
        id: &str,
        address: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<Identity>, SentinelError> {
        let mut table = self.inner.write().await;
        Ok(table.by_id.get_mut(id).map(|identity| {
            if !identity.is_blocked() {
                identity.record_successful_login(address, at);
            }
            identity.clone()
        }))
    }

    async fn get(&self, id: &str) -> Result<Option<Identity>, SentinelError> {
        Ok(self.inner.read().await.by_id.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, SentinelError> {
        let table = self.inner.read().await;
        Ok(table
            .id_by_email
            .get(email)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Identity>, SentinelError> {
        Ok(self
            .find_where(|i| i.password_reset_token.as_deref() == Some(token_hash))
            .await)
    }

    async fn find_by_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Identity>, SentinelError> {
        Ok(self
            .find_where(|i| i.email_verification_token.as_deref() == Some(token_hash))
            .await)
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Identity>, SentinelError> {
        let table = self.inner.read().await;
        let mut all: Vec<&Identity> = table.by_id.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn count_active(&self) -> Result<u64, SentinelError> {
        let table = self.inner.read().await;
        Ok(table.by_id.values().filter(|i| i.is_active).count() as u64)
    }

    async fn count_blocked(&self) -> Result<u64, SentinelError> {
        let table = self.inner.read().await;
        Ok(table.by_id.values().filter(|i| i.is_blocked()).count() as u64)
    }
}

/// Append-only in-memory security log.
#[derive(Clone, Default)]
pub struct InMemorySecurityLogStore {
    events: Arc<RwLock<Vec<SecurityEvent>>>,
}

impl InMemorySecurityLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SecurityLogStore for InMemorySecurityLogStore {
    async fn append(&self, event: SecurityEvent) -> Result<(), SentinelError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list_for_identity(
        &self,
        identity_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, SentinelError> {
        let events = self.events.read().await;
        let mut matching: Vec<SecurityEvent> = events
            .iter()
            .filter(|e| e.identity_id == identity_id && e.created_at >= from && e.created_at < to)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(matching)
    }

    async fn list_by_action(
        &self,
        action: SecurityAction,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, SentinelError> {
        let events = self.events.read().await;
        let mut matching: Vec<SecurityEvent> = events
            .iter()
            .filter(|e| e.action == action && e.created_at >= from && e.created_at < to)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(matching)
    }

    async fn aggregate_by_identity(
        &self,
        action: SecurityAction,
        threshold: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<SuspiciousIdentity>, SentinelError> {
        let events = self.events.read().await;

        // WHERE action = ? AND created_at >= ? GROUP BY identity HAVING count >= ?
        let mut groups: BTreeMap<&str, (u64, DateTime<Utc>)> = BTreeMap::new();
        for event in events
            .iter()
            .filter(|e| e.action == action && e.created_at >= since)
        {
            let entry = groups
                .entry(event.identity_id.as_str())
                .or_insert((0, event.created_at));
            entry.0 += 1;
            entry.1 = entry.1.max(event.created_at);
        }

        let mut rows: Vec<SuspiciousIdentity> = groups
            .into_iter()
            .filter(|(_, (count, _))| *count >= threshold)
            .map(|(identity_id, (event_count, last_seen_at))| SuspiciousIdentity {
                identity_id: identity_id.to_string(),
                event_count,
                last_seen_at,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.event_count
                .cmp(&a.event_count)
                .then_with(|| a.identity_id.cmp(&b.identity_id))
        });
        Ok(rows)
    }
}

/// Append-only in-memory audit log.
#[derive(Clone, Default)]
pub struct InMemoryAuditLogStore {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AuditLogStore for InMemoryAuditLogStore {
    async fn append(&self, event: AuditEvent) -> Result<(), SentinelError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list_for_identity(
        &self,
        identity_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>, SentinelError> {
        let events = self.events.read().await;
        let mut matching: Vec<&AuditEvent> = events
            .iter()
            .filter(|e| e.identity_id == identity_id)
            .collect();
        // Stable sort keeps append order among equal timestamps; reverse it
        // so the newest append comes first.
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity(id: &str, email: &str) -> Identity {
        Identity::new(id, email, "hash", Utc::now())
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = InMemoryIdentityStore::new();
        store.create(identity("1", "a@x.com")).await.unwrap();
        let err = store.create(identity("2", "a@x.com")).await.unwrap_err();
        assert!(matches!(err, SentinelError::Conflict(_)));
    }

    #[tokio::test]
    async fn record_login_leaves_block_in_place() {
        let store = InMemoryIdentityStore::new();
        let mut a = identity("1", "a@x.com");
        a.failed_login_attempts = 2;
        store.create(a).await.unwrap();

        let mut blocked = store.get("1").await.unwrap().unwrap();
        blocked.block("admin-1", "abuse", Utc::now());
        store.update(&blocked).await.unwrap();

        let after = store
            .record_login("1", Some("203.0.113.7"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(after.is_blocked());
        assert_eq!(after.blocked_by.as_deref(), Some("admin-1"));
        assert_eq!(after.failed_login_attempts, 2);
        assert_eq!(after.last_login_at, None);

        let mut active = store.get("1").await.unwrap().unwrap();
        active.unblock(Utc::now());
        active.failed_login_attempts = 3;
        store.update(&active).await.unwrap();

        let after = store
            .record_login("1", Some("203.0.113.7"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.failed_login_attempts, 0);
        assert_eq!(after.last_login_ip.as_deref(), Some("203.0.113.7"));
        assert!(store.record_login("2", None, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_identity_is_none() {
        let store = InMemoryIdentityStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
        assert_eq!(store.find_by_email("nope@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn email_change_moves_index() {
        let store = InMemoryIdentityStore::new();
        let mut a = store.create(identity("1", "a@x.com")).await.unwrap();
        store.create(identity("2", "b@x.com")).await.unwrap();

        a.email = "b@x.com".to_string();
        assert!(matches!(
            store.update(&a).await,
            Err(SentinelError::Conflict(_))
        ));

        a.email = "c@x.com".to_string();
        store.update(&a).await.unwrap();
        assert!(store.find_by_email("a@x.com").await.unwrap().is_none());
        assert_eq!(store.find_by_email("c@x.com").await.unwrap().unwrap().id, "1");
    }

    #[tokio::test]
    async fn counts_track_blocking() {
        let store = InMemoryIdentityStore::new();
        let mut a = store.create(identity("1", "a@x.com")).await.unwrap();
        store.create(identity("2", "b@x.com")).await.unwrap();
        a.block("admin", "spam", Utc::now());
        store.update(&a).await.unwrap();

        assert_eq!(store.count_active().await.unwrap(), 1);
        assert_eq!(store.count_blocked().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn aggregate_applies_window_before_counting() {
        let store = InMemorySecurityLogStore::new();
        let now = Utc::now();
        let old = now - Duration::hours(30);
        for at in [old, old, now - Duration::hours(1)] {
            store
                .append(SecurityEvent::new(
                    "user-1",
                    SecurityAction::SuspiciousActivity,
                    "odd",
                    "system",
                    at,
                ))
                .await
                .unwrap();
        }
        let rows = store
            .aggregate_by_identity(SecurityAction::SuspiciousActivity, 2, now - Duration::hours(24))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn audit_pages_newest_first() {
        let store = InMemoryAuditLogStore::new();
        let base = Utc::now();
        for minutes in 0..5 {
            store
                .append(AuditEvent::new(
                    "user-1",
                    crate::models::AuditAction::Login,
                    true,
                    Default::default(),
                    base + Duration::minutes(minutes),
                ))
                .await
                .unwrap();
        }
        let page = store.list_for_identity("user-1", 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].created_at, base + Duration::minutes(3));
        assert_eq!(page[1].created_at, base + Duration::minutes(2));
    }
}
