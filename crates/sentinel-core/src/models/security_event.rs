use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ClientInfo;

/// Kind of security-relevant action recorded in the security log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityAction {
    BlockUser,
    UnblockUser,
    FailedLogin,
    SuspiciousActivity,
    RoleChange,
    ForceLogout,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityAction::BlockUser => "block_user",
            SecurityAction::UnblockUser => "unblock_user",
            SecurityAction::FailedLogin => "failed_login",
            SecurityAction::SuspiciousActivity => "suspicious_activity",
            SecurityAction::RoleChange => "role_change",
            SecurityAction::ForceLogout => "force_logout",
        }
    }
}

impl std::fmt::Display for SecurityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only security log entry. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub identity_id: String,
    pub action: SecurityAction,
    pub description: String,
    /// Who performed the action: an identity id, or `"system"`.
    pub actor: String,
    pub client: ClientInfo,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        identity_id: impl Into<String>,
        action: SecurityAction,
        description: impl Into<String>,
        actor: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        SecurityEvent {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: identity_id.into(),
            action,
            description: description.into(),
            actor: actor.into(),
            client: ClientInfo::default(),
            metadata: serde_json::Value::Null,
            created_at,
        }
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One row of the suspicious-activity aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousIdentity {
    pub identity_id: String,
    pub event_count: u64,
    pub last_seen_at: DateTime<Utc>,
}
