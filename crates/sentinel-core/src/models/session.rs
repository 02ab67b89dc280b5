use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SESSION_NAMESPACE: &str = "session";

/// Opaque session key, namespaced under the owning identity:
/// `session:{identity_id}:{random}`.
///
/// The namespace is what makes "every session for identity X" a prefix sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random session id for `identity_id`.
    pub fn generate(identity_id: &str) -> Self {
        SessionId(format!(
            "{}:{}:{}",
            SESSION_NAMESPACE,
            identity_id,
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Parse an id received from a token claim. Returns `None` unless it
    /// carries the session namespace and a non-empty identity segment.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(SESSION_NAMESPACE)?.strip_prefix(':')?;
        let (identity, random) = rest.rsplit_once(':')?;
        if identity.is_empty() || random.is_empty() {
            return None;
        }
        Some(SessionId(raw.to_string()))
    }

    /// Key prefix shared by every session of `identity_id`.
    pub fn identity_prefix(identity_id: &str) -> String {
        format!("{}:{}:", SESSION_NAMESPACE, identity_id)
    }

    pub fn identity_id(&self) -> &str {
        self.0
            .strip_prefix(SESSION_NAMESPACE)
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|rest| rest.rsplit_once(':'))
            .map_or("", |(identity, _)| identity)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        SessionId::parse(&raw).ok_or_else(|| format!("malformed session id '{}'", raw))
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Session record stored in the shared cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub identity_id: String,
    pub expires_at: DateTime<Utc>,
    /// Opaque payload owned by the caller.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Session {
    pub fn new(identity_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Session {
            identity_id: identity_id.into(),
            expires_at,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
