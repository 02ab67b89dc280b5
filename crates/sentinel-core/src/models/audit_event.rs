use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ClientInfo;

/// Account action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "login")]
    Login,
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "password_change")]
    PasswordChange,
    #[serde(rename = "email_verify")]
    EmailVerify,
    #[serde(rename = "2fa_enable")]
    TwoFactorEnable,
    #[serde(rename = "2fa_disable")]
    TwoFactorDisable,
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub identity_id: String,
    pub action: AuditAction,
    pub success: bool,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        identity_id: impl Into<String>,
        action: AuditAction,
        success: bool,
        client: ClientInfo,
        created_at: DateTime<Utc>,
    ) -> Self {
        AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: identity_id.into(),
            action,
            success,
            client,
            details: None,
            created_at,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_factor_actions_use_wire_names() {
        assert_eq!(
            serde_json::to_string(&AuditAction::TwoFactorEnable).unwrap(),
            "\"2fa_enable\""
        );
        assert_eq!(
            serde_json::to_string(&AuditAction::PasswordChange).unwrap(),
            "\"password_change\""
        );
    }
}
