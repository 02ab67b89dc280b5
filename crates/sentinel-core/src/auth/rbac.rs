//! Role-Based Access Control.
//!
//! A static role → permission table, loaded once with the configuration.
//! Two checks are offered:
//!
//! - [`RolePolicy::authorize`]: permission-level, honours the `*` wildcard.
//! - [`require_any_role`]: route-level, exact role match against an
//!   allow-list. Roles do not inherit from each other.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sentinel_core::auth::rbac::{Permission, Role};
//!
//! if policy.authorize(claims.role, Permission::UserBlock) {
//!     // ...
//! }
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// Identity role. The serialized name is what tokens and the role table
/// carry on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    Premium,
    Support,
    Moderator,
    Analyst,
    SecAdmin,
    SysMonitor,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::User,
        Role::Admin,
        Role::Premium,
        Role::Support,
        Role::Moderator,
        Role::Analyst,
        Role::SecAdmin,
        Role::SysMonitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Premium => "premium",
            Role::Support => "support",
            Role::Moderator => "moderator",
            Role::Analyst => "analyst",
            Role::SecAdmin => "sec_admin",
            Role::SysMonitor => "sys_monitor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| SentinelError::Validation(format!("Unknown role '{}'", s)))
    }
}

/// Grantable permission. `All` (`"*"`) stands for every permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "user:block")]
    UserBlock,
    #[serde(rename = "user:unblock")]
    UserUnblock,
    #[serde(rename = "audit:view")]
    ViewAuditLogs,
    #[serde(rename = "security:view")]
    ViewSecurityLogs,
    #[serde(rename = "roles:manage")]
    ManageRoles,
    #[serde(rename = "user:view")]
    ViewUserDetails,
    #[serde(rename = "user:reset_password")]
    ResetUserPassword,
    #[serde(rename = "analytics:view")]
    ViewAnalytics,
    #[serde(rename = "data:export")]
    ExportData,
    #[serde(rename = "metrics:view")]
    ViewMetrics,
    #[serde(rename = "logs:view")]
    ViewLogs,
    #[serde(rename = "alerts:view")]
    ViewAlerts,
}

/// Role → permission table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    grants: HashMap<Role, HashSet<Permission>>,
}

impl Default for RolePolicy {
    fn default() -> Self {
        use Permission::*;

        RolePolicy::from_grants([
            (Role::Admin, vec![All]),
            (
                Role::SecAdmin,
                vec![
                    UserBlock,
                    UserUnblock,
                    ViewAuditLogs,
                    ViewSecurityLogs,
                    ManageRoles,
                ],
            ),
            (Role::Moderator, vec![UserBlock, UserUnblock, ViewAuditLogs]),
            (
                Role::Support,
                vec![ViewUserDetails, ResetUserPassword, ViewAuditLogs],
            ),
            (Role::Analyst, vec![ViewAnalytics, ViewAuditLogs, ExportData]),
            (Role::SysMonitor, vec![ViewMetrics, ViewLogs, ViewAlerts]),
        ])
    }
}

impl RolePolicy {
    /// Build a table from explicit grants. Roles not listed hold nothing.
    pub fn from_grants<I>(grants: I) -> Self
    where
        I: IntoIterator<Item = (Role, Vec<Permission>)>,
    {
        RolePolicy {
            grants: grants
                .into_iter()
                .map(|(role, perms)| (role, perms.into_iter().collect()))
                .collect(),
        }
    }

    /// Parse a table such as `{"admin": ["*"], "support": ["user:view"]}`.
    pub fn from_json(raw: &str) -> Result<Self, SentinelError> {
        let grants: HashMap<Role, Vec<Permission>> = serde_json::from_str(raw).map_err(|e| {
            SentinelError::Validation(format!("Invalid role permission table: {}", e))
        })?;
        Ok(RolePolicy::from_grants(grants))
    }

    /// Deny unless `role` holds the wildcard or exactly `required`.
    pub fn authorize(&self, role: Role, required: Permission) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|perms| perms.contains(&Permission::All) || perms.contains(&required))
    }

    /// Like [`authorize`](Self::authorize), but as a `Forbidden` error.
    pub fn ensure(&self, role: Role, required: Permission) -> Result<(), SentinelError> {
        if self.authorize(role, required) {
            Ok(())
        } else {
            Err(SentinelError::Forbidden(format!(
                "Role '{}' lacks permission {:?}",
                role, required
            )))
        }
    }

    pub fn permissions(&self, role: Role) -> Vec<Permission> {
        let mut perms: Vec<Permission> = self
            .grants
            .get(&role)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        perms.sort_by_key(|p| *p as u8);
        perms
    }
}

/// Exact role match against an allow-list.
pub fn require_any_role(role: Role, allowed: &[Role]) -> bool {
    allowed.contains(&role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_roles() {
        let policy = RolePolicy::default();
        assert!(policy.authorize(Role::Moderator, Permission::UserBlock));
        assert!(!policy.authorize(Role::Moderator, Permission::ManageRoles));
        assert!(policy.authorize(Role::SecAdmin, Permission::ManageRoles));
        assert!(!policy.authorize(Role::Premium, Permission::ViewAuditLogs));
        assert!(policy.permissions(Role::User).is_empty());
    }

    #[test]
    fn role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(
                serde_json::to_string(&role).unwrap(),
                format!("\"{}\"", role.as_str())
            );
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn from_json_parses_wire_names() {
        let policy = RolePolicy::from_json(r#"{"support": ["user:view", "*"]}"#).unwrap();
        assert!(policy.authorize(Role::Support, Permission::ExportData));
        assert!(!policy.authorize(Role::Admin, Permission::ViewMetrics));
    }

    #[test]
    fn from_json_rejects_unknown_permission() {
        assert!(matches!(
            RolePolicy::from_json(r#"{"support": ["user:delete"]}"#),
            Err(SentinelError::Validation(_))
        ));
    }

    #[test]
    fn ensure_maps_to_forbidden() {
        let policy = RolePolicy::default();
        assert!(policy.ensure(Role::Admin, Permission::ViewLogs).is_ok());
        assert!(matches!(
            policy.ensure(Role::User, Permission::ViewLogs),
            Err(SentinelError::Forbidden(_))
        ));
    }
}
