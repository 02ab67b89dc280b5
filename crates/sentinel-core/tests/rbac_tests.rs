use sentinel_core::auth::rbac::{require_any_role, Permission, Role, RolePolicy};

const EVERY_PERMISSION: [Permission; 12] = [
    Permission::UserBlock,
    Permission::UserUnblock,
    Permission::ViewAuditLogs,
    Permission::ViewSecurityLogs,
    Permission::ManageRoles,
    Permission::ViewUserDetails,
    Permission::ResetUserPassword,
    Permission::ViewAnalytics,
    Permission::ExportData,
    Permission::ViewMetrics,
    Permission::ViewLogs,
    Permission::ViewAlerts,
];

#[test]
fn test_wildcard_role_is_authorized_for_everything() {
    let policy = RolePolicy::default();
    for permission in EVERY_PERMISSION {
        assert!(policy.authorize(Role::Admin, permission), "{:?}", permission);
    }
}

#[test]
fn test_empty_role_is_denied_everything() {
    let policy = RolePolicy::default();
    for role in [Role::User, Role::Premium] {
        for permission in EVERY_PERMISSION {
            assert!(!policy.authorize(role, permission));
        }
        assert!(!policy.authorize(role, Permission::All));
    }
}

#[test]
fn test_exact_permission_match() {
    let policy = RolePolicy::default();
    assert!(policy.authorize(Role::Support, Permission::ResetUserPassword));
    assert!(!policy.authorize(Role::Support, Permission::UserBlock));
    assert!(policy.authorize(Role::SysMonitor, Permission::ViewAlerts));
    assert!(!policy.authorize(Role::SysMonitor, Permission::ViewAuditLogs));
    assert!(policy.authorize(Role::Analyst, Permission::ExportData));
}

#[test]
fn test_custom_table_replaces_defaults() {
    let policy = RolePolicy::from_grants([(Role::Premium, vec![Permission::ViewAnalytics])]);
    assert!(policy.authorize(Role::Premium, Permission::ViewAnalytics));
    // Roles missing from the table hold nothing, admin included.
    assert!(!policy.authorize(Role::Admin, Permission::ViewAnalytics));
}

#[test]
fn test_require_any_role_is_exact_match() {
    let allowed = [Role::Admin, Role::SecAdmin];
    assert!(require_any_role(Role::Admin, &allowed));
    assert!(require_any_role(Role::SecAdmin, &allowed));
    // No hierarchy: a moderator is not a security admin.
    assert!(!require_any_role(Role::Moderator, &allowed));
    assert!(!require_any_role(Role::User, &[]));
}
