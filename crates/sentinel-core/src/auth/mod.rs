pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod rbac;
pub mod session;
pub mod totp;

pub use jwt::{Claims, TokenError, TokenKind, TokenManager, TokenPair};
pub use password::{
    hash_password, hash_password_async, validate_password_strength, verify_password,
    verify_password_async,
};
pub use rate_limit::{Admission, RateLimiter};
pub use rbac::{require_any_role, Permission, Role, RolePolicy};
pub use session::SessionStore;
pub use totp::{generate_secure_token, hash_token, SecondFactor, TotpSecondFactor};
