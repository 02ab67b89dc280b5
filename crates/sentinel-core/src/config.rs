use std::time::Duration;

use crate::auth::rbac::RolePolicy;
use crate::error::SentinelError;

/// Longest token lifetime `validate` accepts: one year.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Process-wide configuration, loaded once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signing secret for access tokens.
    pub access_secret: String,

    /// Signing secret for refresh tokens. Must differ from `access_secret`.
    pub refresh_secret: String,

    /// Access token lifetime (default: 15 minutes).
    pub access_ttl: Duration,

    /// Refresh token lifetime (default: 7 days).
    pub refresh_ttl: Duration,

    /// `iss` claim written into and required from every token.
    pub issuer: String,

    /// Fixed rate-limit window (default: 60s).
    pub rate_limit_window: Duration,

    /// Requests admitted per address per window (default: 100).
    pub rate_limit_max_requests: u64,

    /// Failed logins that trigger an automatic block (default: 5).
    pub lockout_threshold: u32,

    /// Events of kind `suspicious_activity` in 24h that flag an identity.
    pub suspicious_activity_threshold: u32,

    /// Password reset token lifetime (default: 24h).
    pub password_reset_ttl: Duration,

    /// Email verification token lifetime (default: 24h).
    pub email_verification_ttl: Duration,

    /// Base URL used to build links in outbound notifications.
    pub public_base_url: String,

    /// Rate-limit on forwarding headers rather than the peer address
    /// (default: false). Enable only behind a trusted reverse proxy.
    pub trust_forwarded_headers: bool,

    /// Redis URL for the shared cache (optional, e.g. redis://127.0.0.1:6379)
    pub redis_url: Option<String>,

    /// Environment: development, production, test
    pub environment: String,

    /// Role → permission table.
    pub role_policy: RolePolicy,
}

impl Config {
    /// Load configuration from environment variables (with .env support).
    pub fn from_env() -> Result<Self, SentinelError> {
        // Load .env file if present (ignore errors if missing)
        let _ = dotenvy::dotenv();

        let role_policy = match std::env::var("ROLE_PERMISSIONS") {
            Ok(raw) if !raw.trim().is_empty() => RolePolicy::from_json(&raw)?,
            _ => RolePolicy::default(),
        };

        Ok(Config {
            access_secret: std::env::var("JWT_ACCESS_SECRET")
                .unwrap_or_else(|_| "sentinel-dev-access-secret-change-me".to_string()),
            refresh_secret: std::env::var("JWT_REFRESH_SECRET")
                .unwrap_or_else(|_| "sentinel-dev-refresh-secret-change-me".to_string()),
            access_ttl: env_secs("JWT_ACCESS_TTL_SECS", 15 * 60),
            refresh_ttl: env_secs("JWT_REFRESH_TTL_SECS", 7 * 24 * 3600),
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "sentinel".to_string()),
            rate_limit_window: env_secs("RATE_LIMIT_WINDOW_SECS", 60),
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 100),
            lockout_threshold: env_parse("LOCKOUT_THRESHOLD", 5),
            suspicious_activity_threshold: env_parse("SUSPICIOUS_ACTIVITY_THRESHOLD", 3),
            password_reset_ttl: env_secs("PASSWORD_RESET_TTL_SECS", 24 * 3600),
            email_verification_ttl: env_secs("EMAIL_VERIFICATION_TTL_SECS", 24 * 3600),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            trust_forwarded_headers: env_parse("TRUST_FORWARDED_HEADERS", false),
            redis_url: std::env::var("REDIS_URL").ok(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            role_policy,
        })
    }

    /// Reject configurations that would weaken token separation or disable
    /// a protection outright.
    pub fn validate(&self) -> Result<(), SentinelError> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            return Err(SentinelError::Validation(
                "JWT secrets must not be empty".to_string(),
            ));
        }
        if self.access_secret == self.refresh_secret {
            return Err(SentinelError::Validation(
                "Access and refresh secrets must differ".to_string(),
            ));
        }
        if self.access_ttl.is_zero() || self.refresh_ttl.is_zero() {
            return Err(SentinelError::Validation(
                "Token TTLs must be non-zero".to_string(),
            ));
        }
        if self.access_ttl > MAX_TOKEN_TTL || self.refresh_ttl > MAX_TOKEN_TTL {
            return Err(SentinelError::Validation(
                "Token TTLs must not exceed one year".to_string(),
            ));
        }
        if self.refresh_ttl < self.access_ttl {
            return Err(SentinelError::Validation(
                "Refresh TTL must not be shorter than access TTL".to_string(),
            ));
        }
        if self.rate_limit_window.is_zero() || self.rate_limit_max_requests == 0 {
            return Err(SentinelError::Validation(
                "Rate limit window and maximum must be non-zero".to_string(),
            ));
        }
        if self.lockout_threshold == 0 {
            return Err(SentinelError::Validation(
                "Lockout threshold must be at least 1".to_string(),
            ));
        }
        if self.is_production() && self.access_secret.starts_with("sentinel-dev-") {
            return Err(SentinelError::Validation(
                "Development secrets are not allowed in production".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if running in development mode.
    pub fn is_dev(&self) -> bool {
        self.environment == "development"
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key, default))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[test]
    fn test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn shared_secrets_are_rejected() {
        let mut config = test_config();
        config.refresh_secret = config.access_secret.clone();
        assert!(matches!(
            config.validate(),
            Err(SentinelError::Validation(_))
        ));
    }

    #[test]
    fn refresh_ttl_must_cover_access_ttl() {
        let mut config = test_config();
        config.refresh_ttl = Duration::from_secs(10);
        config.access_ttl = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_ttls_are_rejected() {
        let mut config = test_config();
        config.refresh_ttl = Duration::from_secs(u64::MAX);
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.refresh_ttl = MAX_TOKEN_TTL;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_lockout_threshold_is_rejected() {
        let mut config = test_config();
        config.lockout_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn dev_secrets_rejected_in_production() {
        let mut config = test_config();
        config.environment = "production".to_string();
        config.access_secret = "sentinel-dev-access-secret-change-me".to_string();
        assert!(config.validate().is_err());
        assert!(!config.is_dev());
    }
}
