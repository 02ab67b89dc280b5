//! Test harness: a fully wired [`Sentinel`] over in-memory backends, with
//! handles on the stores so tests can inspect what was written.
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn login_works() {
//!     let t = TestSentinel::new();
//!     t.register("a@x.com", "Passw0rd1").await.unwrap();
//!     let session = t.login("a@x.com", "Passw0rd1").await.unwrap();
//!     assert_eq!(session.tokens.token_type, "Bearer");
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::app::{Backends, Sentinel};
use crate::auth::rbac::RolePolicy;
use crate::auth::totp::TotpSecondFactor;
use crate::cache::{CacheService, InMemoryCache};
use crate::config::Config;
use crate::error::SentinelError;
use crate::models::{ClientInfo, IdentityResponse};
use crate::notify::RecordingNotifier;
use crate::oauth::{OAuthProvider, UserInfo};
use crate::services::{AuthResponse, LoginRequest, RegisterRequest};
use crate::store::{InMemoryAuditLogStore, InMemoryIdentityStore, InMemorySecurityLogStore};

/// Valid configuration with distinct secrets and test-friendly limits.
pub fn test_config() -> Config {
    Config {
        access_secret: "test-access-secret-0123456789abcdef".to_string(),
        refresh_secret: "test-refresh-secret-fedcba9876543210".to_string(),
        access_ttl: Duration::from_secs(15 * 60),
        refresh_ttl: Duration::from_secs(7 * 24 * 3600),
        issuer: "sentinel-test".to_string(),
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max_requests: 5,
        lockout_threshold: 5,
        suspicious_activity_threshold: 3,
        password_reset_ttl: Duration::from_secs(3600),
        email_verification_ttl: Duration::from_secs(3600),
        public_base_url: "http://sentinel.test".to_string(),
        trust_forwarded_headers: false,
        redis_url: None,
        environment: "test".to_string(),
        role_policy: RolePolicy::default(),
    }
}

/// Client metadata used by the harness helpers.
pub fn test_client() -> ClientInfo {
    ClientInfo::new("198.51.100.10", "sentinel-tests/1.0")
}

/// OAuth provider answering from a fixed code → profile table.
#[derive(Debug, Clone, Default)]
pub struct StaticOAuthProvider {
    profiles: HashMap<String, UserInfo>,
}

impl StaticOAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, code: &str, email: &str, display_name: &str) -> Self {
        self.profiles.insert(
            code.to_string(),
            UserInfo {
                subject: format!("static-{}", code),
                email: email.to_string(),
                display_name: display_name.to_string(),
                provider: "static".to_string(),
            },
        );
        self
    }
}

#[async_trait::async_trait]
impl OAuthProvider for StaticOAuthProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!("http://oauth.test/authorize?state={}", state)
    }

    async fn exchange(&self, code: &str) -> Result<UserInfo, SentinelError> {
        self.profiles
            .get(code)
            .cloned()
            .ok_or_else(|| SentinelError::Unauthorized("Unknown authorization code".to_string()))
    }
}

/// A [`Sentinel`] wired to in-memory backends, plus handles on them.
pub struct TestSentinel {
    pub sentinel: Sentinel,
    pub config: Config,
    pub identities: InMemoryIdentityStore,
    pub security_log: InMemorySecurityLogStore,
    pub audit_log: InMemoryAuditLogStore,
    pub cache: InMemoryCache,
    pub notifier: RecordingNotifier,
    pub second_factor: TotpSecondFactor,
}

impl TestSentinel {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, None)
    }

    pub fn with_oauth(provider: StaticOAuthProvider) -> Self {
        Self::build(test_config(), Some(Arc::new(provider)))
    }

    fn build(config: Config, oauth: Option<Arc<dyn OAuthProvider>>) -> Self {
        crate::logging::try_init_test_logging();

        let identities = InMemoryIdentityStore::new();
        let security_log = InMemorySecurityLogStore::new();
        let audit_log = InMemoryAuditLogStore::new();
        let cache = InMemoryCache::new();
        let notifier = RecordingNotifier::new();
        let second_factor = TotpSecondFactor::new(config.issuer.clone());

        let backends = Backends {
            identities: Arc::new(identities.clone()),
            security_log: Arc::new(security_log.clone()),
            audit_log: Arc::new(audit_log.clone()),
            cache: CacheService::new(cache.clone()),
            notifier: Arc::new(notifier.clone()),
            second_factor: Arc::new(second_factor.clone()),
            oauth,
        };
        let sentinel =
            Sentinel::new(config.clone(), backends).expect("test configuration must be valid");

        TestSentinel {
            sentinel,
            config,
            identities,
            security_log,
            audit_log,
            cache,
            notifier,
            second_factor,
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
    ) -> Result<IdentityResponse, SentinelError> {
        self.sentinel
            .auth
            .register(
                RegisterRequest {
                    email: email.to_string(),
                    password: password.to_string(),
                },
                &test_client(),
            )
            .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, SentinelError> {
        self.login_with_code(email, password, None).await
    }

    pub async fn login_with_code(
        &self,
        email: &str,
        password: &str,
        totp_code: Option<String>,
    ) -> Result<AuthResponse, SentinelError> {
        self.sentinel
            .auth
            .login(
                LoginRequest {
                    email: email.to_string(),
                    password: password.to_string(),
                    totp_code,
                },
                &test_client(),
            )
            .await
    }
}

impl Default for TestSentinel {
    fn default() -> Self {
        Self::new()
    }
}
