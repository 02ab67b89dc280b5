use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::auth::jwt::TokenManager;
use crate::auth::rate_limit::RateLimiter;
use crate::auth::rbac::RolePolicy;
use crate::auth::session::SessionStore;
use crate::auth::totp::{SecondFactor, TotpSecondFactor};
use crate::cache::CacheService;
use crate::config::Config;
use crate::error::SentinelError;
use crate::metrics::Metrics;
use crate::middleware::GuardState;
use crate::notify::{LogNotifier, Notifier};
use crate::oauth::OAuthProvider;
use crate::services::{AccountLinks, AuthDependencies, AuthService, MonitoringService, SecurityService};
use crate::store::{
    AuditLogStore, IdentityStore, InMemoryAuditLogStore, InMemoryIdentityStore,
    InMemorySecurityLogStore, SecurityLogStore,
};

/// Storage and delivery backends, chosen by the embedding application.
pub struct Backends {
    pub identities: Arc<dyn IdentityStore>,
    pub security_log: Arc<dyn SecurityLogStore>,
    pub audit_log: Arc<dyn AuditLogStore>,
    pub cache: CacheService,
    pub notifier: Arc<dyn Notifier>,
    pub second_factor: Arc<dyn SecondFactor>,
    pub oauth: Option<Arc<dyn OAuthProvider>>,
}

impl Backends {
    /// In-memory stores and cache, log-only notifier, TOTP second factor.
    pub fn in_memory(config: &Config) -> Self {
        Backends {
            identities: Arc::new(InMemoryIdentityStore::new()),
            security_log: Arc::new(InMemorySecurityLogStore::new()),
            audit_log: Arc::new(InMemoryAuditLogStore::new()),
            cache: CacheService::in_memory(),
            notifier: Arc::new(LogNotifier),
            second_factor: Arc::new(TotpSecondFactor::new(config.issuer.clone())),
            oauth: None,
        }
    }
}

/// The assembled security core.
///
/// Built once at startup. Everything inside is cheap to clone and shares
/// the same stores, cache and metrics sink.
#[derive(Clone)]
pub struct Sentinel {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub tokens: Arc<TokenManager>,
    pub policy: Arc<RolePolicy>,
    pub sessions: SessionStore,
    pub rate_limiter: RateLimiter,
    pub security: SecurityService,
    pub auth: AuthService,
    pub monitoring: MonitoringService,
}

impl Sentinel {
    /// Wire every component from `config` and `backends`. The configuration
    /// is validated first.
    pub fn new(config: Config, backends: Backends) -> Result<Self, SentinelError> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new());
        let tokens = Arc::new(TokenManager::from_config(&config));
        let policy = Arc::new(config.role_policy.clone());
        let sessions = SessionStore::new(backends.cache.clone());
        let rate_limiter = RateLimiter::new(
            backends.cache.clone(),
            metrics.clone(),
            config.rate_limit_max_requests,
            config.rate_limit_window,
        );
        let security = SecurityService::new(
            backends.identities.clone(),
            backends.security_log.clone(),
            sessions.clone(),
            config.lockout_threshold,
        )
        .with_suspicious_threshold(config.suspicious_activity_threshold);
        let auth = AuthService::new(AuthDependencies {
            identities: backends.identities.clone(),
            audit_log: backends.audit_log,
            tokens: tokens.clone(),
            sessions: sessions.clone(),
            security: security.clone(),
            second_factor: backends.second_factor,
            notifier: backends.notifier,
            oauth: backends.oauth,
            metrics: metrics.clone(),
            links: AccountLinks {
                public_base_url: config.public_base_url.clone(),
                password_reset_ttl: config.password_reset_ttl,
                email_verification_ttl: config.email_verification_ttl,
            },
        });
        let monitoring =
            MonitoringService::new(metrics.clone(), backends.identities, backends.security_log);

        tracing::info!(
            environment = %config.environment,
            issuer = %config.issuer,
            "sentinel initialized"
        );

        Ok(Sentinel {
            config: Arc::new(config),
            metrics,
            tokens,
            policy,
            sessions,
            rate_limiter,
            security,
            auth,
            monitoring,
        })
    }

    /// Everything in memory. For development and tests.
    pub fn in_memory(config: Config) -> Result<Self, SentinelError> {
        let backends = Backends::in_memory(&config);
        Self::new(config, backends)
    }

    /// Connect the shared cache named by `REDIS_URL`, or fall back to the
    /// in-memory cache outside production.
    pub async fn connect_cache(config: &Config) -> Result<CacheService, SentinelError> {
        #[cfg(feature = "redis")]
        if let Some(ref redis_url) = config.redis_url {
            match crate::cache::RedisCache::new(redis_url).await {
                Ok(redis_cache) => {
                    tracing::info!("Redis cache connected");
                    return Ok(CacheService::new(redis_cache));
                }
                Err(e) if config.is_production() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Redis connection failed, falling back to in-memory cache: {}",
                        e
                    );
                }
            }
        }
        if config.is_production() {
            // Per-process counters would multiply the rate limit by the
            // number of replicas.
            tracing::warn!("Using in-memory cache in production");
        } else {
            tracing::info!("Using in-memory cache");
        }
        Ok(CacheService::in_memory())
    }

    pub fn guard_state(&self) -> GuardState {
        GuardState {
            auth: self.auth.clone(),
            rate_limiter: self.rate_limiter.clone(),
            policy: self.policy.clone(),
            metrics: self.metrics.clone(),
            trust_forwarded_headers: self.config.trust_forwarded_headers,
        }
    }

    /// `GET /metrics` in the Prometheus text format.
    pub fn metrics_router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render_metrics))
            .with_state(self.monitoring.clone())
    }
}

async fn render_metrics(State(monitoring): State<MonitoringService>) -> impl IntoResponse {
    if let Err(e) = monitoring.refresh_identity_counts().await {
        tracing::warn!(error = %e, "identity gauges not refreshed");
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        monitoring.render_prometheus(),
    )
}
