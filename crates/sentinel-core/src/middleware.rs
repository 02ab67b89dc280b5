//! Request guards for axum routers.
//!
//! The pipeline for a protected route is rate limit → access token →
//! role or permission check → handler.
//!
//! # Usage
//!
//! ```rust,ignore
//! use axum::middleware::{from_fn, from_fn_with_state};
//! use sentinel_core::middleware::{rate_limit, require_access_token, require_permission};
//!
//! let guards = sentinel.guard_state();
//! Router::new()
//!     .route("/admin/users/{id}/block", post(block_user))
//!     .route_layer(from_fn_with_state(guards.clone(), require_permission(Permission::UserBlock)))
//!     .route_layer(from_fn_with_state(guards.clone(), require_access_token))
//!     .layer(from_fn_with_state(guards, rate_limit))
//! ```
//!
//! Layers added later run first, so the rate limiter above sees every
//! request before any token is parsed.
//!
//! Serve the router with `into_make_service_with_connect_info::<SocketAddr>()`
//! so the rate limiter can key on the peer address.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::jwt::Claims;
use crate::auth::rate_limit::{Admission, RateLimiter};
use crate::auth::rbac::{require_any_role, Permission, Role, RolePolicy};
use crate::error::SentinelError;
use crate::metrics::Metrics;
use crate::models::ClientInfo;
use crate::services::AuthService;

type GuardFuture = Pin<Box<dyn Future<Output = Result<Response, SentinelError>> + Send>>;

/// Shared state for every guard.
#[derive(Clone)]
pub struct GuardState {
    pub auth: AuthService,
    pub rate_limiter: RateLimiter,
    pub policy: Arc<RolePolicy>,
    pub metrics: Arc<Metrics>,
    /// Key on `X-Forwarded-For` / `X-Real-IP` instead of the peer address.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,
}

/// Address used as the rate-limit key.
///
/// The peer address from `ConnectInfo` unless `trust_forwarded_headers` is
/// set, in which case the first `X-Forwarded-For` hop (then `X-Real-IP`)
/// wins and the peer address is the fallback.
pub fn client_address(req: &Request, trust_forwarded_headers: bool) -> Option<String> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    if !trust_forwarded_headers {
        return peer;
    }
    ClientInfo::from_headers(req.headers()).address.or(peer)
}

/// Fixed-window admission gate; 429 on deny.
pub async fn rate_limit(
    State(state): State<GuardState>,
    req: Request,
    next: Next,
) -> Result<Response, SentinelError> {
    let address = client_address(&req, state.trust_forwarded_headers)
        .unwrap_or_else(|| "unknown".to_string());

    match state.rate_limiter.admit(&address).await? {
        Admission::Allow => Ok(next.run(req).await),
        Admission::Deny => Err(SentinelError::TooManyRequests),
    }
}

fn bearer_token(req: &Request) -> Result<&str, SentinelError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| SentinelError::Unauthorized("Missing Authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            SentinelError::Unauthorized("Invalid Authorization header format".to_string())
        })
}

/// Validate the bearer token as an access token and put its [`Claims`] in
/// the request extensions.
pub async fn require_access_token(
    State(state): State<GuardState>,
    mut req: Request,
    next: Next,
) -> Result<Response, SentinelError> {
    let token = bearer_token(&req)?.to_string();
    let claims = state.auth.authenticate(&token).await?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

fn claims_of(req: &Request) -> Result<&Claims, SentinelError> {
    req.extensions().get::<Claims>().ok_or_else(|| {
        SentinelError::Unauthorized("No authenticated identity on request".to_string())
    })
}

/// Route-level gate: the token's role must be one of `allowed`. Layer it
/// inside [`require_access_token`].
pub fn require_roles(
    allowed: &'static [Role],
) -> impl Fn(Request, Next) -> GuardFuture + Clone + Send {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let role = claims_of(&req)?.role;
            if !require_any_role(role, allowed) {
                return Err(SentinelError::Forbidden(format!(
                    "Role '{}' is not allowed here",
                    role
                )));
            }
            Ok(next.run(req).await)
        })
    }
}

/// Permission gate against the configured role table. Layer it inside
/// [`require_access_token`].
pub fn require_permission(
    permission: Permission,
) -> impl Fn(State<GuardState>, Request, Next) -> GuardFuture + Clone + Send {
    move |State(state): State<GuardState>, req: Request, next: Next| {
        Box::pin(async move {
            let role = claims_of(&req)?.role;
            state.policy.ensure(role, permission)?;
            Ok(next.run(req).await)
        })
    }
}

/// Observe handler latency into the request-duration histogram.
pub async fn track_request_duration(
    State(state): State<GuardState>,
    req: Request,
    next: Next,
) -> Response {
    let started = tokio::time::Instant::now();
    let response = next.run(req).await;
    state.metrics.observe_request_duration(started.elapsed());
    response
}

/// Handler extractor for the claims placed by [`require_access_token`].
pub struct AuthClaims(pub Claims);

impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
{
    type Rejection = SentinelError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthClaims)
            .ok_or_else(|| {
                SentinelError::Unauthorized("No authenticated identity on request".to_string())
            })
    }
}
