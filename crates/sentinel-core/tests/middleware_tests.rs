use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use sentinel_core::auth::rbac::{Permission, Role};
use sentinel_core::middleware::{
    rate_limit, require_access_token, require_permission, require_roles,
    track_request_duration, AuthClaims,
};
use sentinel_core::store::IdentityStore;
use sentinel_core::testing::{test_config, TestSentinel};
use tower::ServiceExt;

const SECURITY_ADMINS: &[Role] = &[Role::Admin, Role::SecAdmin];

async fn whoami(AuthClaims(claims): AuthClaims) -> String {
    format!("{}:{}", claims.sub, claims.role)
}

fn app(t: &TestSentinel) -> Router {
    let guards = t.sentinel.guard_state();

    let admin = Router::new()
        .route("/admin/ping", get(|| async { "pong" }))
        .route_layer(from_fn(require_roles(SECURITY_ADMINS)))
        .route_layer(from_fn_with_state(guards.clone(), require_access_token));

    let audit = Router::new()
        .route("/audit", get(|| async { "entries" }))
        .route_layer(from_fn_with_state(
            guards.clone(),
            require_permission(Permission::ViewAuditLogs),
        ))
        .route_layer(from_fn_with_state(guards.clone(), require_access_token));

    Router::new()
        .route("/me", get(whoami))
        .route_layer(from_fn_with_state(guards.clone(), require_access_token))
        .merge(admin)
        .merge(audit)
        .route("/public", get(|| async { "hello" }))
        .layer(from_fn_with_state(guards.clone(), track_request_duration))
        .layer(from_fn_with_state(guards, rate_limit))
}

fn peer(address: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(address.parse().unwrap(), 40000))
}

fn get_request(uri: &str, address: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).extension(peer(address));
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn error_code(response: Response) -> String {
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["success"], false);
    body["error"]["code"].as_str().unwrap().to_string()
}

/// Register, optionally promote, and log in. Returns the access token.
async fn token_for(t: &TestSentinel, email: &str, role: Role) -> (String, String) {
    let id = t.register(email, "Passw0rd1").await.unwrap().id;
    if role != Role::User {
        t.sentinel
            .security
            .change_role(&id, role, "admin-0")
            .await
            .unwrap();
    }
    let session = t.login(email, "Passw0rd1").await.unwrap();
    (id, session.tokens.access_token)
}

#[tokio::test]
async fn test_valid_token_reaches_handler() {
    let t = TestSentinel::new();
    let (id, token) = token_for(&t, "a@x.com", Role::User).await;

    let response = app(&t)
        .oneshot(get_request("/me", "203.0.113.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, format!("{}:user", id));
}

#[tokio::test]
async fn test_missing_or_bad_token_is_401() {
    let t = TestSentinel::new();
    let (_, access) = token_for(&t, "a@x.com", Role::User).await;
    let refresh = t.login("a@x.com", "Passw0rd1").await.unwrap().tokens.refresh_token;

    let cases = [
        get_request("/me", "203.0.113.1", None),
        get_request("/me", "203.0.113.2", Some("garbage")),
        // A refresh token is not an access token.
        get_request("/me", "203.0.113.3", Some(&refresh)),
        Request::builder()
            .uri("/me")
            .extension(peer("203.0.113.4"))
            .header(header::AUTHORIZATION, format!("Basic {}", access))
            .body(Body::empty())
            .unwrap(),
    ];
    for request in cases {
        let response = app(&t).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn test_revoked_session_is_401() {
    let t = TestSentinel::new();
    let (id, token) = token_for(&t, "a@x.com", Role::User).await;
    t.sentinel.security.force_logout(&id, "admin-0").await.unwrap();

    let response = app(&t)
        .oneshot(get_request("/me", "203.0.113.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_gate() {
    let t = TestSentinel::new();
    let (_, user) = token_for(&t, "user@x.com", Role::User).await;
    let (_, moderator) = token_for(&t, "mod@x.com", Role::Moderator).await;
    let (_, sec_admin) = token_for(&t, "sec@x.com", Role::SecAdmin).await;

    for (token, expected) in [
        (&user, StatusCode::FORBIDDEN),
        (&moderator, StatusCode::FORBIDDEN),
        (&sec_admin, StatusCode::OK),
    ] {
        let response = app(&t)
            .oneshot(get_request("/admin/ping", "203.0.113.1", Some(token)))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }

    let response = app(&t)
        .oneshot(get_request("/admin/ping", "203.0.113.1", Some(&user)))
        .await
        .unwrap();
    assert_eq!(error_code(response).await, "FORBIDDEN");
}

#[tokio::test]
async fn test_permission_gate() {
    let t = TestSentinel::new();
    let (_, user) = token_for(&t, "user@x.com", Role::User).await;
    let (_, support) = token_for(&t, "support@x.com", Role::Support).await;
    let (_, admin) = token_for(&t, "admin@x.com", Role::Admin).await;
    let (_, monitor) = token_for(&t, "mon@x.com", Role::SysMonitor).await;

    for (token, expected) in [
        (&user, StatusCode::FORBIDDEN),
        (&monitor, StatusCode::FORBIDDEN),
        (&support, StatusCode::OK),
        (&admin, StatusCode::OK),
    ] {
        let response = app(&t)
            .oneshot(get_request("/audit", "203.0.113.1", Some(token)))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
async fn test_rate_limit_runs_before_authentication() {
    let t = TestSentinel::new();
    let app = app(&t);

    // Limit is 5 per window in the test configuration.
    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(get_request("/me", "198.51.100.7", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = app
        .clone()
        .oneshot(get_request("/me", "198.51.100.7", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(response).await, "TOO_MANY_REQUESTS");

    // Another address still gets through.
    let response = app
        .oneshot(get_request("/public", "198.51.100.8", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(t.sentinel.metrics.snapshot().rate_limited_requests, 1);
}

#[tokio::test]
async fn test_forwarded_headers_do_not_split_the_peer_counter() {
    let t = TestSentinel::new();
    let app = app(&t);

    let mut allowed = 0;
    for i in 0..20 {
        let request = Request::builder()
            .uri("/public")
            .extension(peer("198.51.100.7"))
            .header("X-Forwarded-For", format!("10.0.0.{}", i))
            .header("X-Real-IP", format!("10.0.1.{}", i))
            .body(Body::empty())
            .unwrap();
        if app.clone().oneshot(request).await.unwrap().status() == StatusCode::OK {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 5);
}

#[tokio::test]
async fn test_trusted_proxy_keys_on_forwarded_address() {
    let mut config = test_config();
    config.trust_forwarded_headers = true;
    let t = TestSentinel::with_config(config);
    let app = app(&t);

    // Every request arrives from the proxy; clients are told apart by header.
    let from_client = |client: &str| {
        Request::builder()
            .uri("/public")
            .extension(peer("192.0.2.100"))
            .header("X-Forwarded-For", format!("{}, 192.0.2.100", client))
            .body(Body::empty())
            .unwrap()
    };
    for _ in 0..5 {
        let response = app.clone().oneshot(from_client("203.0.113.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(from_client("203.0.113.9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app.oneshot(from_client("203.0.113.10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_request_durations_are_observed() {
    let t = TestSentinel::new();
    let app = app(&t);
    for address in ["192.0.2.1", "192.0.2.2"] {
        app.clone()
            .oneshot(get_request("/public", address, None))
            .await
            .unwrap();
    }
    assert_eq!(t.sentinel.metrics.snapshot().requests_observed, 2);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = TestSentinel::new();
    t.register("a@x.com", "Passw0rd1").await.unwrap();
    t.register("b@x.com", "Passw0rd1").await.unwrap();
    let b = t.identities.find_by_email("b@x.com").await.unwrap().unwrap();
    t.sentinel.security.block(&b.id, "admin-0", "abuse").await.unwrap();
    let _ = t.login("a@x.com", "wrong").await;
    t.sentinel
        .metrics
        .observe_request_duration(std::time::Duration::from_millis(5));

    let response = t
        .sentinel
        .metrics_router()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4"
    );

    let body = body_string(response).await;
    assert!(body.contains("sentinel_login_attempts_total 1"));
    assert!(body.contains("sentinel_failed_logins_total 1"));
    assert!(body.contains("sentinel_blocked_identities 1"));
    assert!(body.contains("# TYPE sentinel_request_duration_seconds histogram"));
}
