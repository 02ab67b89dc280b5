//! Sentinel: token, session, rate-limit and account-security core.
//!
//! Components, leaf first:
//!
//! - [`auth::password`]: Argon2id hashing
//! - [`auth::jwt`]: typed access/refresh tokens with separate secrets
//! - [`auth::session`]: TTL-bound sessions in the shared cache
//! - [`auth::rate_limit`]: fixed-window admission per client address
//! - [`auth::rbac`]: role → permission table
//! - [`services::SecurityService`]: block/unblock and automatic lockout
//! - [`metrics::Metrics`]: the monitoring sink, passed explicitly
//!
//! [`Sentinel`] wires them together from a [`Config`] and a set of
//! injected [`app::Backends`].

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod oauth;
pub mod services;
pub mod store;
pub mod testing;

pub use app::{Backends, Sentinel};
pub use cache::CacheService;
pub use config::Config;
pub use error::SentinelError;
pub use metrics::Metrics;
pub use testing::TestSentinel;
