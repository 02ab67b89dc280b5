//! Tracing subscriber setup.
//!
//! Sentinel itself only emits `tracing` events; the embedding binary picks
//! a format once at startup. The level comes from `RUST_LOG` when set:
//!
//! ```bash
//! RUST_LOG=sentinel_core=debug,info ./server
//! ```
//!
//! Security-relevant transitions (blocks, unblocks, lockouts, role
//! changes) are logged at `warn`/`info`; rejected credentials at `info`
//! without the reason a caller would see.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Human-readable logs at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Like [`init_logging`] with a different default level.
pub fn init_logging_with_level(level: &str) {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// One JSON object per event, for log aggregation in production.
pub fn init_logging_json() {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Install a test subscriber if none is set yet. Safe to call from every
/// test.
pub fn try_init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(filter("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
