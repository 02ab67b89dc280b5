//! Monitoring sink.
//!
//! One [`Metrics`] is built at startup and handed to every component that
//! reports, behind an `Arc`. It owns a Prometheus recorder of its own that
//! is never installed globally, so separate instances never share series.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Counter,
    Gauge, Histogram,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const LOGIN_ATTEMPTS: &str = "sentinel_login_attempts_total";
const FAILED_LOGINS: &str = "sentinel_failed_logins_total";
const RATE_LIMITED_REQUESTS: &str = "sentinel_rate_limited_requests_total";
const ACTIVE_IDENTITIES: &str = "sentinel_active_identities";
const BLOCKED_IDENTITIES: &str = "sentinel_blocked_identities";
const REQUEST_DURATION: &str = "sentinel_request_duration_seconds";

/// Prometheus default histogram buckets, in seconds.
const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Counters, gauges and the request-duration histogram for the security core.
pub struct Metrics {
    handle: PrometheusHandle,
    login_attempts: Counter,
    failed_logins: Counter,
    rate_limited_requests: Counter,
    active_identities: Gauge,
    blocked_identities: Gauge,
    request_duration: Histogram,
    /// Recorder handles are write-only; these back [`Metrics::snapshot`].
    tally: Tally,
}

#[derive(Default)]
struct Tally {
    login_attempts: AtomicU64,
    failed_logins: AtomicU64,
    rate_limited_requests: AtomicU64,
    active_identities: AtomicI64,
    blocked_identities: AtomicI64,
    requests_observed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION.to_string()),
                &DEFAULT_BUCKETS,
            )
            // Only an empty bucket list is rejected.
            .unwrap_or_else(|_| PrometheusBuilder::new())
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(LOGIN_ATTEMPTS, "Login attempts, successful or not");
            describe_counter!(FAILED_LOGINS, "Rejected login attempts");
            describe_counter!(RATE_LIMITED_REQUESTS, "Requests denied by the rate limiter");
            describe_gauge!(ACTIVE_IDENTITIES, "Identities that are not blocked");
            describe_gauge!(BLOCKED_IDENTITIES, "Blocked identities");
            describe_histogram!(REQUEST_DURATION, "Latency of guarded requests in seconds");

            Metrics {
                handle,
                login_attempts: counter!(LOGIN_ATTEMPTS),
                failed_logins: counter!(FAILED_LOGINS),
                rate_limited_requests: counter!(RATE_LIMITED_REQUESTS),
                active_identities: gauge!(ACTIVE_IDENTITIES),
                blocked_identities: gauge!(BLOCKED_IDENTITIES),
                request_duration: histogram!(REQUEST_DURATION),
                tally: Tally::default(),
            }
        })
    }

    /// Count a login attempt; failures are also counted separately.
    pub fn record_login(&self, success: bool) {
        self.login_attempts.increment(1);
        self.tally.login_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_logins.increment(1);
            self.tally.failed_logins.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_requests.increment(1);
        self.tally
            .rate_limited_requests
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_identities(&self, count: u64) {
        self.active_identities.set(count as f64);
        self.tally
            .active_identities
            .store(count as i64, Ordering::Relaxed);
    }

    pub fn set_blocked_identities(&self, count: u64) {
        self.blocked_identities.set(count as f64);
        self.tally
            .blocked_identities
            .store(count as i64, Ordering::Relaxed);
    }

    pub fn observe_request_duration(&self, elapsed: Duration) {
        self.request_duration.record(elapsed.as_secs_f64());
        self.tally.requests_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tally = &self.tally;
        MetricsSnapshot {
            login_attempts: tally.login_attempts.load(Ordering::Relaxed),
            failed_logins: tally.failed_logins.load(Ordering::Relaxed),
            rate_limited_requests: tally.rate_limited_requests.load(Ordering::Relaxed),
            active_identities: tally.active_identities.load(Ordering::Relaxed),
            blocked_identities: tally.blocked_identities.load(Ordering::Relaxed),
            requests_observed: tally.requests_observed.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        self.handle.render()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the scalar metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub login_attempts: u64,
    pub failed_logins: u64,
    pub rate_limited_requests: u64,
    pub active_identities: i64,
    pub blocked_identities: i64,
    pub requests_observed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_counters() {
        let metrics = Metrics::new();
        metrics.record_login(true);
        metrics.record_login(false);
        metrics.record_login(false);
        let snap = metrics.snapshot();
        assert_eq!(snap.login_attempts, 3);
        assert_eq!(snap.failed_logins, 2);

        let text = metrics.render_prometheus();
        assert!(text.contains("sentinel_login_attempts_total 3"));
        assert!(text.contains("sentinel_failed_logins_total 2"));
    }

    #[test]
    fn request_duration_is_a_histogram() {
        let metrics = Metrics::new();
        metrics.observe_request_duration(Duration::from_millis(3));
        metrics.observe_request_duration(Duration::from_millis(200));
        metrics.observe_request_duration(Duration::from_secs(30));

        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE sentinel_request_duration_seconds histogram"));
        assert!(text.contains("sentinel_request_duration_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("sentinel_request_duration_seconds_count 3"));
        assert_eq!(metrics.snapshot().requests_observed, 3);
    }

    #[test]
    fn gauges_render() {
        let metrics = Metrics::new();
        metrics.set_active_identities(7);
        metrics.set_blocked_identities(2);
        let text = metrics.render_prometheus();
        assert!(text.contains("sentinel_active_identities 7"));
        assert!(text.contains("sentinel_blocked_identities 2"));
    }

    #[test]
    fn instances_do_not_share_series() {
        let first = Metrics::new();
        let second = Metrics::new();
        first.record_rate_limited();

        assert!(first
            .render_prometheus()
            .contains("sentinel_rate_limited_requests_total 1"));
        assert!(!second
            .render_prometheus()
            .contains("sentinel_rate_limited_requests_total 1"));
        assert_eq!(second.snapshot().rate_limited_requests, 0);
    }
}
