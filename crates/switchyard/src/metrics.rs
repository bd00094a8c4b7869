//! Prometheus metrics for Switchyard.
//!
//! Tracks routing decisions, campaign lookups and upstream exchanges.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tracing::warn;

lazy_static! {
    /// Requests served, by target and final status
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "switchyard_requests_total",
        "Total number of requests served",
        &["target", "status"]
    )
    .unwrap();

    /// Routing rules that matched a request
    pub static ref RULE_MATCHES_TOTAL: CounterVec = register_counter_vec!(
        "switchyard_rule_matches_total",
        "Total number of requests dispatched by each routing rule",
        &["rule"]  // "default" when no rule matched
    )
    .unwrap();

    /// Campaign lookups that failed or timed out
    pub static ref LOOKUP_UNAVAILABLE_TOTAL: CounterVec = register_counter_vec!(
        "switchyard_lookup_unavailable_total",
        "Campaign membership lookups treated as non-matches because the store was unavailable",
        &["campaign"]
    )
    .unwrap();

    /// Proxy exchanges that ended in an error response
    pub static ref PROXY_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "switchyard_proxy_errors_total",
        "Total number of proxy exchanges that failed",
        &["profile", "kind"]  // kind: upstream|upstream_timeout|rewrite|invalid_request
    )
    .unwrap();

    /// Upstream exchange duration
    pub static ref UPSTREAM_DURATION_MS: HistogramVec = register_histogram_vec!(
        "switchyard_upstream_duration_ms",
        "Duration of upstream requests in milliseconds",
        &["target"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(target: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[target, &status.to_string()])
        .inc();
}

pub fn record_rule_match(rule: &str) {
    RULE_MATCHES_TOTAL.with_label_values(&[rule]).inc();
}

pub fn record_lookup_unavailable(campaign: &str) {
    LOOKUP_UNAVAILABLE_TOTAL.with_label_values(&[campaign]).inc();
}

pub fn record_proxy_error(profile: &str, kind: &str) {
    PROXY_ERRORS_TOTAL.with_label_values(&[profile, kind]).inc();
}

pub fn record_upstream_duration(target: &str, duration_ms: f64) {
    UPSTREAM_DURATION_MS
        .with_label_values(&[target])
        .observe(duration_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        record_request("main-site", 200);
        record_rule_match("office-network");
        record_lookup_unavailable("spring-2024");
        record_proxy_error("reddit", "upstream");
        record_upstream_duration("main-site", 12.5);

        let metrics = collect_metrics();
        assert!(metrics.contains("switchyard_requests_total"));
        assert!(metrics.contains("switchyard_rule_matches_total"));
        assert!(metrics.contains("switchyard_lookup_unavailable_total"));
        assert!(metrics.contains("switchyard_proxy_errors_total"));
        assert!(metrics.contains("switchyard_upstream_duration_ms"));
    }

    #[test]
    fn test_counter_increments() {
        let before = RULE_MATCHES_TOTAL
            .with_label_values(&["counter-test"])
            .get();
        record_rule_match("counter-test");
        record_rule_match("counter-test");
        let after = RULE_MATCHES_TOTAL
            .with_label_values(&["counter-test"])
            .get();
        assert_eq!(after - before, 2.0);
    }
}
