//! Prometheus metrics for monitoring the token server.
//!
//! The library records its counters (`ledger_tokens_credited_total`,
//! `ledger_tokens_consumed_total`, `ledger_consumption_denied_total`,
//! `ledger_duplicate_references_total`, `entitlement_contacts_total`)
//! through the `metrics` facade; this module installs the exporter that
//! serves them together with the HTTP metrics below.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use token_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/contacts/{business_id}", 200);
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// Increments the total HTTP request counter with method, route, and status labels.
pub fn http_requests_total(method: &str, route: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, route: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Set current database connection pool size.
pub fn db_connections_active(count: u32) {
    metrics::gauge!("db_connections_active").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        http_requests_total("GET", "/health", 200);
        http_request_duration_ms("GET", "/health", 1.5);
        db_connections_active(3);
    }
}
