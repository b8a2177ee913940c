//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define routing-layer metrics
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_upstream_selected_total` (counter): selections by deployment, endpoint
//! - `gateway_upstream_failures_total` (counter): reported failures by deployment, status
//! - `gateway_fallback_served_total` (counter): cooling-down upstreams served anyway
//! - `gateway_balancer_cache_entries` (gauge): live balancers
//! - `gateway_balancer_cache_evictions_total` (counter): idle evictions
//!
//! # Design Decisions
//! - Low-overhead metric updates; recording never blocks request handling
//! - Labels bounded by configuration (deployments, upstreams), never by
//!   request content

use axum::http::StatusCode;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;
use url::Url;

use crate::config::schema::ObservabilityConfig;

/// Errors installing the metrics exporter.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metrics address: {0}")]
    Address(String),

    #[error("exporter setup failed: {0}")]
    Exporter(#[from] BuildError),
}

/// Install the Prometheus exporter when metrics are enabled.
///
/// Must run inside a tokio runtime; the exporter serves scrapes on the
/// configured address.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<(), MetricsError> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let address: std::net::SocketAddr = config
        .metrics_address
        .parse()
        .map_err(|_| MetricsError::Address(config.metrics_address.clone()))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;

    tracing::info!(address = %address, "Metrics endpoint started");
    Ok(())
}

/// Record one upstream selection for a deployment.
pub fn record_selection(deployment: &str, endpoint: &Url) {
    counter!(
        "gateway_upstream_selected_total",
        "deployment" => deployment.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Record a reported upstream failure.
pub fn record_upstream_failure(deployment: &str, status: StatusCode) {
    counter!(
        "gateway_upstream_failures_total",
        "deployment" => deployment.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}

/// Record that a still-cooling-down upstream was served.
pub fn record_fallback_served(deployment: &str) {
    counter!(
        "gateway_fallback_served_total",
        "deployment" => deployment.to_string()
    )
    .increment(1);
}

/// Record the current number of live balancers.
pub fn record_cache_entries(count: usize) {
    gauge!("gateway_balancer_cache_entries").set(count as f64);
}

/// Record one idle-eviction from the balancer cache.
pub fn record_cache_eviction() {
    counter!("gateway_balancer_cache_evictions_total").increment(1);
}
