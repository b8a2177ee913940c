//! Configuration schema definitions.
//!
//! This module defines the routing-layer configuration consumed by the
//! balancer cache. All types derive Serde traits for deserialization from
//! config files, with per-field defaults so a minimal config loads.

use serde::{Deserialize, Serialize};

use crate::balancer::SelectorKind;

/// Root configuration for the gateway's routing layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Logical deployments requests are routed to.
    pub deployments: Vec<DeploymentConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// One logical deployment (model, application, or static route).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploymentConfig {
    /// Stable identity; also the balancer cache key.
    pub name: String,

    /// Endpoint used to synthesize a single upstream when `upstreams` is
    /// empty.
    pub endpoint: Option<String>,

    /// Upper bound on upstream attempts a single request may consume.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Selection strategy within a tier.
    #[serde(default)]
    pub strategy: SelectorKind,

    /// Physical upstream instances serving this deployment.
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

/// One physical upstream instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Endpoint URL (e.g. "https://eastus.models.example.com").
    pub endpoint: String,

    /// Auth key forwarded to the upstream.
    #[serde(default)]
    pub api_key: String,

    /// Opaque extra data handed through to the transport layer.
    #[serde(default)]
    pub extra: String,

    /// Relative traffic share within the tier (non-positive disables the
    /// upstream without removing it from the config).
    #[serde(default = "default_weight")]
    pub weight: i32,

    /// Priority tier; lower is preferred (default: 0).
    #[serde(default)]
    pub tier: u32,
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_weight() -> i32 {
    1
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_deployment_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[deployments]]
            name = "gpt-4o"
            endpoint = "https://eastus.models.example.com"
            "#,
        )
        .unwrap();

        let deployment = &config.deployments[0];
        assert_eq!(deployment.max_retry_attempts, 3);
        assert_eq!(deployment.strategy, SelectorKind::Weighted);
        assert!(deployment.upstreams.is_empty());
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_upstream_fields_parsed() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[deployments]]
            name = "chat"
            max_retry_attempts = 5
            strategy = "randomized"

            [[deployments.upstreams]]
            endpoint = "https://a.example.com"
            api_key = "k1"
            weight = 7
            tier = 1

            [[deployments.upstreams]]
            endpoint = "https://b.example.com"
            "#,
        )
        .unwrap();

        let deployment = &config.deployments[0];
        assert_eq!(deployment.max_retry_attempts, 5);
        assert_eq!(deployment.strategy, SelectorKind::Randomized);

        assert_eq!(deployment.upstreams[0].weight, 7);
        assert_eq!(deployment.upstreams[0].tier, 1);
        assert_eq!(deployment.upstreams[1].weight, 1);
        assert_eq!(deployment.upstreams[1].tier, 0);
        assert_eq!(deployment.upstreams[1].api_key, "");
    }
}
