//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check every deployment can produce at least one upstream
//! - Validate value ranges and endpoint URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic violation in a loaded configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate deployment name: {0}")]
    DuplicateDeployment(String),

    #[error("deployment {0}: neither an endpoint nor upstreams configured")]
    NoUpstreamSource(String),

    #[error("deployment {deployment}: invalid endpoint {endpoint}")]
    InvalidEndpoint {
        deployment: String,
        endpoint: String,
    },

    #[error("deployment {0}: max_retry_attempts must be at least 1")]
    ZeroRetryAttempts(String),

    #[error("deployment {0}: no upstream with a positive weight")]
    NoPositiveWeight(String),
}

/// Check the semantic integrity of a loaded configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for deployment in &config.deployments {
        let name = deployment.name.as_str();

        if !seen.insert(name) {
            errors.push(ValidationError::DuplicateDeployment(name.to_string()));
        }

        if deployment.max_retry_attempts == 0 {
            errors.push(ValidationError::ZeroRetryAttempts(name.to_string()));
        }

        if deployment.upstreams.is_empty() {
            match &deployment.endpoint {
                None => errors.push(ValidationError::NoUpstreamSource(name.to_string())),
                Some(endpoint) if Url::parse(endpoint).is_err() => {
                    errors.push(ValidationError::InvalidEndpoint {
                        deployment: name.to_string(),
                        endpoint: endpoint.clone(),
                    });
                }
                Some(_) => {}
            }
            continue;
        }

        for upstream in &deployment.upstreams {
            if Url::parse(&upstream.endpoint).is_err() {
                errors.push(ValidationError::InvalidEndpoint {
                    deployment: name.to_string(),
                    endpoint: upstream.endpoint.clone(),
                });
            }
        }

        if deployment.upstreams.iter().all(|u| u.weight <= 0) {
            errors.push(ValidationError::NoPositiveWeight(name.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DeploymentConfig, UpstreamConfig};

    fn deployment(name: &str) -> DeploymentConfig {
        DeploymentConfig {
            name: name.to_string(),
            endpoint: Some("https://models.example.com".to_string()),
            max_retry_attempts: 3,
            strategy: Default::default(),
            upstreams: Vec::new(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = GatewayConfig {
            deployments: vec![deployment("a"), deployment("b")],
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_all_errors_collected() {
        let mut no_source = deployment("broken");
        no_source.endpoint = None;
        no_source.max_retry_attempts = 0;

        let config = GatewayConfig {
            deployments: vec![deployment("dup"), deployment("dup"), no_source],
            ..Default::default()
        };

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::DuplicateDeployment("dup".to_string())));
        assert!(errors.contains(&ValidationError::ZeroRetryAttempts("broken".to_string())));
        assert!(errors.contains(&ValidationError::NoUpstreamSource("broken".to_string())));
    }

    #[test]
    fn test_invalid_upstream_endpoint_flagged() {
        let mut config_deployment = deployment("chat");
        config_deployment.endpoint = None;
        config_deployment.upstreams = vec![
            UpstreamConfig {
                endpoint: "not a url".to_string(),
                api_key: String::new(),
                extra: String::new(),
                weight: 1,
                tier: 0,
            },
            UpstreamConfig {
                endpoint: "https://ok.example.com".to_string(),
                api_key: String::new(),
                extra: String::new(),
                weight: 0,
                tier: 0,
            },
        ];

        let config = GatewayConfig {
            deployments: vec![config_deployment],
            ..Default::default()
        };

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidEndpoint { .. })));
    }
}
