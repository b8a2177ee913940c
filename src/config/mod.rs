//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors collected)
//!     → GatewayConfig (validated, immutable)
//!     → deployments handed to the balancer cache per request
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the balancer cache detects changed
//!   deployments by value, so reload mechanics stay outside this crate
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::DeploymentConfig;
pub use schema::GatewayConfig;
pub use schema::ObservabilityConfig;
pub use schema::UpstreamConfig;
