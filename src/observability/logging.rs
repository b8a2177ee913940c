//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the logging subsystem
//! - Respect the configured level, with `RUST_LOG` as an override
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - Initialization is idempotent so embedding applications and tests can
//!   both call it

use tracing_subscriber::EnvFilter;

use crate::config::schema::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// The configured level is the base directive; a `RUST_LOG` environment
/// variable takes precedence. Does nothing if a subscriber is already set.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
