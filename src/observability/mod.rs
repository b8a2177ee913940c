//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Balancer, route and cache operations produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging via the tracing crate
//! - Metrics are cheap and never block request handling
//! - Initialization is owned by the embedding application; the routing
//!   layer only records

pub mod logging;
pub mod metrics;
