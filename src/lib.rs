//! AI-Model Gateway Routing Library
//!
//! Upstream selection, tiered fallback, backoff bookkeeping and balancer
//! caching for a model gateway. The transport layer stays outside: callers
//! obtain a [`RequestRoute`], issue the HTTP call themselves, and report the
//! outcome back.

pub mod balancer;
pub mod config;
pub mod observability;

pub use balancer::cache::BalancerCache;
pub use balancer::route::RequestRoute;
pub use balancer::tiered::{BalancerError, TieredBalancer};
pub use balancer::upstream::Upstream;
pub use config::GatewayConfig;
