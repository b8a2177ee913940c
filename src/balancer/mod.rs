//! Upstream balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives for a deployment
//!     → cache.rs (read-or-build the deployment's live balancer)
//!     → route.rs (per-request attempt budget)
//!     → tiered.rs (walk tiers in priority order, fallback recovery)
//!         → weighted.rs (smooth weighted round robin within a tier)
//!         → randomized.rs (alternate stateless weighted-random strategy)
//!     → upstream.rs (health/backoff bookkeeping per upstream)
//! Caller reports the attempt outcome back through route.rs
//! ```
//!
//! # Design Decisions
//! - Selection performs no I/O and never blocks; wall-clock backoff is
//!   checked lazily on access
//! - One mutex per balancer; contention is per-deployment, not per-upstream
//! - Exhaustion is an ordinary `None`, not an error
//! - Balancers are cached per deployment so backoff state accumulates
//!   across requests; configuration changes rebuild from scratch

pub mod cache;
pub mod randomized;
pub mod route;
pub mod tiered;
pub mod upstream;
pub mod weighted;

use serde::{Deserialize, Serialize};

use randomized::RandomizedSelector;
use upstream::UpstreamHealthState;
use weighted::WeightedSelector;

/// Strategy for choosing among the members of one tier.
///
/// Implementations receive the balancer's flat health-state list and return
/// the flat index of the chosen member, or `None` when no member qualifies.
pub trait Selector: Send + std::fmt::Debug {
    fn next(&mut self, states: &[UpstreamHealthState]) -> Option<usize>;
}

/// Per-tier selection strategy, chosen per deployment in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Smooth weighted round robin; deterministic, usage-tracking.
    #[default]
    Weighted,
    /// Weighted random sampling; stateless, fair only in expectation.
    Randomized,
}

impl SelectorKind {
    /// Instantiate the strategy over `(flat index, weight)` candidates.
    pub fn build(self, candidates: impl IntoIterator<Item = (usize, i32)>) -> Box<dyn Selector> {
        match self {
            SelectorKind::Weighted => Box::new(WeightedSelector::new(candidates)),
            SelectorKind::Randomized => Box::new(RandomizedSelector::new(candidates)),
        }
    }
}
