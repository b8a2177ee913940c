//! Tier-aware balancing across all upstreams of one deployment.
//!
//! # Data Flow
//! ```text
//! next(excluded)
//!     → tier groups in ascending tier order
//!         → tier's selector picks among available members
//!     → all tiers exhausted: fallback recovery over the flat list
//!         → first non-empty predicate bucket, soonest-to-recover member
//! fail/succeed(upstream)
//!     → locate health state by value equality
//!     → update failure streak / backoff window
//! ```
//!
//! # Design Decisions
//! - Tiers are tried strictly in ascending order; weight shares apply within
//!   a tier, never across tiers
//! - When every upstream is backing off, the request is still served: the
//!   soonest-to-recover candidate is returned and excluded from further
//!   attempts of the same request
//! - One mutex per balancer; contention is per-deployment, not per-upstream

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::http::StatusCode;
use thiserror::Error;

use crate::balancer::upstream::{FailureSource, Upstream, UpstreamHealthState};
use crate::balancer::{Selector, SelectorKind};
use crate::observability::metrics;

/// Errors raised while building a balancer. These are configuration
/// defects, not steady-state conditions.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The deployment resolved to an empty upstream list.
    #[error("deployment {deployment}: no upstreams configured")]
    EmptyDeployment { deployment: String },

    /// A member carried a different tier than the group it was placed in.
    #[error("deployment {deployment}: upstream of tier {actual} grouped under tier {expected}")]
    TierMismatch {
        deployment: String,
        expected: u32,
        actual: u32,
    },
}

/// All upstreams sharing one tier value, with the tier's selection strategy.
#[derive(Debug)]
pub struct TierGroup {
    tier: u32,
    selector: Box<dyn Selector>,
}

impl TierGroup {
    /// Build a group over `members` (indices into the balancer's flat list).
    /// Every member must carry the group's tier value.
    fn new(
        deployment: &str,
        tier: u32,
        members: &[(usize, &Upstream)],
        kind: SelectorKind,
    ) -> Result<Self, BalancerError> {
        for (_, upstream) in members {
            if upstream.tier != tier {
                return Err(BalancerError::TierMismatch {
                    deployment: deployment.to_string(),
                    expected: tier,
                    actual: upstream.tier,
                });
            }
        }

        let candidates: Vec<(usize, i32)> = members
            .iter()
            .map(|(index, upstream)| (*index, upstream.weight))
            .collect();
        Ok(Self {
            tier,
            selector: kind.build(candidates),
        })
    }
}

/// The stateful, tier-aware upstream chooser for one deployment.
///
/// One instance is shared by every concurrent request against the
/// deployment; all operations serialize on the single internal mutex.
#[derive(Debug)]
pub struct TieredBalancer {
    deployment: String,
    inner: Mutex<BalancerState>,
}

#[derive(Debug)]
struct BalancerState {
    /// Every upstream's health state, in configuration order.
    states: Vec<UpstreamHealthState>,
    /// Groups ascending by tier, holding indices into `states`.
    tiers: Vec<TierGroup>,
}

/// Fallback predicate buckets, tried in order: server errors before rate
/// limits, locally computed delays before backend-supplied ones.
const RECOVERY_BUCKETS: [(bool, FailureSource); 4] = [
    (true, FailureSource::Core),
    (true, FailureSource::Upstream),
    (false, FailureSource::Core),
    (false, FailureSource::Upstream),
];

impl TieredBalancer {
    /// Build a balancer using smooth weighted round robin within each tier.
    pub fn new(
        deployment: impl Into<String>,
        upstreams: &[Upstream],
    ) -> Result<Self, BalancerError> {
        Self::with_strategy(deployment, upstreams, SelectorKind::Weighted)
    }

    /// Build a balancer with an explicit per-tier selection strategy.
    pub fn with_strategy(
        deployment: impl Into<String>,
        upstreams: &[Upstream],
        kind: SelectorKind,
    ) -> Result<Self, BalancerError> {
        let deployment = deployment.into();
        if upstreams.is_empty() {
            return Err(BalancerError::EmptyDeployment { deployment });
        }

        let states: Vec<UpstreamHealthState> = upstreams
            .iter()
            .cloned()
            .map(UpstreamHealthState::new)
            .collect();

        let mut by_tier: BTreeMap<u32, Vec<(usize, &Upstream)>> = BTreeMap::new();
        for (index, upstream) in upstreams.iter().enumerate() {
            by_tier.entry(upstream.tier).or_default().push((index, upstream));
        }

        let mut tiers = Vec::with_capacity(by_tier.len());
        for (tier, members) in by_tier {
            if members.iter().all(|(_, u)| u.weight <= 0) {
                tracing::warn!(
                    deployment = %deployment,
                    tier,
                    "tier has no positive-weight upstreams"
                );
            }
            tiers.push(TierGroup::new(&deployment, tier, &members, kind)?);
        }

        Ok(Self {
            deployment,
            inner: Mutex::new(BalancerState { states, tiers }),
        })
    }

    /// The deployment identity this balancer serves.
    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Number of upstreams, participating or not.
    pub fn upstream_count(&self) -> usize {
        self.lock().states.len()
    }

    /// Choose an upstream for one attempt.
    ///
    /// Walks tiers in priority order; when every tier is exhausted, serves a
    /// still-cooling-down upstream via fallback recovery, recording it in
    /// `excluded` so one request never gets the same cooling upstream twice.
    /// `None` means nothing is left to try.
    pub fn next(&self, excluded: &mut HashSet<Upstream>) -> Option<Upstream> {
        let mut guard = self.lock();
        let BalancerState { states, tiers } = &mut *guard;

        for group in tiers.iter_mut() {
            if let Some(index) = group.selector.next(states) {
                let upstream = states[index].upstream().clone();
                metrics::record_selection(&self.deployment, &upstream.endpoint);
                return Some(upstream);
            }
            tracing::debug!(
                deployment = %self.deployment,
                tier = group.tier,
                "tier exhausted"
            );
        }

        self.recover_cooling(states, excluded)
    }

    /// Serve the soonest-to-recover upstream from the first non-empty
    /// predicate bucket rather than failing the request outright.
    fn recover_cooling(
        &self,
        states: &[UpstreamHealthState],
        excluded: &mut HashSet<Upstream>,
    ) -> Option<Upstream> {
        for (server_error, source) in RECOVERY_BUCKETS {
            let candidate = states
                .iter()
                .filter(|state| in_bucket(state, server_error, source))
                .filter(|state| !excluded.contains(state.upstream()))
                .min_by_key(|state| state.remaining_backoff());

            if let Some(state) = candidate {
                let upstream = state.upstream().clone();
                tracing::debug!(
                    deployment = %self.deployment,
                    endpoint = %upstream.endpoint,
                    remaining = ?state.remaining_backoff(),
                    "serving upstream still in backoff"
                );
                metrics::record_fallback_served(&self.deployment);
                excluded.insert(upstream.clone());
                return Some(upstream);
            }
        }
        None
    }

    /// Report a failed attempt against `upstream`.
    pub fn fail(&self, upstream: &Upstream, status: StatusCode, retry_after_secs: Option<u64>) {
        let mut guard = self.lock();
        match guard.states.iter_mut().find(|s| s.upstream() == upstream) {
            Some(state) => {
                state.fail(status, retry_after_secs);
                metrics::record_upstream_failure(&self.deployment, status);
            }
            None => tracing::warn!(
                deployment = %self.deployment,
                endpoint = %upstream.endpoint,
                "failure reported for unknown upstream"
            ),
        }
    }

    /// Report a successful attempt against `upstream`.
    pub fn succeed(&self, upstream: &Upstream) {
        let mut guard = self.lock();
        match guard.states.iter_mut().find(|s| s.upstream() == upstream) {
            Some(state) => state.succeed(),
            None => tracing::warn!(
                deployment = %self.deployment,
                endpoint = %upstream.endpoint,
                "success reported for unknown upstream"
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BalancerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn in_bucket(state: &UpstreamHealthState, server_error: bool, source: FailureSource) -> bool {
    let Some(status) = state.last_status() else {
        return false;
    };
    let class_matches = if server_error {
        status.is_server_error()
    } else {
        status == StatusCode::TOO_MANY_REQUESTS
    };
    class_matches && state.failure_source() == Some(source)
}
