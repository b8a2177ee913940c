//! Weighted random selection within one tier.
//!
//! A simpler, lower-guarantee alternative to the smooth weighted round
//! robin: no usage memory, so fairness holds only in expectation. Kept off
//! the default request path; deployments opt in per configuration.

use rand::Rng as _;

use crate::balancer::upstream::UpstreamHealthState;
use crate::balancer::Selector;

/// Source of randomness for [`RandomizedSelector`].
///
/// Swap in a seeded implementation for deterministic tests.
pub trait RandomSource: Send + std::fmt::Debug {
    /// Draw uniformly from `[0, upper]`, both ends inclusive.
    fn draw_inclusive(&mut self, upper: u64) -> u64;
}

/// Draws from the thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn draw_inclusive(&mut self, upper: u64) -> u64 {
        rand::thread_rng().gen_range(0..=upper)
    }
}

/// Seedable source for deterministic selection sequences.
impl RandomSource for fastrand::Rng {
    fn draw_inclusive(&mut self, upper: u64) -> u64 {
        self.u64(0..=upper)
    }
}

/// Stateless weighted random chooser for the members of one tier.
#[derive(Debug)]
pub struct RandomizedSelector {
    /// `(flat index, weight)` for every positive-weight member.
    members: Vec<(usize, u64)>,
    source: Box<dyn RandomSource>,
}

impl RandomizedSelector {
    /// Build from `(flat index, weight)` pairs, drawing from the
    /// thread-local generator. Non-positive weights are dropped.
    pub fn new(candidates: impl IntoIterator<Item = (usize, i32)>) -> Self {
        Self::with_source(candidates, Box::new(ThreadRandom))
    }

    /// Build with an explicit randomness source.
    pub fn with_source(
        candidates: impl IntoIterator<Item = (usize, i32)>,
        source: Box<dyn RandomSource>,
    ) -> Self {
        let members: Vec<(usize, u64)> = candidates
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|(index, weight)| (index, weight as u64))
            .collect();

        if members.is_empty() {
            tracing::warn!("randomized selector has no positive-weight members");
        }

        Self { members, source }
    }
}

impl Selector for RandomizedSelector {
    fn next(&mut self, states: &[UpstreamHealthState]) -> Option<usize> {
        let available: Vec<(usize, u64)> = self
            .members
            .iter()
            .copied()
            .filter(|(index, _)| states[*index].is_available())
            .collect();

        let total_weight: u64 = available.iter().map(|(_, weight)| weight).sum();
        if total_weight == 0 {
            return None;
        }

        let draw = self.source.draw_inclusive(total_weight);
        let mut cumulative = 0u64;
        for (index, weight) in &available {
            cumulative += weight;
            if draw <= cumulative {
                return Some(*index);
            }
        }
        // draw == total_weight lands on the last member above; unreachable
        // only when the list is empty, which the total-weight check rules out.
        None
    }
}
