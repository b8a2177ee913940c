//! Smooth weighted round robin selection within one tier.

use crate::balancer::upstream::UpstreamHealthState;
use crate::balancer::Selector;

/// Per-member selection bookkeeping.
#[derive(Debug)]
struct Member {
    /// Index into the balancer's flat health-state list.
    index: usize,
    weight: u64,
    usage: u64,
}

/// Smooth weighted round robin chooser for the members of one tier.
///
/// Each call picks the member whose actual selection rate lags its weight
/// share the most, so long-run frequency converges to each member's share of
/// the total weight even when individual picks are skipped for
/// unavailability. Stores an internal usage counter per member; not
/// internally synchronized.
#[derive(Debug)]
pub struct WeightedSelector {
    members: Vec<Member>,
    total_weight: u64,
    total_usage: u64,
}

impl WeightedSelector {
    /// Build from `(flat index, weight)` pairs.
    ///
    /// Non-positive weights are dropped; a selector left with no members
    /// always yields `None`.
    pub fn new(candidates: impl IntoIterator<Item = (usize, i32)>) -> Self {
        let members: Vec<Member> = candidates
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|(index, weight)| Member {
                index,
                weight: weight as u64,
                usage: 0,
            })
            .collect();

        if members.is_empty() {
            tracing::warn!("weighted selector has no positive-weight members");
        }

        let total_weight = members.iter().map(|m| m.weight).sum();
        Self {
            members,
            total_weight,
            total_usage: 0,
        }
    }
}

impl Selector for WeightedSelector {
    fn next(&mut self, states: &[UpstreamHealthState]) -> Option<usize> {
        if self.members.is_empty() {
            return None;
        }

        // Rates are fixed at entry; the walk below is equivalent to draining
        // a priority queue built once per call.
        let mut order: Vec<(usize, f64)> = self
            .members
            .iter()
            .enumerate()
            .map(|(position, member)| {
                let expected = member.weight as f64 / self.total_weight as f64;
                let actual = if member.usage == 0 {
                    0.0
                } else {
                    member.usage as f64 / self.total_usage as f64
                };
                (position, expected - actual)
            })
            .collect();
        // Stable sort: equal deltas keep configuration order.
        order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (position, _) in order {
            let member = &mut self.members[position];
            member.usage += 1;
            self.total_usage += 1;
            if states[member.index].is_available() {
                return Some(member.index);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::upstream::Upstream;
    use axum::http::StatusCode;

    fn states(count: usize) -> Vec<UpstreamHealthState> {
        (0..count)
            .map(|i| {
                let url = format!("http://10.0.0.{}:8080", i + 1).parse().unwrap();
                UpstreamHealthState::new(Upstream::new(url, "key", "", 1, 0))
            })
            .collect()
    }

    fn tally(selector: &mut WeightedSelector, states: &[UpstreamHealthState], picks: usize) -> Vec<usize> {
        let mut counts = vec![0usize; states.len()];
        for _ in 0..picks {
            let index = selector.next(states).expect("selection should succeed");
            counts[index] += 1;
        }
        counts
    }

    #[test]
    fn test_equal_weights_split_evenly() {
        let states = states(4);
        let mut selector = WeightedSelector::new((0..4).map(|i| (i, 1)));
        assert_eq!(tally(&mut selector, &states, 100), vec![25, 25, 25, 25]);
    }

    #[test]
    fn test_skewed_weights_follow_shares() {
        let states = states(2);
        let mut selector = WeightedSelector::new([(0, 1), (1, 9)]);
        assert_eq!(tally(&mut selector, &states, 20), vec![2, 18]);
    }

    #[test]
    fn test_irregular_weights_exact_over_two_cycles() {
        let states = states(4);
        let weights = [49, 44, 47, 59];
        let mut selector =
            WeightedSelector::new(weights.iter().enumerate().map(|(i, w)| (i, *w)));
        // 398 = 2 * sum(weights)
        assert_eq!(tally(&mut selector, &states, 398), vec![98, 88, 94, 118]);
    }

    #[test]
    fn test_unavailable_member_skipped() {
        let mut states = states(2);
        states[0].fail(StatusCode::SERVICE_UNAVAILABLE, None);

        let mut selector = WeightedSelector::new([(0, 9), (1, 1)]);
        for _ in 0..5 {
            assert_eq!(selector.next(&states), Some(1));
        }
    }

    #[test]
    fn test_all_unavailable_yields_none() {
        let mut states = states(2);
        states[0].fail(StatusCode::SERVICE_UNAVAILABLE, None);
        states[1].fail(StatusCode::SERVICE_UNAVAILABLE, None);

        let mut selector = WeightedSelector::new([(0, 1), (1, 1)]);
        assert_eq!(selector.next(&states), None);
    }

    #[test]
    fn test_non_positive_weights_never_selected() {
        let states = states(3);
        let mut selector = WeightedSelector::new([(0, 0), (1, -5), (2, 3)]);
        for _ in 0..10 {
            assert_eq!(selector.next(&states), Some(2));
        }
    }

    #[test]
    fn test_empty_after_filter_yields_none() {
        let states = states(2);
        let mut selector = WeightedSelector::new([(0, 0), (1, -1)]);
        assert_eq!(selector.next(&states), None);
    }
}
