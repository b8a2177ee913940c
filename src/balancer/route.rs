//! Per-request routing handle with an attempt budget.
//!
//! # Responsibilities
//! - Bind one inbound request to its deployment's balancer
//! - Enforce the per-request attempt budget
//! - Relay attempt outcomes (status, Retry-After hints) back to the balancer

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, Response, StatusCode};

use crate::balancer::tiered::TieredBalancer;
use crate::balancer::upstream::Upstream;

/// Delay substituted when a Retry-After header is present but unparseable.
const RETRY_AFTER_FALLBACK_SECS: u64 = 30;

/// One request's view of a deployment's balancer.
///
/// Owns the attempt counter and the set of cooling-down upstreams already
/// handed to this request by fallback recovery. Created per inbound request
/// and dropped when the response completes; never shared across requests.
#[derive(Debug)]
pub struct RequestRoute {
    balancer: Arc<TieredBalancer>,
    excluded: HashSet<Upstream>,
    current: Option<Upstream>,
    attempts: u32,
    max_attempts: u32,
}

impl RequestRoute {
    /// Bind a route to `balancer` and immediately perform attempt #1.
    ///
    /// The effective budget is the configured maximum clamped to the number
    /// of upstreams; retrying past the pool size cannot find anything new.
    pub fn new(balancer: Arc<TieredBalancer>, configured_max_attempts: u32) -> Self {
        let max_attempts = configured_max_attempts.min(balancer.upstream_count() as u32);
        let mut excluded = HashSet::new();
        let current = balancer.next(&mut excluded);
        let attempts = u32::from(current.is_some());

        Self {
            balancer,
            excluded,
            current,
            attempts,
            max_attempts,
        }
    }

    /// True while an upstream is selected and the budget allows serving it.
    pub fn available(&self) -> bool {
        self.current.is_some() && self.attempts <= self.max_attempts
    }

    /// Advance to the next attempt.
    ///
    /// `None` means the retry budget is exhausted or the balancer has
    /// nothing left; the caller answers with a no-route response either way.
    pub fn next(&mut self) -> Option<Upstream> {
        if self.attempts + 1 > self.max_attempts {
            self.current = None;
            return None;
        }

        self.attempts += 1;
        self.current = self.balancer.next(&mut self.excluded);
        self.current.clone()
    }

    /// The upstream chosen for the current attempt.
    pub fn get(&self) -> Option<&Upstream> {
        self.current.as_ref()
    }

    /// Attempts performed so far; the caller surfaces this verbatim in a
    /// diagnostic response header.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Report a failed attempt for the current upstream.
    ///
    /// `retry_after_secs` is the backend's delay hint when one was supplied;
    /// pass `None` when no hint is available.
    pub fn fail(&self, status: StatusCode, retry_after_secs: Option<u64>) {
        if let Some(upstream) = &self.current {
            self.balancer.fail(upstream, status, retry_after_secs);
        }
    }

    /// Report a failed attempt using the backend's response, honoring its
    /// Retry-After header when present.
    pub fn fail_with_response<B>(&self, response: &Response<B>) {
        self.fail(response.status(), parse_retry_after(response));
    }

    /// Report a successful attempt for the current upstream.
    pub fn succeed(&self) {
        if let Some(upstream) = &self.current {
            self.balancer.succeed(upstream);
        }
    }
}

/// Extract delta-seconds from a Retry-After header.
///
/// Absent header means no hint. A present but unparseable value falls back
/// to a fixed default rather than being dropped, so the backend's intent to
/// throttle still registers.
fn parse_retry_after<B>(response: &Response<B>) -> Option<u64> {
    let value = response.headers().get(header::RETRY_AFTER)?;
    match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(secs) => Some(secs),
        None => {
            tracing::warn!(
                status = %response.status(),
                "unparseable Retry-After header, assuming {}s",
                RETRY_AFTER_FALLBACK_SECS
            );
            Some(RETRY_AFTER_FALLBACK_SECS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(host: &str) -> Upstream {
        let url = format!("http://{}:8080", host).parse().unwrap();
        Upstream::new(url, "key", "", 1, 0)
    }

    fn balancer(count: usize) -> Arc<TieredBalancer> {
        let upstreams: Vec<Upstream> = (0..count)
            .map(|i| upstream(&format!("10.0.2.{}", i + 1)))
            .collect();
        Arc::new(TieredBalancer::new("d", &upstreams).unwrap())
    }

    #[test]
    fn test_first_attempt_on_construction() {
        let route = RequestRoute::new(balancer(2), 4);
        assert!(route.available());
        assert!(route.get().is_some());
        assert_eq!(route.attempts(), 1);
    }

    #[test]
    fn test_budget_exhaustion() {
        let mut route = RequestRoute::new(balancer(4), 4);

        for expected in 2..=4 {
            assert!(route.next().is_some());
            assert_eq!(route.attempts(), expected);
            assert!(route.available());
        }

        assert_eq!(route.next(), None);
        assert_eq!(route.get(), None);
        assert!(!route.available());

        // Further calls stay exhausted.
        assert_eq!(route.next(), None);
        assert_eq!(route.get(), None);
        assert_eq!(route.attempts(), 4);
    }

    #[test]
    fn test_budget_clamped_to_pool_size() {
        let mut route = RequestRoute::new(balancer(2), 10);
        assert!(route.next().is_some());
        assert_eq!(route.next(), None);
        assert_eq!(route.attempts(), 2);
    }

    #[test]
    fn test_failure_reported_for_current_upstream() {
        let balancer = balancer(2);
        let mut route = RequestRoute::new(balancer.clone(), 2);
        let first = route.get().cloned().unwrap();

        route.fail(StatusCode::SERVICE_UNAVAILABLE, None);

        // The failed upstream is in backoff, so the retry lands elsewhere.
        let second = route.next().unwrap();
        assert_ne!(first, second);
        route.succeed();
    }

    #[test]
    fn test_retry_after_header_parsed() {
        let balancer = balancer(1);
        let route = RequestRoute::new(balancer.clone(), 1);
        let selected = route.get().cloned().unwrap();

        let response = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header(header::RETRY_AFTER, "120")
            .body(())
            .unwrap();
        route.fail_with_response(&response);

        // A fresh request only reaches the upstream through recovery, and
        // the window reflects the supplied hint.
        let mut excluded = HashSet::new();
        assert_eq!(balancer.next(&mut excluded), Some(selected));
        assert!(!excluded.is_empty());
    }

    #[test]
    fn test_malformed_retry_after_defaults() {
        let response = Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::RETRY_AFTER, "Fri, 31 Dec 1999 23:59:59 GMT")
            .body(())
            .unwrap();
        assert_eq!(parse_retry_after(&response), Some(RETRY_AFTER_FALLBACK_SECS));

        let without = Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(())
            .unwrap();
        assert_eq!(parse_retry_after(&without), None);
    }
}
