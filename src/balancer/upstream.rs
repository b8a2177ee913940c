//! Upstream identity and per-upstream health tracking.
//!
//! # Responsibilities
//! - Represent a single configured backend instance of a deployment
//! - Track consecutive failures and the backoff window they open
//! - Distinguish locally computed delays from backend-supplied ones

use axum::http::StatusCode;
use std::time::{Duration, Instant};
use url::Url;

/// Longest consecutive-failure streak that still grows the backoff.
const FAILURE_COUNT_CAP: u32 = 30;

/// Ceiling for locally computed exponential backoff, in seconds.
const MAX_BACKOFF_SECS: u64 = 300;

/// Delay for non-5xx failures when the backend supplied no hint, in seconds.
const DEFAULT_BACKOFF_SECS: u64 = 30;

/// Where a backoff delay came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// Delay computed locally from the failure streak.
    Core,
    /// Delay supplied by the backend (e.g. a Retry-After hint).
    Upstream,
}

/// One configured backend instance of a deployment.
///
/// Compared by value: two upstreams with the same endpoint, key, extra data,
/// weight and tier are the same upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Upstream {
    /// Base endpoint requests are forwarded to.
    pub endpoint: Url,
    /// Credential forwarded with each request. Opaque to the balancer.
    pub api_key: String,
    /// Deployment-specific extra data. Opaque to the balancer.
    pub extra: String,
    /// Relative traffic share within the tier. Non-positive weights never
    /// participate in selection.
    pub weight: i32,
    /// Priority bucket; lower tiers are drained first.
    pub tier: u32,
}

impl Upstream {
    /// Create a new upstream.
    pub fn new(
        endpoint: Url,
        api_key: impl Into<String>,
        extra: impl Into<String>,
        weight: i32,
        tier: u32,
    ) -> Self {
        Self {
            endpoint,
            api_key: api_key.into(),
            extra: extra.into(),
            weight,
            tier,
        }
    }
}

/// Mutable health and backoff bookkeeping for one upstream.
///
/// Not internally synchronized; the owning balancer serializes access.
#[derive(Debug)]
pub struct UpstreamHealthState {
    upstream: Upstream,
    failure_count: u32,
    retry_after: Option<Instant>,
    source: Option<FailureSource>,
    last_status: Option<StatusCode>,
}

impl UpstreamHealthState {
    /// Create a fresh state with no failure history.
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream,
            failure_count: 0,
            retry_after: None,
            source: None,
            last_status: None,
        }
    }

    /// The upstream this state tracks.
    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Record a failed attempt and open a backoff window.
    ///
    /// `retry_after_secs` carries the backend's own delay hint when one was
    /// available; without a hint the delay is computed locally: exponential
    /// in the failure streak for 5xx, a fixed default otherwise.
    pub fn fail(&mut self, status: StatusCode, retry_after_secs: Option<u64>) {
        let source = match retry_after_secs {
            Some(_) => FailureSource::Upstream,
            None => FailureSource::Core,
        };

        let delay_secs = if status.is_server_error() {
            match retry_after_secs {
                Some(secs) => secs,
                None => {
                    self.failure_count = (self.failure_count + 1).min(FAILURE_COUNT_CAP);
                    exponential_backoff_secs(self.failure_count)
                }
            }
        } else {
            if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(
                    endpoint = %self.upstream.endpoint,
                    "Upstream rate limited (429)"
                );
            }
            retry_after_secs.unwrap_or(DEFAULT_BACKOFF_SECS)
        };

        // Absurd backend-supplied delays must not overflow the deadline.
        self.retry_after = Instant::now()
            .checked_add(Duration::from_secs(delay_secs))
            .or_else(|| Instant::now().checked_add(Duration::from_secs(MAX_BACKOFF_SECS)));
        self.source = Some(source);
        self.last_status = Some(status);
    }

    /// Record a successful attempt, clearing failure history and backoff.
    pub fn succeed(&mut self) {
        self.failure_count = 0;
        self.retry_after = None;
        self.source = None;
        self.last_status = None;
    }

    /// True when no backoff window is open.
    pub fn is_available(&self) -> bool {
        match self.retry_after {
            None => true,
            Some(deadline) => Instant::now() > deadline,
        }
    }

    /// Time left until the backoff window closes. Zero when available.
    pub fn remaining_backoff(&self) -> Duration {
        match self.retry_after {
            None => Duration::ZERO,
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        }
    }

    /// Source of the most recent failure's delay, if any.
    pub fn failure_source(&self) -> Option<FailureSource> {
        self.source
    }

    /// Status observed on the most recent failure, if any.
    pub fn last_status(&self) -> Option<StatusCode> {
        self.last_status
    }
}

fn exponential_backoff_secs(failure_count: u32) -> u64 {
    (1u64 << failure_count.min(FAILURE_COUNT_CAP)).min(MAX_BACKOFF_SECS)
}
