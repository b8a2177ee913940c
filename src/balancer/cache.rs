//! Process-wide cache of live balancers keyed by deployment identity.
//!
//! # Responsibilities
//! - Read-or-build a deployment's balancer without blocking other keys
//! - Reuse a balancer (and its accumulated backoff state) while the
//!   deployment's upstream set and retry budget are unchanged; rebuild from
//!   scratch when they change
//! - Evict entries idle past the threshold with a periodic sweep

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use url::Url;

use crate::balancer::route::RequestRoute;
use crate::balancer::tiered::{BalancerError, TieredBalancer};
use crate::balancer::upstream::Upstream;
use crate::config::schema::DeploymentConfig;
use crate::observability::metrics;

/// Entries idle longer than this are removed by the sweeper.
const IDLE_EVICTION_THRESHOLD: Duration = Duration::from_secs(3600);

/// How often the sweeper scans for idle entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Auth key filled in for upstreams synthesized from a bare deployment
/// endpoint; the transport layer supplies the real credential.
const PLACEHOLDER_API_KEY: &str = "unused";

struct CacheEntry {
    balancer: Arc<TieredBalancer>,
    /// Snapshot the balancer was built from, sorted so comparison is
    /// order-independent.
    upstreams: Vec<Upstream>,
    max_retry_attempts: u32,
    last_access: Instant,
}

/// Process-wide map from deployment identity to its live balancer.
///
/// Safe for concurrent use; per-key atomicity comes from the map's entry
/// API, and lookups of different keys proceed in parallel.
#[derive(Default)]
pub struct BalancerCache {
    entries: DashMap<String, CacheEntry>,
}

impl BalancerCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Resolve a route for `deployment`.
    ///
    /// Reuses the cached balancer when the deployment's upstream set and
    /// retry budget are unchanged, so backoff state carries across requests.
    /// Any change rebuilds the balancer and discards the health history.
    pub fn route_for(&self, deployment: &DeploymentConfig) -> Result<RequestRoute, BalancerError> {
        let upstreams = resolve_upstreams(deployment);
        let mut sorted = upstreams.clone();
        sorted.sort();

        let balancer = match self.entries.entry(deployment.name.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.upstreams == sorted
                    && entry.max_retry_attempts == deployment.max_retry_attempts
                {
                    entry.last_access = Instant::now();
                    entry.balancer.clone()
                } else {
                    tracing::debug!(
                        deployment = %deployment.name,
                        "deployment changed, rebuilding balancer"
                    );
                    let balancer = build_balancer(deployment, &upstreams)?;
                    *entry = CacheEntry {
                        balancer: balancer.clone(),
                        upstreams: sorted,
                        max_retry_attempts: deployment.max_retry_attempts,
                        last_access: Instant::now(),
                    };
                    balancer
                }
            }
            Entry::Vacant(vacant) => {
                let balancer = build_balancer(deployment, &upstreams)?;
                vacant.insert(CacheEntry {
                    balancer: balancer.clone(),
                    upstreams: sorted,
                    max_retry_attempts: deployment.max_retry_attempts,
                    last_access: Instant::now(),
                });
                balancer
            }
        };

        metrics::record_cache_entries(self.entries.len());
        Ok(RequestRoute::new(balancer, deployment.max_retry_attempts))
    }

    /// Number of live balancers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no balancer is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries idle past the eviction threshold. Non-blocking scan.
    pub fn sweep(&self) {
        self.sweep_older_than(IDLE_EVICTION_THRESHOLD);
    }

    fn sweep_older_than(&self, threshold: Duration) {
        let now = Instant::now();
        self.entries.retain(|name, entry| {
            let keep = now.duration_since(entry.last_access) <= threshold;
            if !keep {
                tracing::info!(deployment = %name, "evicting idle balancer");
                metrics::record_cache_eviction();
            }
            keep
        });
        metrics::record_cache_entries(self.entries.len());
    }

    /// Run the idle-eviction sweep until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = SWEEP_INTERVAL.as_secs(),
            idle_secs = IDLE_EVICTION_THRESHOLD.as_secs(),
            "Balancer cache sweeper starting"
        );

        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Balancer cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn build_balancer(
    deployment: &DeploymentConfig,
    upstreams: &[Upstream],
) -> Result<Arc<TieredBalancer>, BalancerError> {
    Ok(Arc::new(TieredBalancer::with_strategy(
        &deployment.name,
        upstreams,
        deployment.strategy,
    )?))
}

/// Materialize the deployment's upstream list.
///
/// Deployments without an explicit list synthesize a single tier-0,
/// weight-1 upstream from the deployment endpoint. Unparseable endpoints
/// are dropped with a warning rather than failing the whole deployment.
fn resolve_upstreams(deployment: &DeploymentConfig) -> Vec<Upstream> {
    if deployment.upstreams.is_empty() {
        let Some(endpoint) = &deployment.endpoint else {
            return Vec::new();
        };
        return match Url::parse(endpoint) {
            Ok(url) => vec![Upstream::new(url, PLACEHOLDER_API_KEY, "", 1, 0)],
            Err(error) => {
                tracing::warn!(
                    deployment = %deployment.name,
                    endpoint = %endpoint,
                    error = %error,
                    "Invalid deployment endpoint"
                );
                Vec::new()
            }
        };
    }

    deployment
        .upstreams
        .iter()
        .filter_map(|config| match Url::parse(&config.endpoint) {
            Ok(url) => Some(Upstream::new(
                url,
                config.api_key.clone(),
                config.extra.clone(),
                config.weight,
                config.tier,
            )),
            Err(error) => {
                tracing::warn!(
                    deployment = %deployment.name,
                    endpoint = %config.endpoint,
                    error = %error,
                    "Invalid upstream endpoint"
                );
                None
            }
        })
        .collect()
}
