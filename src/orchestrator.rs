//! Fallback orchestrator
//!
//! Resolves `(symbol, kind)` requests through the cache and, on a miss,
//! through the kind's provider chain. Concurrent misses for the same key
//! share one chain walk; every caller gets a [`FetchOutcome`] back, whether
//! or not a value was found.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::cache::{CacheStats, CacheStore, Lookup};
use crate::data::{
    Attempt, DataKind, FetchKey, FetchOptions, FetchOutcome, PersistentStore, ProviderFailure, Record, SourceLabel,
};
use crate::limiter::{RateLimitError, RateLimiter};
use crate::providers::{KindPolicy, Provider, ProviderDescriptor, ProviderRequest};
use crate::single_flight::{FlightError, SingleFlight};

/// Slack added to the summed provider budgets for the default caller deadline
const DEADLINE_OVERHEAD: Duration = Duration::from_secs(1);

type Chain = Arc<Vec<Arc<dyn Provider>>>;

/// Entry point for resolving records
pub struct Orchestrator {
    cache: Arc<CacheStore>,
    flights: SingleFlight<FetchKey, FetchOutcome>,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn PersistentStore>,
    chains: HashMap<DataKind, Chain>,
    policies: HashMap<DataKind, KindPolicy>,
    /// Number of store write-throughs still running
    pending_writes: Arc<watch::Sender<usize>>,
}

impl Orchestrator {
    /// Starts building an orchestrator that writes results through to `store`
    pub fn builder(store: Arc<dyn PersistentStore>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store)
    }

    /// Resolves a record, never failing with an `Err`
    ///
    /// Misses are resolved under a single-flight ticket, so at most one chain
    /// walk per key runs at a time. A caller that reaches its deadline gets
    /// [`FetchError::DeadlineElapsed`](crate::data::FetchError) while the walk
    /// carries on and still fills the cache.
    pub async fn fetch(&self, symbol: &str, kind: DataKind, options: FetchOptions) -> FetchOutcome {
        let key = FetchKey::new(symbol, kind, &options.params);

        match self.cache.get(&key) {
            Lookup::Hit(entry) => {
                if let Some(record) = entry.value {
                    tracing::debug!(key = %key, hits = entry.hits, "Cache hit");
                    return FetchOutcome::from_cache(record);
                }
            }
            Lookup::ErrorMarker(entry) => {
                tracing::debug!(key = %key, "Cached exhaustion");
                return FetchOutcome::cached_exhaustion(entry.failures);
            }
            Lookup::Miss => tracing::debug!(key = %key, "Cache miss"),
        }

        let deadline = options.deadline.unwrap_or_else(|| self.default_deadline(kind));
        let resolution = Resolution {
            key: key.clone(),
            params: options.params,
            chain: self.chain_for(kind),
            policy: self.policy(kind),
            cache: Arc::clone(&self.cache),
            limiter: Arc::clone(&self.limiter),
            store: Arc::clone(&self.store),
            pending_writes: Arc::clone(&self.pending_writes),
        };

        match self.flights.resolve_within(key.clone(), deadline, resolution.run()).await {
            Ok(outcome) => outcome,
            Err(FlightError::Elapsed(waited)) => {
                tracing::warn!(key = %key, ?waited, "Caller deadline elapsed before resolution finished");
                FetchOutcome::deadline_elapsed(waited)
            }
            Err(FlightError::Aborted(reason)) => {
                tracing::error!(key = %key, %reason, "Resolution aborted");
                FetchOutcome::aborted(reason)
            }
        }
    }

    /// Drops the cached entry for a request; returns whether one existed
    pub fn invalidate(&self, symbol: &str, kind: DataKind, params: &BTreeMap<String, String>) -> bool {
        let key = FetchKey::new(symbol, kind, params);
        let removed = self.cache.invalidate(&key);
        if removed {
            tracing::debug!(key = %key, "Invalidated cache entry");
        }
        removed
    }

    /// Sweeps expired entries, then reports counters and live entries
    pub fn cache_stats(&self) -> CacheStats {
        let swept = self.cache.sweep_expired();
        if swept > 0 {
            tracing::debug!(swept, "Swept expired cache entries");
        }
        self.cache.stats()
    }

    /// Resolution settings for a kind
    pub fn policy(&self, kind: DataKind) -> KindPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or_else(|| KindPolicy::for_kind(kind))
    }

    /// The ordered chain for a kind, as configured
    pub fn chain(&self, kind: DataKind) -> Vec<ProviderDescriptor> {
        let policy = self.policy(kind);
        self.chain_for(kind)
            .iter()
            .enumerate()
            .map(|(priority, provider)| ProviderDescriptor {
                name: provider.name().to_string(),
                priority,
                timeout_ms: u64::try_from(provider.timeout(&policy).as_millis()).unwrap_or(u64::MAX),
                rate_limit: self.limiter.policy(provider.name()),
            })
            .collect()
    }

    /// Number of resolutions currently running
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Waits up to `max_wait` for spawned store writes to finish
    ///
    /// Returns whether none were left. Short-lived processes call this
    /// before exiting so write-through is not cut off.
    pub async fn wait_for_writes(&self, max_wait: Duration) -> bool {
        let mut pending = self.pending_writes.subscribe();
        let drained = matches!(
            tokio::time::timeout(max_wait, pending.wait_for(|count| *count == 0)).await,
            Ok(Ok(_))
        );
        drained
    }

    fn chain_for(&self, kind: DataKind) -> Chain {
        self.chains.get(&kind).cloned().unwrap_or_default()
    }

    /// Sum of the chain's provider budgets plus overhead
    fn default_deadline(&self, kind: DataKind) -> Duration {
        let policy = self.policy(kind);
        self.chain_for(kind)
            .iter()
            .map(|provider| provider.timeout(&policy))
            .sum::<Duration>()
            + DEADLINE_OVERHEAD
    }
}

/// Everything one chain walk needs, owned so it can run as its own task
struct Resolution {
    key: FetchKey,
    params: BTreeMap<String, String>,
    chain: Chain,
    policy: KindPolicy,
    cache: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn PersistentStore>,
    pending_writes: Arc<watch::Sender<usize>>,
}

impl Resolution {
    async fn run(self) -> FetchOutcome {
        // A walk that finished between our cache miss and taking the ticket
        if let Some(entry) = self.cache.peek(&self.key) {
            if let Some(record) = entry.value {
                return FetchOutcome::from_cache(record);
            }
        }

        let mut attempted = Vec::with_capacity(self.chain.len());

        for provider in self.chain.iter() {
            let name = provider.name();

            if let Err(RateLimitError::Exceeded { retry_after, .. }) = self.limiter.try_acquire(name) {
                tracing::debug!(key = %self.key, provider = name, ?retry_after, "Provider rate limited");
                attempted.push(Attempt::failed(name, ProviderFailure::rate_limited(retry_after)));
                continue;
            }

            let budget = provider.timeout(&self.policy);
            let request = ProviderRequest {
                key: &self.key,
                params: &self.params,
                policy: &self.policy,
            };
            let result = match tokio::time::timeout(budget, provider.try_fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderFailure::timeout(budget)),
            };

            match result {
                Ok(record) => {
                    let source = provider.source_label();
                    tracing::info!(key = %self.key, provider = name, %source, "Provider accepted");
                    attempted.push(Attempt::accepted(name));
                    self.write_back(&record, source);
                    return FetchOutcome::accepted(record, source, attempted);
                }
                Err(failure) => {
                    tracing::debug!(key = %self.key, provider = name, %failure, "Provider failed");
                    attempted.push(Attempt::failed(name, failure));
                }
            }
        }

        tracing::warn!(key = %self.key, attempts = attempted.len(), "All providers exhausted");
        self.cache
            .put_error(self.key.clone(), attempted.clone(), &self.policy.ttl);
        FetchOutcome::exhausted(attempted)
    }

    /// Caches an accepted record and persists it when it came from outside the store
    ///
    /// The store keeps whichever record is newer, so a fallback answer with
    /// an old `as_of` never replaces more recent stored data.
    fn write_back(&self, record: &Record, source: SourceLabel) {
        self.cache
            .put(self.key.clone(), record.clone(), source, &self.policy.ttl);

        if source == SourceLabel::Store {
            return;
        }

        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending_writes);
        let record = record.clone();
        let params = self.params.clone();
        pending.send_modify(|count| *count += 1);
        tokio::spawn(async move {
            persist_if_newer(store.as_ref(), &record, &params).await;
            pending.send_modify(|count| *count = count.saturating_sub(1));
        });
    }
}

async fn persist_if_newer(store: &dyn PersistentStore, record: &Record, params: &BTreeMap<String, String>) {
    match store.query_record(&record.symbol, record.kind, params).await {
        Ok(Some(existing)) if existing.as_of >= record.as_of => {
            tracing::debug!(
                symbol = %record.symbol,
                kind = %record.kind,
                stored_as_of = %existing.as_of,
                as_of = %record.as_of,
                "Store already holds a record at least as new, skipping write-through"
            );
            return;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::debug!(symbol = %record.symbol, kind = %record.kind, error = %e, "Could not read current stored record")
        }
    }

    match store.save_record(record, params).await {
        Ok(()) => tracing::debug!(symbol = %record.symbol, kind = %record.kind, "Persisted record"),
        Err(e) => {
            tracing::warn!(symbol = %record.symbol, kind = %record.kind, error = %e, "Store write-through failed")
        }
    }
}

/// Assembles an [`Orchestrator`]
pub struct OrchestratorBuilder {
    store: Arc<dyn PersistentStore>,
    limiter: RateLimiter,
    default_chain: Vec<Arc<dyn Provider>>,
    chains: HashMap<DataKind, Vec<Arc<dyn Provider>>>,
    policies: HashMap<DataKind, KindPolicy>,
}

impl OrchestratorBuilder {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store,
            limiter: RateLimiter::new(),
            default_chain: Vec::new(),
            chains: HashMap::new(),
            policies: HashMap::new(),
        }
    }

    /// Chain used by kinds without their own
    pub fn default_chain(mut self, chain: Vec<Arc<dyn Provider>>) -> Self {
        self.default_chain = chain;
        self
    }

    pub fn chain(mut self, kind: DataKind, chain: Vec<Arc<dyn Provider>>) -> Self {
        self.chains.insert(kind, chain);
        self
    }

    pub fn policy(mut self, kind: DataKind, policy: KindPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    pub fn limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn build(self) -> Orchestrator {
        let default_chain: Chain = Arc::new(self.default_chain);
        let mut explicit = self.chains;

        let chains = DataKind::ALL
            .into_iter()
            .map(|kind| {
                let chain = explicit
                    .remove(&kind)
                    .map(Arc::new)
                    .unwrap_or_else(|| Arc::clone(&default_chain));
                (kind, chain)
            })
            .collect();

        let policies = DataKind::ALL
            .into_iter()
            .map(|kind| {
                let policy = self
                    .policies
                    .get(&kind)
                    .copied()
                    .unwrap_or_else(|| KindPolicy::for_kind(kind));
                (kind, policy)
            })
            .collect();

        Orchestrator {
            cache: Arc::new(CacheStore::new()),
            flights: SingleFlight::new(),
            limiter: Arc::new(self.limiter),
            store: self.store,
            chains,
            policies,
            pending_writes: Arc::new(watch::channel(0).0),
        }
    }
}
