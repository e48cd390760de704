//! Adaptive-TTL in-process cache
//!
//! Holds resolved records and short-lived error markers keyed by
//! [`FetchKey`]. Entries live in a sharded map, so a write only locks the
//! shard of its own key and readers of unrelated keys never wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::data::{Attempt, FetchKey, Record, SourceLabel};

/// Expiry policy for one data kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// TTL given to every freshly resolved value
    pub base: Duration,
    /// Upper bound the TTL can grow to through repeated hits
    pub max: Duration,
    /// Fixed TTL of error markers; always shorter than `base`
    pub error: Duration,
    /// How much each hit before expiry adds to the TTL
    pub hit_extension: Duration,
}

impl TtlPolicy {
    /// Creates a policy whose hit extension is a quarter of the base TTL
    pub fn new(base: Duration, max: Duration, error: Duration) -> Self {
        Self {
            base,
            max,
            error,
            hit_extension: base / 4,
        }
    }

    pub fn with_hit_extension(mut self, hit_extension: Duration) -> Self {
        self.hit_extension = hit_extension;
        self
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(3600),      // 1 hour
            Duration::from_secs(86_400),    // 1 day
            Duration::from_secs(300),       // 5 minutes
        )
    }
}

/// A cached value or error marker
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: FetchKey,
    /// Resolved record; `None` for error markers
    pub value: Option<Record>,
    /// Layer that originally produced the value
    pub source: Option<SourceLabel>,
    pub created_at: Instant,
    /// Current TTL, measured from `created_at`
    pub ttl: Duration,
    pub is_error_marker: bool,
    /// Number of hits served since the entry was written
    pub hits: u64,
    /// Failure list of the resolution that produced an error marker
    pub failures: Vec<Attempt>,
    max_ttl: Duration,
    hit_extension: Duration,
}

impl CacheEntry {
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.age_at(now) >= self.ttl
    }

    /// Time left before expiry
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.ttl.saturating_sub(self.age_at(now))
    }

    fn extend(&mut self) {
        self.ttl = (self.ttl + self.hit_extension).min(self.max_ttl);
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A live value
    Hit(CacheEntry),
    /// A live error marker from a recent exhausted resolution
    ErrorMarker(CacheEntry),
    /// Nothing usable; the caller must resolve
    Miss,
}

/// Per-key snapshot for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub key: String,
    pub source: Option<SourceLabel>,
    pub age_ms: u64,
    pub ttl_ms: u64,
    pub hits: u64,
    pub is_error_marker: bool,
}

/// Counters and per-key ages of a [`CacheStore`]
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub error_count: u64,
    pub entries: Vec<EntryStats>,
}

/// Concurrent adaptive-TTL cache
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<FetchKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

enum Probe {
    Found(Lookup),
    Expired,
    Missing,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a key, extending the TTL of live values on hit
    ///
    /// Expired entries are evicted on access and reported as a miss.
    pub fn get(&self, key: &FetchKey) -> Lookup {
        let now = Instant::now();

        let probe = match self.entries.get_mut(key) {
            None => Probe::Missing,
            Some(entry) if entry.is_expired_at(now) => Probe::Expired,
            Some(entry) if entry.is_error_marker => Probe::Found(Lookup::ErrorMarker(entry.clone())),
            Some(mut entry) => {
                entry.extend();
                entry.hits += 1;
                Probe::Found(Lookup::Hit(entry.clone()))
            }
        };

        match probe {
            Probe::Found(lookup) => {
                match lookup {
                    Lookup::Hit(_) => self.hits.fetch_add(1, Ordering::Relaxed),
                    _ => self.errors.fetch_add(1, Ordering::Relaxed),
                };
                lookup
            }
            Probe::Expired => {
                // Another writer may have replaced the entry since the probe
                self.entries.remove_if(key, |_, entry| entry.is_expired_at(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss
            }
            Probe::Missing => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss
            }
        }
    }

    /// Returns a live entry without touching its TTL or the counters
    pub fn peek(&self, key: &FetchKey) -> Option<CacheEntry> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value().clone())
    }

    /// Stores a resolved value with the policy's base TTL
    pub fn put(&self, key: FetchKey, value: Record, source: SourceLabel, policy: &TtlPolicy) {
        let entry = CacheEntry {
            key: key.clone(),
            value: Some(value),
            source: Some(source),
            created_at: Instant::now(),
            ttl: policy.base,
            is_error_marker: false,
            hits: 0,
            failures: Vec::new(),
            max_ttl: policy.max.max(policy.base),
            hit_extension: policy.hit_extension,
        };
        self.entries.insert(key, entry);
    }

    /// Stores an error marker with the policy's fixed error TTL
    pub fn put_error(&self, key: FetchKey, failures: Vec<Attempt>, policy: &TtlPolicy) {
        let entry = CacheEntry {
            key: key.clone(),
            value: None,
            source: None,
            created_at: Instant::now(),
            ttl: policy.error,
            is_error_marker: true,
            hits: 0,
            failures,
            max_ttl: policy.error,
            hit_extension: Duration::ZERO,
        };
        self.entries.insert(key, entry);
    }

    /// Drops the entry for a key; returns whether one existed
    pub fn invalidate(&self, key: &FetchKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every expired entry; returns how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut entries: Vec<EntryStats> = self
            .entries
            .iter()
            .map(|entry| EntryStats {
                key: entry.key.to_string(),
                source: entry.source,
                age_ms: millis(entry.age_at(now)),
                ttl_ms: millis(entry.ttl),
                hits: entry.hits,
                is_error_marker: entry.is_error_marker,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            entries,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataKind, ProviderFailure};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn key(symbol: &str) -> FetchKey {
        FetchKey::new(symbol, DataKind::Financials, &BTreeMap::new())
    }

    fn record(symbol: &str) -> Record {
        Record::new(symbol, DataKind::Financials, json!({"data": [1, 2, 3]}))
    }

    fn policy() -> TtlPolicy {
        TtlPolicy::new(
            Duration::from_secs(60),
            Duration::from_secs(120),
            Duration::from_secs(10),
        )
        .with_hit_extension(Duration::from_secs(30))
    }

    #[test]
    fn test_default_policy_error_ttl_shorter_than_base() {
        let policy = TtlPolicy::default();
        assert!(policy.error < policy.base);
        assert!(policy.base <= policy.max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_miss_for_missing_key() {
        let cache = CacheStore::new();
        assert!(matches!(cache.get(&key("KDP")), Lookup::Miss));
        assert_eq!(cache.stats().miss_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_then_get_hits() {
        let cache = CacheStore::new();
        let value = record("KDP");
        cache.put(key("KDP"), value.clone(), SourceLabel::Store, &policy());

        match cache.get(&key("KDP")) {
            Lookup::Hit(entry) => {
                assert_eq!(entry.value, Some(value));
                assert_eq!(entry.source, Some(SourceLabel::Store));
                assert_eq!(entry.hits, 1);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(cache.stats().hit_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_base_ttl() {
        let cache = CacheStore::new();
        cache.put(key("KDP"), record("KDP"), SourceLabel::Store, &policy());

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(matches!(cache.get(&key("KDP")), Lookup::Miss));
        assert!(cache.is_empty(), "Expired entry should be evicted on access");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_extend_ttl_up_to_max() {
        let cache = CacheStore::new();
        cache.put(key("KDP"), record("KDP"), SourceLabel::Secondary, &policy());

        let ttls: Vec<Duration> = (0..4)
            .map(|_| match cache.get(&key("KDP")) {
                Lookup::Hit(entry) => entry.ttl,
                other => panic!("expected hit, got {other:?}"),
            })
            .collect();

        assert_eq!(
            ttls,
            vec![
                Duration::from_secs(90),
                Duration::from_secs(120),
                Duration::from_secs(120),
                Duration::from_secs(120),
            ]
        );

        // Still alive past the base TTL thanks to the extensions
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(matches!(cache.get(&key("KDP")), Lookup::Hit(_)));

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(matches!(cache.get(&key("KDP")), Lookup::Miss));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_resets_ttl_to_base() {
        let cache = CacheStore::new();
        cache.put(key("KDP"), record("KDP"), SourceLabel::Store, &policy());
        let _ = cache.get(&key("KDP"));
        let _ = cache.get(&key("KDP"));

        cache.put(key("KDP"), record("KDP"), SourceLabel::Store, &policy());

        match cache.get(&key("KDP")) {
            Lookup::Hit(entry) => {
                assert_eq!(entry.hits, 1);
                assert_eq!(entry.ttl, Duration::from_secs(90));
            }
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_marker_uses_error_ttl_and_never_extends() {
        let cache = CacheStore::new();
        let failures = vec![Attempt::failed("store", ProviderFailure::Absent)];
        cache.put_error(key("FARM"), failures.clone(), &policy());

        for _ in 0..3 {
            match cache.get(&key("FARM")) {
                Lookup::ErrorMarker(entry) => {
                    assert_eq!(entry.ttl, Duration::from_secs(10));
                    assert_eq!(entry.failures, failures);
                    assert!(entry.value.is_none());
                }
                other => panic!("expected error marker, got {other:?}"),
            }
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(cache.get(&key("FARM")), Lookup::Miss));

        let stats = cache.stats();
        assert_eq!(stats.error_count, 3);
        assert_eq!(stats.miss_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_removes_entry() {
        let cache = CacheStore::new();
        cache.put(key("KDP"), record("KDP"), SourceLabel::Store, &policy());

        assert!(cache.invalidate(&key("KDP")));
        assert!(!cache.invalidate(&key("KDP")));
        assert!(matches!(cache.get(&key("KDP")), Lookup::Miss));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_expired_entries() {
        let cache = CacheStore::new();
        cache.put(key("KDP"), record("KDP"), SourceLabel::Store, &policy());
        cache.put_error(key("FARM"), Vec::new(), &policy());

        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get(&key("KDP")), Lookup::Hit(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_per_key_age() {
        let cache = CacheStore::new();
        cache.put(key("KDP"), record("KDP"), SourceLabel::Store, &policy());
        cache.put_error(key("FARM"), Vec::new(), &policy());

        tokio::time::advance(Duration::from_secs(5)).await;
        let stats = cache.stats();

        assert_eq!(stats.entries.len(), 2);
        let farm = &stats.entries[0];
        assert!(farm.key.starts_with("FARM:financials"));
        assert!(farm.is_error_marker);
        assert_eq!(farm.age_ms, 5_000);
        let kdp = &stats.entries[1];
        assert_eq!(kdp.ttl_ms, 60_000);
        assert_eq!(kdp.source, Some(SourceLabel::Store));
    }
}
