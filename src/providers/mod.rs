//! Data providers making up a fallback chain
//!
//! Every source the orchestrator can consult implements [`Provider`]. The
//! orchestrator walks a per-kind list of providers in order and never looks
//! at their concrete types.

mod refresh;
mod secondary;
mod static_data;
mod store;

pub use refresh::RefreshProvider;
pub use secondary::SecondaryProvider;
pub use static_data::StaticProvider;
pub use store::StoreProvider;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::cache::TtlPolicy;
use crate::data::{DataKind, FetchKey, ProviderFailure, Record, SourceLabel};
use crate::limiter::RateLimitPolicy;

/// Per-kind resolution settings shared by the cache and the providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPolicy {
    pub ttl: TtlPolicy,
    /// Maximum age at which a stored record still counts as fresh
    pub freshness: Duration,
    /// Accept stored records older than `freshness`
    pub accept_stale: bool,
    /// How long to wait for the refresh pipeline
    pub refresh_timeout: Duration,
}

impl KindPolicy {
    /// Built-in settings for a data kind
    pub fn for_kind(kind: DataKind) -> Self {
        let hours = |h: u64| Duration::from_secs(h * 3600);
        let (base, max, refresh_secs) = match kind {
            DataKind::Financials => (hours(6), hours(12), 20),
            DataKind::Earnings => (hours(12), hours(24), 15),
            DataKind::News => (hours(2), hours(6), 10),
            DataKind::Prices => (hours(1), hours(24), 10),
        };

        Self {
            ttl: TtlPolicy::new(base, max, Duration::from_secs(300)),
            freshness: base,
            accept_stale: false,
            refresh_timeout: Duration::from_secs(refresh_secs),
        }
    }

    /// Checks a stored record against the freshness threshold
    pub fn check_fresh(&self, record: Record) -> Result<Record, ProviderFailure> {
        let age = record.age();
        if age <= self.freshness || self.accept_stale {
            Ok(record)
        } else {
            Err(ProviderFailure::stale(age, self.freshness))
        }
    }
}

/// One request handed to a provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub key: &'a FetchKey,
    pub params: &'a BTreeMap<String, String>,
    pub policy: &'a KindPolicy,
}

/// A source of records in a fallback chain
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in attempt lists and rate-limit lookups
    fn name(&self) -> &str;

    /// Label reported to callers when this provider's record is accepted
    fn source_label(&self) -> SourceLabel;

    /// Longest the orchestrator waits for one call
    fn timeout(&self, policy: &KindPolicy) -> Duration;

    /// Produces a record or explains why it cannot
    async fn try_fetch(&self, request: ProviderRequest<'_>) -> Result<Record, ProviderFailure>;
}

/// Static description of one chain position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Position in the chain, 0 first
    pub priority: usize,
    pub timeout_ms: u64,
    pub rate_limit: Option<RateLimitPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record_aged(hours: i64) -> Record {
        let mut record = Record::new("KDP", DataKind::Financials, json!({}));
        record.as_of = Utc::now() - chrono::Duration::hours(hours);
        record
    }

    #[test]
    fn test_kind_defaults() {
        let financials = KindPolicy::for_kind(DataKind::Financials);
        assert_eq!(financials.ttl.base, Duration::from_secs(6 * 3600));
        assert_eq!(financials.ttl.max, Duration::from_secs(12 * 3600));
        assert_eq!(financials.refresh_timeout, Duration::from_secs(20));
        assert_eq!(financials.freshness, financials.ttl.base);

        for kind in DataKind::ALL {
            let policy = KindPolicy::for_kind(kind);
            assert!(policy.ttl.error < policy.ttl.base, "{kind}: error TTL must be shorter than base");
            assert!(policy.ttl.base <= policy.ttl.max);
        }
    }

    #[test]
    fn test_check_fresh() {
        let policy = KindPolicy::for_kind(DataKind::Financials);

        assert!(policy.check_fresh(record_aged(1)).is_ok());
        assert!(matches!(
            policy.check_fresh(record_aged(30)),
            Err(ProviderFailure::Stale { threshold_secs: 21_600, .. })
        ));

        let lenient = KindPolicy {
            accept_stale: true,
            ..policy
        };
        assert!(lenient.check_fresh(record_aged(30)).is_ok());
    }
}
