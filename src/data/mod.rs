//! Core data models for finfetch
//!
//! This module contains the types shared by every layer of the fetch path:
//! the request key, the opaque record exchanged with collaborators, and the
//! outcome returned to callers. The collaborator contracts (persistent store,
//! refresh pipeline, secondary API, static dataset) live in the submodules.

pub mod outcome;
pub mod pipeline;
pub mod secondary;
pub mod static_set;
pub mod store;

pub use outcome::{Attempt, AttemptResult, FetchError, FetchOutcome, ProviderFailure, SourceLabel};
pub use pipeline::{CommandPipeline, PipelineError, RefreshPipeline};
pub use secondary::{HttpSecondaryClient, SecondaryApi, SecondaryError};
pub use static_set::{BundledDataset, StaticDataset, StaticDatasetError};
pub use store::{FileStore, PersistentStore, StoreError};

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kinds of financial data the orchestrator knows how to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Prices,
    Financials,
    Earnings,
    News,
}

impl DataKind {
    /// All data kinds, in a stable order
    pub const ALL: [DataKind; 4] = [
        DataKind::Prices,
        DataKind::Financials,
        DataKind::Earnings,
        DataKind::News,
    ];

    /// Lower-case name used in keys, file names and URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Prices => "prices",
            DataKind::Financials => "financials",
            DataKind::Earnings => "earnings",
            DataKind::News => "news",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a data kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown data kind: '{0}'. Valid kinds: prices, financials, earnings, news")]
pub struct UnknownDataKind(pub String);

impl FromStr for DataKind {
    type Err = UnknownDataKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prices" | "price" | "quote" | "quotes" => Ok(DataKind::Prices),
            "financials" | "fundamentals" => Ok(DataKind::Financials),
            "earnings" => Ok(DataKind::Earnings),
            "news" => Ok(DataKind::News),
            _ => Err(UnknownDataKind(s.to_string())),
        }
    }
}

/// Uniquely identifies a requested resource
///
/// Used both as the cache key and as the single-flight key. Symbols are
/// normalised to upper case so `kdp` and `KDP` share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FetchKey {
    pub symbol: String,
    pub kind: DataKind,
    pub params_hash: u64,
}

impl FetchKey {
    /// Builds a key for a symbol and kind with the given request parameters
    pub fn new(symbol: &str, kind: DataKind, params: &BTreeMap<String, String>) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            kind,
            params_hash: hash_params(params),
        }
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{:016x}", self.symbol, self.kind, self.params_hash)
    }
}

/// Trims and upper-cases a ticker symbol
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Hashes request parameters; `BTreeMap` iteration order keeps it stable
fn hash_params(params: &BTreeMap<String, String>) -> u64 {
    if params.is_empty() {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    for (name, value) in params {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

/// A single financial record as exchanged between collaborators
///
/// The payload is opaque to this crate; only `as_of` is interpreted, to
/// decide whether stored data is fresh enough to serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Ticker symbol the record belongs to
    pub symbol: String,
    /// Kind of data held in the payload
    pub kind: DataKind,
    /// Provider payload, passed through untouched
    pub payload: serde_json::Value,
    /// When the underlying data was last updated
    pub as_of: DateTime<Utc>,
}

impl Record {
    /// Creates a record stamped with the current time
    pub fn new(symbol: &str, kind: DataKind, payload: serde_json::Value) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            kind,
            payload,
            as_of: Utc::now(),
        }
    }

    /// Age of the record relative to `now`; future timestamps count as zero
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.as_of).to_std().unwrap_or(Duration::ZERO)
    }

    /// Age of the record relative to the wall clock
    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }
}

/// Per-request options for [`crate::orchestrator::Orchestrator::fetch`]
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Request parameters (e.g. `freq=quarterly`), part of the cache key
    pub params: BTreeMap<String, String>,
    /// Caller-side deadline; defaults to the chain's total budget
    pub deadline: Option<Duration>,
}

impl FetchOptions {
    /// Adds a request parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the caller-side deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_kind_parses_aliases() {
        assert_eq!("financials".parse::<DataKind>().unwrap(), DataKind::Financials);
        assert_eq!("Fundamentals".parse::<DataKind>().unwrap(), DataKind::Financials);
        assert_eq!("quotes".parse::<DataKind>().unwrap(), DataKind::Prices);
        assert_eq!(" news ".parse::<DataKind>().unwrap(), DataKind::News);
    }

    #[test]
    fn test_data_kind_rejects_unknown() {
        let err = "weather".parse::<DataKind>().unwrap_err();
        assert!(err.to_string().contains("weather"));
        assert!(err.to_string().contains("Unknown data kind"));
    }

    #[test]
    fn test_data_kind_display_matches_serde() {
        for kind in DataKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_fetch_key_normalizes_symbol() {
        let params = BTreeMap::new();
        let lower = FetchKey::new(" kdp ", DataKind::Financials, &params);
        let upper = FetchKey::new("KDP", DataKind::Financials, &params);
        assert_eq!(lower, upper);
        assert_eq!(lower.symbol, "KDP");
    }

    #[test]
    fn test_fetch_key_distinguishes_params() {
        let quarterly = FetchOptions::default().with_param("freq", "quarterly");
        let annual = FetchOptions::default().with_param("freq", "annual");

        let a = FetchKey::new("SBUX", DataKind::Financials, &quarterly.params);
        let b = FetchKey::new("SBUX", DataKind::Financials, &annual.params);
        let c = FetchKey::new("SBUX", DataKind::Financials, &quarterly.params);

        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_fetch_key_without_params_hashes_to_zero() {
        let key = FetchKey::new("AAPL", DataKind::Prices, &BTreeMap::new());
        assert_eq!(key.params_hash, 0);
        assert_eq!(key.to_string(), "AAPL:prices:0000000000000000");
    }

    #[test]
    fn test_record_age_ignores_future_timestamps() {
        let mut record = Record::new("KDP", DataKind::News, json!([]));
        record.as_of = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(record.age(), Duration::ZERO);
    }

    #[test]
    fn test_record_age_at() {
        let now = Utc::now();
        let mut record = Record::new("KDP", DataKind::Financials, json!({"data": []}));
        record.as_of = now - chrono::Duration::hours(30);
        assert_eq!(record.age_at(now), Duration::from_secs(30 * 3600));
    }
}
