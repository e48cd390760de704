//! Fetch outcomes and the failure taxonomy
//!
//! Every call to the orchestrator produces exactly one [`FetchOutcome`].
//! Per-provider failures are recorded as [`Attempt`]s and never escape on
//! their own; only [`FetchError`] is surfaced to the caller.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::Record;

/// Which layer produced the value returned to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLabel {
    /// In-process cache hit
    Cache,
    /// Persistent store, either directly or re-queried after a refresh
    Store,
    /// Secondary external API
    Secondary,
    /// Static last-resort dataset
    Static,
}

impl SourceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLabel::Cache => "cache",
            SourceLabel::Store => "store",
            SourceLabel::Secondary => "secondary",
            SourceLabel::Static => "static",
        }
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single provider in the chain did not yield an accepted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ProviderFailure {
    /// The provider has no record for the key
    #[error("no data available")]
    Absent,

    /// A record exists but is older than the freshness threshold
    #[error("data is stale ({age_secs}s old, threshold {threshold_secs}s)")]
    Stale { age_secs: u64, threshold_secs: u64 },

    /// The provider's call budget is spent for the current window
    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded { retry_after_ms: u64 },

    /// The provider did not answer within its timeout budget
    #[error("timed out after {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    /// Malformed or unavailable response
    #[error("provider error: {message}")]
    Error { message: String },
}

impl ProviderFailure {
    pub fn stale(age: Duration, threshold: Duration) -> Self {
        ProviderFailure::Stale {
            age_secs: age.as_secs(),
            threshold_secs: threshold.as_secs(),
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        ProviderFailure::RateLimitExceeded {
            retry_after_ms: duration_ms(retry_after),
        }
    }

    pub fn timeout(budget: Duration) -> Self {
        ProviderFailure::Timeout {
            budget_ms: duration_ms(budget),
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        ProviderFailure::Error {
            message: message.to_string(),
        }
    }
}

/// Result of asking one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptResult {
    Accepted,
    Failed { failure: ProviderFailure },
}

/// One entry of the ordered list of providers tried during a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// Provider name as configured in the chain
    pub source: String,
    pub result: AttemptResult,
}

impl Attempt {
    pub fn accepted(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            result: AttemptResult::Accepted,
        }
    }

    pub fn failed(source: impl Into<String>, failure: ProviderFailure) -> Self {
        Self {
            source: source.into(),
            result: AttemptResult::Failed { failure },
        }
    }

    /// The failure reason, if this attempt failed
    pub fn failure(&self) -> Option<&ProviderFailure> {
        match &self.result {
            AttemptResult::Accepted => None,
            AttemptResult::Failed { failure } => Some(failure),
        }
    }
}

/// Errors surfaced to the caller of `fetch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    /// Every provider in the chain failed, denied or had no data
    #[error("all providers exhausted ({})", summarize(.attempts))]
    AllProvidersExhausted { attempts: Vec<Attempt> },

    /// The caller's own deadline ran out while waiting on the shared resolution
    #[error("deadline of {waited_ms}ms elapsed before the resolution completed")]
    DeadlineElapsed { waited_ms: u64 },

    /// The resolution task ended without producing an outcome
    #[error("resolution aborted: {reason}")]
    ResolutionAborted { reason: String },
}

fn summarize(attempts: &[Attempt]) -> String {
    if attempts.is_empty() {
        return "no providers configured".to_string();
    }
    attempts
        .iter()
        .map(|attempt| match attempt.failure() {
            Some(failure) => format!("{}: {}", attempt.source, failure),
            None => format!("{}: accepted", attempt.source),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// The structured answer to one `fetch` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
    /// The resolved record, absent when resolution failed
    pub value: Option<Record>,
    /// Layer that produced `value`
    pub source: Option<SourceLabel>,
    /// Providers tried during this resolution, in chain order
    pub attempted: Vec<Attempt>,
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    /// A record accepted from a provider in the chain
    pub fn accepted(record: Record, source: SourceLabel, attempted: Vec<Attempt>) -> Self {
        Self {
            value: Some(record),
            source: Some(source),
            attempted,
            error: None,
        }
    }

    /// A record served from the in-process cache
    pub fn from_cache(record: Record) -> Self {
        Self {
            value: Some(record),
            source: Some(SourceLabel::Cache),
            attempted: Vec::new(),
            error: None,
        }
    }

    /// Every provider failed
    pub fn exhausted(attempted: Vec<Attempt>) -> Self {
        Self {
            value: None,
            source: None,
            attempted: attempted.clone(),
            error: Some(FetchError::AllProvidersExhausted { attempts: attempted }),
        }
    }

    /// A recent exhaustion replayed from an error marker in the cache
    pub fn cached_exhaustion(attempts: Vec<Attempt>) -> Self {
        Self {
            value: None,
            source: Some(SourceLabel::Cache),
            attempted: Vec::new(),
            error: Some(FetchError::AllProvidersExhausted { attempts }),
        }
    }

    pub fn deadline_elapsed(waited: Duration) -> Self {
        Self {
            value: None,
            source: None,
            attempted: Vec::new(),
            error: Some(FetchError::DeadlineElapsed {
                waited_ms: duration_ms(waited),
            }),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            value: None,
            source: None,
            attempted: Vec::new(),
            error: Some(FetchError::ResolutionAborted {
                reason: reason.into(),
            }),
        }
    }

    /// Whether a value was produced
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }

    /// Provider names in the order they were attempted
    pub fn attempted_sources(&self) -> Vec<&str> {
        self.attempted.iter().map(|a| a.source.as_str()).collect()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataKind;
    use serde_json::json;

    #[test]
    fn test_exhausted_outcome_carries_attempts() {
        let attempts = vec![
            Attempt::failed("store", ProviderFailure::Absent),
            Attempt::failed("secondary", ProviderFailure::rate_limited(Duration::from_secs(3))),
        ];
        let outcome = FetchOutcome::exhausted(attempts.clone());

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempted_sources(), vec!["store", "secondary"]);
        assert_eq!(
            outcome.error,
            Some(FetchError::AllProvidersExhausted { attempts })
        );
    }

    #[test]
    fn test_exhausted_error_message_lists_reasons() {
        let err = FetchError::AllProvidersExhausted {
            attempts: vec![
                Attempt::failed("store", ProviderFailure::stale(Duration::from_secs(7200), Duration::from_secs(3600))),
                Attempt::failed("refresh", ProviderFailure::timeout(Duration::from_secs(20))),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("store: data is stale (7200s old, threshold 3600s)"));
        assert!(message.contains("refresh: timed out after 20000ms"));
    }

    #[test]
    fn test_cached_outcome_has_no_attempts() {
        let record = Record::new("KDP", DataKind::Prices, json!({"close": 31.2}));
        let outcome = FetchOutcome::from_cache(record.clone());
        assert_eq!(outcome.source, Some(SourceLabel::Cache));
        assert!(outcome.attempted.is_empty());
        assert_eq!(outcome.value, Some(record));
    }

    #[test]
    fn test_outcome_serializes_source_and_reasons() {
        let outcome = FetchOutcome::exhausted(vec![Attempt::failed("static", ProviderFailure::Absent)]);
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["source"], serde_json::Value::Null);
        assert_eq!(json["attempted"][0]["source"], "static");
        assert_eq!(json["attempted"][0]["result"]["status"], "failed");
        assert_eq!(json["attempted"][0]["result"]["failure"]["reason"], "absent");
        assert_eq!(json["error"]["kind"], "all_providers_exhausted");
    }

    #[test]
    fn test_source_label_display() {
        assert_eq!(SourceLabel::Cache.to_string(), "cache");
        assert_eq!(SourceLabel::Static.to_string(), "static");
    }
}
