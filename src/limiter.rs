//! Per-provider call budgets
//!
//! Each provider gets an independent fixed-window budget. The orchestrator
//! uses the non-blocking [`RateLimiter::try_acquire`]; a denial makes the
//! chain move on to the next provider rather than wait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned when a call budget is unavailable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The provider's budget for the current window is spent
    #[error("Rate limit exceeded for '{provider}', retry after {retry_after:?}")]
    Exceeded { provider: String, retry_after: Duration },

    /// The budget would not free up before the caller's deadline
    #[error("Timed out waiting for a '{provider}' call slot")]
    TimedOut { provider: String },
}

/// Fixed-window budget: at most `calls` calls per `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub calls: u32,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub fn per_minute(calls: u32) -> Self {
        Self {
            calls,
            window_secs: 60,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::per_minute(10)
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

#[derive(Debug)]
struct Bucket {
    policy: RateLimitPolicy,
    window: Mutex<Window>,
}

impl Bucket {
    fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            window: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Takes a slot, or reports how long until the window resets
    fn take(&self, now: Instant) -> Result<(), Duration> {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let length = self.policy.window();

        if now.saturating_duration_since(window.started) >= length {
            window.started = now;
            window.used = 0;
        }

        if window.used < self.policy.calls {
            window.used += 1;
            Ok(())
        } else {
            Err(length.saturating_sub(now.saturating_duration_since(window.started)))
        }
    }

    fn remaining(&self, now: Instant) -> u32 {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if now.saturating_duration_since(window.started) >= self.policy.window() {
            self.policy.calls
        } else {
            self.policy.calls.saturating_sub(window.used)
        }
    }
}

/// Call budgets keyed by provider name
///
/// Providers without a configured policy are unlimited. Buckets are fixed at
/// construction; each has its own lock, so providers never contend.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: HashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the budget for a provider
    pub fn with_policy(mut self, provider: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.buckets.insert(provider.into(), Bucket::new(policy));
        self
    }

    pub fn is_limited(&self, provider: &str) -> bool {
        self.buckets.contains_key(provider)
    }

    pub fn policy(&self, provider: &str) -> Option<RateLimitPolicy> {
        self.buckets.get(provider).map(|bucket| bucket.policy)
    }

    /// Calls left in the current window; `None` for unlimited providers
    pub fn remaining(&self, provider: &str) -> Option<u32> {
        self.buckets
            .get(provider)
            .map(|bucket| bucket.remaining(Instant::now()))
    }

    /// Takes a call slot without waiting
    pub fn try_acquire(&self, provider: &str) -> Result<(), RateLimitError> {
        let Some(bucket) = self.buckets.get(provider) else {
            return Ok(());
        };
        bucket
            .take(Instant::now())
            .map_err(|retry_after| RateLimitError::Exceeded {
                provider: provider.to_string(),
                retry_after,
            })
    }

    /// Takes a call slot, waiting for the window to reset if that happens
    /// before `deadline`
    pub async fn acquire_or_wait(&self, provider: &str, deadline: Instant) -> Result<(), RateLimitError> {
        let Some(bucket) = self.buckets.get(provider) else {
            return Ok(());
        };

        loop {
            let now = Instant::now();
            match bucket.take(now) {
                Ok(()) => return Ok(()),
                Err(retry_after) => {
                    let wake = now + retry_after;
                    if wake > deadline {
                        return Err(RateLimitError::TimedOut {
                            provider: provider.to_string(),
                        });
                    }
                    tracing::debug!(provider, ?retry_after, "Waiting for rate limit window");
                    tokio::time::sleep_until(wake).await;
                }
            }
        }
    }
}
