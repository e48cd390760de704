//! Background cache warmer
//!
//! Periodically resolves a configured hot set through
//! [`Orchestrator::fetch`] so foreground requests find warm cache entries.
//! Progress is reported over a channel to whoever holds the handle.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{HotKey, WarmerConfig};
use crate::data::{DataKind, FetchOptions, SourceLabel};
use crate::orchestrator::Orchestrator;

/// Messages sent from the warmer task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WarmerEvent {
    CycleStarted { cycle: u64, keys: usize },
    /// A hot key resolved to a value
    KeyWarmed {
        symbol: String,
        kind: DataKind,
        source: SourceLabel,
    },
    /// A hot key resolved without a value
    KeyFailed {
        symbol: String,
        kind: DataKind,
        reason: String,
    },
    CycleCompleted { cycle: u64, warmed: usize, failed: usize },
}

/// Handle for controlling the warmer task
pub struct WarmerHandle {
    /// Channel for receiving progress events
    pub receiver: mpsc::Receiver<WarmerEvent>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WarmerHandle {
    /// Spawns the warmer; the first cycle starts immediately
    pub fn spawn(config: WarmerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(run(config, orchestrator, event_tx, trigger_rx, shutdown_rx));

        Self {
            receiver: event_rx,
            trigger_tx,
            shutdown_tx,
            task,
        }
    }

    /// Asks for a cycle now instead of at the next interval
    ///
    /// A request made while one is already pending is merged into it.
    pub fn request_cycle(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Stops the warmer after the cycle in progress, if any
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        drop(self.receiver);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Warmer task ended abnormally");
        }
    }
}

async fn run(
    config: WarmerConfig,
    orchestrator: Arc<Orchestrator>,
    events: mpsc::Sender<WarmerEvent>,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut interval = tokio::time::interval(config.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let concurrency = config.concurrency.max(1);
    let mut cycle = 0;

    tracing::info!(keys = config.hot_set.len(), interval = ?config.interval(), concurrency, "Warmer started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {}
            Some(()) = trigger_rx.recv() => interval.reset(),
        }

        cycle += 1;
        warm_cycle(cycle, &config.hot_set, concurrency, &orchestrator, &events).await;
    }

    tracing::info!(cycles = cycle, "Warmer stopped");
}

async fn warm_cycle(
    cycle: u64,
    hot_set: &[HotKey],
    concurrency: usize,
    orchestrator: &Arc<Orchestrator>,
    events: &mpsc::Sender<WarmerEvent>,
) {
    let _ = events
        .send(WarmerEvent::CycleStarted {
            cycle,
            keys: hot_set.len(),
        })
        .await;
    let started = tokio::time::Instant::now();

    // Each future owns its key and orchestrator handle
    let lookups: Vec<_> = hot_set
        .iter()
        .cloned()
        .map(|key| warm_key(Arc::clone(orchestrator), key))
        .collect();
    let mut results = stream::iter(lookups).buffer_unordered(concurrency);

    let mut warmed = 0;
    while let Some(event) = results.next().await {
        if matches!(event, WarmerEvent::KeyWarmed { .. }) {
            warmed += 1;
        }
        let _ = events.send(event).await;
    }
    let failed = hot_set.len() - warmed;

    tracing::info!(cycle, warmed, failed, elapsed = ?started.elapsed(), "Warmer cycle completed");
    let _ = events
        .send(WarmerEvent::CycleCompleted { cycle, warmed, failed })
        .await;
}

async fn warm_key(orchestrator: Arc<Orchestrator>, key: HotKey) -> WarmerEvent {
    let outcome = orchestrator
        .fetch(&key.symbol, key.kind, FetchOptions::default())
        .await;

    match (outcome.value.is_some(), outcome.source, outcome.error) {
        (true, Some(source), _) => WarmerEvent::KeyWarmed {
            symbol: key.symbol,
            kind: key.kind,
            source,
        },
        (_, _, error) => {
            let reason = error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no value".to_string());
            tracing::debug!(symbol = %key.symbol, kind = %key.kind, %reason, "Warmer could not resolve key");
            WarmerEvent::KeyFailed {
                symbol: key.symbol,
                kind: key.kind,
                reason,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PersistentStore, ProviderFailure, Record, StoreError};
    use crate::providers::{KindPolicy, Provider, ProviderRequest};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullStore;

    #[async_trait]
    impl PersistentStore for NullStore {
        async fn query_record(
            &self,
            _symbol: &str,
            _kind: DataKind,
            _params: &BTreeMap<String, String>,
        ) -> Result<Option<Record>, StoreError> {
            Ok(None)
        }

        async fn save_record(&self, _record: &Record, _params: &BTreeMap<String, String>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Knows only SBUX; tracks how many calls overlap
    #[derive(Default)]
    struct SlowStatic {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Provider for SlowStatic {
        fn name(&self) -> &str {
            "static"
        }

        fn source_label(&self) -> SourceLabel {
            SourceLabel::Static
        }

        fn timeout(&self, _policy: &KindPolicy) -> Duration {
            Duration::from_secs(10)
        }

        async fn try_fetch(&self, request: ProviderRequest<'_>) -> Result<Record, ProviderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if request.key.symbol == "SBUX" {
                Ok(Record::new("SBUX", request.key.kind, json!({"eps": 0.9})))
            } else {
                Err(ProviderFailure::Absent)
            }
        }
    }

    fn hot(symbol: &str) -> HotKey {
        HotKey {
            symbol: symbol.to_string(),
            kind: DataKind::Financials,
        }
    }

    fn setup(hot_set: Vec<HotKey>) -> (Arc<SlowStatic>, Arc<Orchestrator>, WarmerConfig) {
        let provider = Arc::new(SlowStatic::default());
        let orchestrator = Orchestrator::builder(Arc::new(NullStore))
            .default_chain(vec![provider.clone()])
            .build();
        let config = WarmerConfig {
            interval_secs: 60,
            concurrency: 2,
            hot_set,
        };
        (provider, Arc::new(orchestrator), config)
    }

    async fn next_completed(handle: &mut WarmerHandle) -> Vec<WarmerEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.receiver.recv().await {
            let done = matches!(event, WarmerEvent::CycleCompleted { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_reports_each_key() {
        let (_provider, orchestrator, config) = setup(vec![hot("SBUX"), hot("FARM")]);
        let mut handle = WarmerHandle::spawn(config, orchestrator);

        let events = next_completed(&mut handle).await;

        assert_eq!(events.first(), Some(&WarmerEvent::CycleStarted { cycle: 1, keys: 2 }));
        assert!(events.contains(&WarmerEvent::KeyWarmed {
            symbol: "SBUX".to_string(),
            kind: DataKind::Financials,
            source: SourceLabel::Static,
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, WarmerEvent::KeyFailed { symbol, .. } if symbol == "FARM")));
        assert_eq!(
            events.last(),
            Some(&WarmerEvent::CycleCompleted {
                cycle: 1,
                warmed: 1,
                failed: 1
            })
        );

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let keys = ["A", "B", "C", "D", "E"].into_iter().map(hot).collect();
        let (provider, orchestrator, config) = setup(keys);
        let mut handle = WarmerHandle::spawn(config, orchestrator);

        next_completed(&mut handle).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_cycle_hits_cache() {
        let (provider, orchestrator, config) = setup(vec![hot("SBUX")]);
        let mut handle = WarmerHandle::spawn(config, orchestrator);

        next_completed(&mut handle).await;
        let second = next_completed(&mut handle).await;

        assert!(second.contains(&WarmerEvent::KeyWarmed {
            symbol: "SBUX".to_string(),
            kind: DataKind::Financials,
            source: SourceLabel::Cache,
        }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_cycle_runs_before_interval() {
        let (_provider, orchestrator, config) = setup(vec![hot("SBUX")]);
        let mut handle = WarmerHandle::spawn(config, orchestrator);
        next_completed(&mut handle).await;

        let start = tokio::time::Instant::now();
        handle.request_cycle();
        let events = next_completed(&mut handle).await;

        assert_eq!(events.first(), Some(&WarmerEvent::CycleStarted { cycle: 2, keys: 1 }));
        assert!(start.elapsed() < Duration::from_secs(60));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let (provider, orchestrator, config) = setup(vec![hot("SBUX")]);
        let mut handle = WarmerHandle::spawn(config, orchestrator);
        next_completed(&mut handle).await;

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
