//! Single-flight coordination
//!
//! Guarantees at most one in-flight computation per key. The first caller
//! for a key spawns the computation as its own task and registers a ticket;
//! every concurrent caller for the same key attaches to that ticket and
//! receives a clone of the same result.
//!
//! The computation is not tied to any caller: a caller that gives up waiting
//! leaves the task running, so other waiters and cache write-back still
//! benefit from it. The ticket is removed under the key's shard lock in the
//! same step that publishes the result.

use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Errors a waiter can observe instead of a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightError {
    /// The computation panicked or its task was dropped
    #[error("in-flight computation aborted: {0}")]
    Aborted(String),

    /// This waiter stopped waiting; the computation carries on
    #[error("gave up waiting after {0:?}")]
    Elapsed(Duration),
}

type Slot<V> = Option<Result<V, FlightError>>;

/// Registry entry for one running computation
struct Ticket<V> {
    id: u64,
    started_at: Instant,
    receiver: watch::Receiver<Slot<V>>,
}

/// Owns the sending half of a ticket inside the spawned task
///
/// Dropping it without delivering (runtime shutdown, task cancellation)
/// still releases the ticket so the key can be resolved again.
struct TicketGuard<K: Eq + Hash, V> {
    table: Arc<DashMap<K, Ticket<V>>>,
    key: K,
    id: u64,
    sender: Option<watch::Sender<Slot<V>>>,
}

impl<K: Eq + Hash, V> TicketGuard<K, V> {
    fn deliver(mut self, result: Result<V, FlightError>) {
        let sender = self.sender.take();
        let mut result = Some(result);
        let id = self.id;

        self.table.remove_if(&self.key, |_, ticket| {
            if ticket.id != id {
                return false;
            }
            if let (Some(sender), Some(result)) = (sender.as_ref(), result.take()) {
                sender.send_replace(Some(result));
            }
            true
        });

        if let (Some(sender), Some(result)) = (sender, result) {
            sender.send_replace(Some(result));
        }
    }
}

impl<K: Eq + Hash, V> Drop for TicketGuard<K, V> {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            let id = self.id;
            self.table.remove_if(&self.key, |_, ticket| ticket.id == id);
        }
    }
}

/// Per-key deduplication of concurrent computations
pub struct SingleFlight<K, V> {
    in_flight: Arc<DashMap<K, Ticket<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `compute` for `key` unless a computation is already in flight,
    /// then waits for the shared result
    pub async fn resolve<F>(&self, key: K, compute: F) -> Result<V, FlightError>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let receiver = self.join(key, compute);
        wait(receiver).await
    }

    /// Like [`resolve`](Self::resolve), but gives up waiting after `wait`
    ///
    /// Giving up only affects this caller; the computation keeps running.
    pub async fn resolve_within<F>(&self, key: K, max_wait: Duration, compute: F) -> Result<V, FlightError>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let receiver = self.join(key, compute);
        match tokio::time::timeout(max_wait, wait(receiver)).await {
            Ok(result) => result,
            Err(_) => Err(FlightError::Elapsed(max_wait)),
        }
    }

    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    /// How long the computation for `key` has been running
    pub fn running_for(&self, key: &K) -> Option<Duration> {
        self.in_flight.get(key).map(|ticket| ticket.started_at.elapsed())
    }

    fn join<F>(&self, key: K, compute: F) -> watch::Receiver<Slot<V>>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let (guard, receiver) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(ticket) => {
                tracing::trace!(?key, "Joining in-flight computation");
                return ticket.get().receiver.clone();
            }
            Entry::Vacant(slot) => {
                let (sender, receiver) = watch::channel(None);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                slot.insert(Ticket {
                    id,
                    started_at: Instant::now(),
                    receiver: receiver.clone(),
                });
                let guard = TicketGuard {
                    table: Arc::clone(&self.in_flight),
                    key,
                    id,
                    sender: Some(sender),
                };
                (guard, receiver)
            }
        };

        tokio::spawn(async move {
            let result = AssertUnwindSafe(compute)
                .catch_unwind()
                .await
                .map_err(|panic| FlightError::Aborted(panic_message(panic.as_ref())));
            if let Err(ref err) = result {
                tracing::error!(key = ?guard.key, error = %err, "In-flight computation panicked");
            }
            guard.deliver(result);
        });

        receiver
    }
}

async fn wait<V: Clone>(mut receiver: watch::Receiver<Slot<V>>) -> Result<V, FlightError> {
    match receiver.wait_for(Option::is_some).await {
        Ok(slot) => match slot.as_ref() {
            Some(result) => result.clone(),
            None => Err(FlightError::Aborted("empty result".to_string())),
        },
        Err(_) => Err(FlightError::Aborted("computation dropped before completing".to_string())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
