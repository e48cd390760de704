//! Refresh pipeline as a chain provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{KindPolicy, Provider, ProviderRequest};
use crate::data::{PersistentStore, ProviderFailure, Record, SourceLabel};
use crate::refresh::{RefreshStatus, RefreshTrigger};

/// Time allowed on top of the refresh budget for re-reading the store
const REQUERY_MARGIN: Duration = Duration::from_secs(2);

/// Triggers a refresh, then reads the refreshed record back from the store
///
/// Accepted records are labelled as coming from the store, since that is
/// where they were read from.
pub struct RefreshProvider {
    name: String,
    trigger: Arc<RefreshTrigger>,
    store: Arc<dyn PersistentStore>,
}

impl RefreshProvider {
    pub fn new(trigger: Arc<RefreshTrigger>, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            name: "refresh".to_string(),
            trigger,
            store,
        }
    }
}

#[async_trait]
impl Provider for RefreshProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_label(&self) -> SourceLabel {
        SourceLabel::Store
    }

    fn timeout(&self, policy: &KindPolicy) -> Duration {
        policy.refresh_timeout + REQUERY_MARGIN
    }

    async fn try_fetch(&self, request: ProviderRequest<'_>) -> Result<Record, ProviderFailure> {
        let key = request.key;
        let budget = request.policy.refresh_timeout;

        match self.trigger.trigger(&key.symbol, budget).await {
            RefreshStatus::Done => match self.store.query_record(&key.symbol, key.kind, request.params).await {
                Ok(Some(record)) => request.policy.check_fresh(record),
                Ok(None) => Err(ProviderFailure::Absent),
                Err(e) => Err(ProviderFailure::error(e)),
            },
            RefreshStatus::TimedOut => Err(ProviderFailure::timeout(budget)),
            RefreshStatus::Failed(reason) => Err(ProviderFailure::error(reason)),
        }
    }
}
