//! Persistent store as a chain provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{KindPolicy, Provider, ProviderRequest};
use crate::data::{PersistentStore, ProviderFailure, Record, SourceLabel};

/// Accepts stored records that pass the kind's freshness check
pub struct StoreProvider {
    name: String,
    store: Arc<dyn PersistentStore>,
    timeout: Duration,
}

impl StoreProvider {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            name: "store".to_string(),
            store,
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for StoreProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_label(&self) -> SourceLabel {
        SourceLabel::Store
    }

    fn timeout(&self, _policy: &KindPolicy) -> Duration {
        self.timeout
    }

    async fn try_fetch(&self, request: ProviderRequest<'_>) -> Result<Record, ProviderFailure> {
        let key = request.key;
        match self.store.query_record(&key.symbol, key.kind, request.params).await {
            Ok(Some(record)) => request.policy.check_fresh(record),
            Ok(None) => Err(ProviderFailure::Absent),
            Err(e) => Err(ProviderFailure::error(e)),
        }
    }
}
