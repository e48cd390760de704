//! Static dataset as the last chain provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{KindPolicy, Provider, ProviderRequest};
use crate::data::{ProviderFailure, Record, SourceLabel, StaticDataset};

pub struct StaticProvider {
    name: String,
    dataset: Arc<dyn StaticDataset>,
    timeout: Duration,
}

impl StaticProvider {
    pub fn new(dataset: Arc<dyn StaticDataset>) -> Self {
        Self {
            name: "static".to_string(),
            dataset,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_label(&self) -> SourceLabel {
        SourceLabel::Static
    }

    fn timeout(&self, _policy: &KindPolicy) -> Duration {
        self.timeout
    }

    async fn try_fetch(&self, request: ProviderRequest<'_>) -> Result<Record, ProviderFailure> {
        self.dataset
            .lookup(&request.key.symbol, request.key.kind)
            .ok_or(ProviderFailure::Absent)
    }
}
