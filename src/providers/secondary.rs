//! Secondary API as a chain provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{KindPolicy, Provider, ProviderRequest};
use crate::data::{ProviderFailure, Record, SecondaryApi, SourceLabel};

/// Asks an external API; the orchestrator applies its rate limit by name
pub struct SecondaryProvider {
    name: String,
    api: Arc<dyn SecondaryApi>,
    timeout: Duration,
}

impl SecondaryProvider {
    pub fn new(api: Arc<dyn SecondaryApi>) -> Self {
        Self {
            name: "secondary".to_string(),
            api,
            timeout: Duration::from_secs(10),
        }
    }

    /// Renames the provider, for chains with more than one external API
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for SecondaryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_label(&self) -> SourceLabel {
        SourceLabel::Secondary
    }

    fn timeout(&self, _policy: &KindPolicy) -> Duration {
        self.timeout
    }

    async fn try_fetch(&self, request: ProviderRequest<'_>) -> Result<Record, ProviderFailure> {
        let key = request.key;
        match self.api.fetch_external(&key.symbol, key.kind, request.params).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(ProviderFailure::Absent),
            Err(e) => Err(ProviderFailure::error(e)),
        }
    }
}
