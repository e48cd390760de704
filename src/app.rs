//! Wiring of configuration and collaborators into an orchestrator
//!
//! [`Collaborators`] holds the external systems the chains talk to; the
//! binary builds the concrete ones from [`Config`], tests pass their own.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::data::{
    BundledDataset, CommandPipeline, FileStore, HttpSecondaryClient, PersistentStore, RefreshPipeline, SecondaryApi,
    SecondaryError, StaticDataset, StaticDatasetError,
};
use crate::orchestrator::Orchestrator;
use crate::providers::{Provider, RefreshProvider, SecondaryProvider, StaticProvider, StoreProvider};
use crate::refresh::RefreshTrigger;

/// Errors that can occur while assembling the application
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    StaticData(#[from] StaticDatasetError),

    #[error("Failed to create secondary API client: {0}")]
    Secondary(#[from] SecondaryError),
}

/// External systems behind the providers
///
/// `pipeline` and `secondary` are optional; chains skip providers whose
/// collaborator is not installed.
pub struct Collaborators {
    pub store: Arc<dyn PersistentStore>,
    pub pipeline: Option<Arc<dyn RefreshPipeline>>,
    pub secondary: Option<Arc<dyn SecondaryApi>>,
    pub dataset: Arc<dyn StaticDataset>,
}

impl Collaborators {
    /// Builds the concrete collaborators described by `config`
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let store = FileStore::with_dir(config.store_dir()?);

        let pipeline = CommandPipeline::from_argv(&config.refresh.command)
            .map(|pipeline| Arc::new(pipeline) as Arc<dyn RefreshPipeline>);

        let secondary = match &config.secondary.base_url {
            Some(base_url) => {
                let api_key = std::env::var(&config.secondary.api_key_env).ok();
                let client = HttpSecondaryClient::new(base_url.clone(), api_key)?;
                Some(Arc::new(client) as Arc<dyn SecondaryApi>)
            }
            None => None,
        };

        let dataset = match &config.static_data.path {
            Some(path) => BundledDataset::from_file(path)?,
            None => BundledDataset::builtin(),
        };

        Ok(Self {
            store: Arc::new(store),
            pipeline,
            secondary,
            dataset: Arc::new(dataset),
        })
    }
}

/// Builds an orchestrator whose chains follow `config`
pub fn build_orchestrator(config: &Config, collaborators: Collaborators) -> Orchestrator {
    let Collaborators {
        store,
        pipeline,
        secondary,
        dataset,
    } = collaborators;

    let mut installed: HashMap<&str, Arc<dyn Provider>> = HashMap::new();

    let mut store_provider = StoreProvider::new(Arc::clone(&store));
    if let Some(timeout) = config.provider_timeout("store") {
        store_provider = store_provider.with_timeout(timeout);
    }
    installed.insert("store", Arc::new(store_provider));

    if let Some(pipeline) = pipeline {
        let trigger = Arc::new(RefreshTrigger::new(pipeline));
        installed.insert("refresh", Arc::new(RefreshProvider::new(trigger, Arc::clone(&store))));
    }

    if let Some(api) = secondary {
        let mut provider = SecondaryProvider::new(api);
        if let Some(timeout) = config.provider_timeout("secondary") {
            provider = provider.with_timeout(timeout);
        }
        installed.insert("secondary", Arc::new(provider));
    }

    let mut static_provider = StaticProvider::new(dataset);
    if let Some(timeout) = config.provider_timeout("static") {
        static_provider = static_provider.with_timeout(timeout);
    }
    installed.insert("static", Arc::new(static_provider));

    let mut builder = Orchestrator::builder(store).limiter(config.rate_limiter());
    for kind in crate::data::DataKind::ALL {
        let chain: Vec<Arc<dyn Provider>> = config
            .chain_names(kind)
            .iter()
            .filter_map(|name| {
                let provider = installed.get(name.as_str()).cloned();
                if provider.is_none() {
                    tracing::debug!(%kind, provider = %name, "Provider not installed, left out of chain");
                }
                provider
            })
            .collect();
        builder = builder.chain(kind, chain).policy(kind, config.kind_policy(kind));
    }

    builder.build()
}

/// Configuration plus the orchestrator built from it
pub struct App {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let collaborators = Collaborators::from_config(&config)?;
        let orchestrator = Arc::new(build_orchestrator(&config, collaborators));
        Ok(Self { config, orchestrator })
    }
}
