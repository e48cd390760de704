//! Configuration loading for finfetch
//!
//! Every field has a default, so a missing or empty file gives the built-in
//! behaviour. Per-kind values override the built-in [`KindPolicy`] one field
//! at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::TtlPolicy;
use crate::data::DataKind;
use crate::limiter::{RateLimitPolicy, RateLimiter};
use crate::providers::KindPolicy;

/// Provider names a chain may reference
pub const PROVIDER_NAMES: [&str; 4] = ["store", "refresh", "secondary", "static"];

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("No configuration or data directory available")]
    NoProjectDirs,
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    /// Keyed by data kind name
    pub kinds: BTreeMap<String, KindConfig>,
    /// Keyed by provider name
    pub providers: BTreeMap<String, ProviderConfig>,
    pub refresh: RefreshCommandConfig,
    pub secondary: SecondaryConfig,
    pub static_data: StaticDataConfig,
    pub warmer: WarmerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Defaults to the XDG data directory
    pub dir: Option<PathBuf>,
}

/// Overrides for one data kind; unset fields keep the built-in value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KindConfig {
    pub base_ttl_secs: Option<u64>,
    pub max_ttl_secs: Option<u64>,
    pub error_ttl_secs: Option<u64>,
    pub hit_extension_secs: Option<u64>,
    pub freshness_secs: Option<u64>,
    pub accept_stale: Option<bool>,
    pub refresh_timeout_secs: Option<u64>,
    /// Ordered provider names
    pub chain: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub timeout_ms: Option<u64>,
    pub rate_limit: Option<RateLimitPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshCommandConfig {
    /// Program and arguments; the symbol is appended. Empty disables refresh.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecondaryConfig {
    /// Unset disables the secondary provider
    pub base_url: Option<String>,
    /// Environment variable holding the API token
    pub api_key_env: String,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "FINFETCH_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticDataConfig {
    /// JSON dataset; the bundled dataset is used when unset
    pub path: Option<PathBuf>,
}

/// Settings for the background warmer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarmerConfig {
    pub interval_secs: u64,
    pub concurrency: usize,
    pub hot_set: Vec<HotKey>,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 900, // 15 minutes
            concurrency: 2,
            hot_set: Vec::new(),
        }
    }
}

impl WarmerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// A key the warmer keeps resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotKey {
    pub symbol: String,
    pub kind: DataKind,
}

impl Config {
    /// Loads configuration from `path`, or from the default location
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_path(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_path(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.kinds.keys() {
            let kind = name
                .parse::<DataKind>()
                .map_err(|e| ConfigError::invalid(format!("kinds.{}", name), e.to_string()))?;
            if kind.as_str() != name {
                return Err(ConfigError::invalid(
                    format!("kinds.{}", name),
                    format!("use the canonical name '{}'", kind),
                ));
            }
        }

        for kind in DataKind::ALL {
            let policy = self.kind_policy(kind);
            if policy.ttl.error >= policy.ttl.base {
                return Err(ConfigError::invalid(
                    format!("kinds.{}.error_ttl_secs", kind),
                    "must be shorter than base_ttl_secs",
                ));
            }
            if policy.ttl.base > policy.ttl.max {
                return Err(ConfigError::invalid(
                    format!("kinds.{}.max_ttl_secs", kind),
                    "must be >= base_ttl_secs",
                ));
            }
            if policy.refresh_timeout.is_zero() {
                return Err(ConfigError::invalid(
                    format!("kinds.{}.refresh_timeout_secs", kind),
                    "must be > 0",
                ));
            }
            for name in self.chain_names(kind) {
                if !PROVIDER_NAMES.contains(&name.as_str()) {
                    return Err(ConfigError::invalid(
                        format!("kinds.{}.chain", kind),
                        format!("unknown provider '{}'", name),
                    ));
                }
            }
        }

        for (name, provider) in &self.providers {
            if !PROVIDER_NAMES.contains(&name.as_str()) {
                return Err(ConfigError::invalid(
                    format!("providers.{}", name),
                    "unknown provider",
                ));
            }
            if name == "refresh" && provider.timeout_ms.is_some() {
                return Err(ConfigError::invalid(
                    "providers.refresh.timeout_ms",
                    "the refresh budget is set per kind with kinds.<kind>.refresh_timeout_secs",
                ));
            }
            if provider.timeout_ms == Some(0) {
                return Err(ConfigError::invalid(
                    format!("providers.{}.timeout_ms", name),
                    "must be > 0",
                ));
            }
            if let Some(limit) = provider.rate_limit {
                if limit.window_secs == 0 || limit.calls == 0 {
                    return Err(ConfigError::invalid(
                        format!("providers.{}.rate_limit", name),
                        "calls and window_secs must be > 0",
                    ));
                }
            }
        }

        if self.warmer.interval_secs == 0 {
            return Err(ConfigError::invalid("warmer.interval_secs", "must be > 0"));
        }
        if self.warmer.concurrency == 0 {
            return Err(ConfigError::invalid("warmer.concurrency", "must be > 0"));
        }

        Ok(())
    }

    /// Built-in policy for `kind` with this file's overrides applied
    pub fn kind_policy(&self, kind: DataKind) -> KindPolicy {
        let defaults = KindPolicy::for_kind(kind);
        let Some(overrides) = self.kinds.get(kind.as_str()) else {
            return defaults;
        };

        let secs = |value: Option<u64>, default: Duration| value.map(Duration::from_secs).unwrap_or(default);
        let base = secs(overrides.base_ttl_secs, defaults.ttl.base);
        let ttl = TtlPolicy::new(
            base,
            secs(overrides.max_ttl_secs, defaults.ttl.max),
            secs(overrides.error_ttl_secs, defaults.ttl.error),
        );
        let ttl = match overrides.hit_extension_secs {
            Some(hit_extension) => ttl.with_hit_extension(Duration::from_secs(hit_extension)),
            None => ttl,
        };

        KindPolicy {
            ttl,
            // Freshness follows the base TTL unless set explicitly
            freshness: secs(overrides.freshness_secs, base),
            accept_stale: overrides.accept_stale.unwrap_or(defaults.accept_stale),
            refresh_timeout: secs(overrides.refresh_timeout_secs, defaults.refresh_timeout),
        }
    }

    /// Ordered provider names for `kind`
    pub fn chain_names(&self, kind: DataKind) -> Vec<String> {
        self.kinds
            .get(kind.as_str())
            .and_then(|overrides| overrides.chain.clone())
            .unwrap_or_else(|| PROVIDER_NAMES.iter().map(|name| name.to_string()).collect())
    }

    /// Call timeout for a provider, if configured
    pub fn provider_timeout(&self, name: &str) -> Option<Duration> {
        self.providers
            .get(name)
            .and_then(|provider| provider.timeout_ms)
            .map(Duration::from_millis)
    }

    /// Rate limit for a provider; the secondary API is limited by default
    pub fn rate_limit(&self, name: &str) -> Option<RateLimitPolicy> {
        match self.providers.get(name).and_then(|provider| provider.rate_limit) {
            Some(limit) => Some(limit),
            None if name == "secondary" => Some(RateLimitPolicy::default()),
            None => None,
        }
    }

    /// Limiter with a bucket for every rate-limited provider
    pub fn rate_limiter(&self) -> RateLimiter {
        PROVIDER_NAMES
            .iter()
            .filter_map(|name| self.rate_limit(name).map(|limit| (*name, limit)))
            .fold(RateLimiter::new(), |limiter, (name, limit)| limiter.with_policy(name, limit))
    }

    /// Directory of the persistent store
    pub fn store_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.store.dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().join("store"))
                .ok_or(ConfigError::NoProjectDirs),
        }
    }

    /// This configuration with every default spelled out
    pub fn effective(&self) -> Result<Self, ConfigError> {
        let mut effective = self.clone();
        effective.store.dir = Some(self.store_dir()?);

        for kind in DataKind::ALL {
            let policy = self.kind_policy(kind);
            effective.kinds.insert(
                kind.as_str().to_string(),
                KindConfig {
                    base_ttl_secs: Some(policy.ttl.base.as_secs()),
                    max_ttl_secs: Some(policy.ttl.max.as_secs()),
                    error_ttl_secs: Some(policy.ttl.error.as_secs()),
                    hit_extension_secs: Some(policy.ttl.hit_extension.as_secs()),
                    freshness_secs: Some(policy.freshness.as_secs()),
                    accept_stale: Some(policy.accept_stale),
                    refresh_timeout_secs: Some(policy.refresh_timeout.as_secs()),
                    chain: Some(self.chain_names(kind)),
                },
            );
        }

        for name in PROVIDER_NAMES {
            let entry = effective.providers.entry(name.to_string()).or_default();
            entry.rate_limit = self.rate_limit(name);
        }

        Ok(effective)
    }

    /// Renders the configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "finfetch")
}

/// `~/.config/finfetch/config.toml` on Linux
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}
