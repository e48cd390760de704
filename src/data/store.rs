//! Persistent store contract and a JSON-file implementation
//!
//! The store is the authoritative, read-mostly record source at the head of
//! every fallback chain. Records are identified by symbol, kind and request
//! parameters; `FileStore` keeps one JSON document per identity in an
//! XDG-compliant data directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{normalize_symbol, DataKind, Record};

/// Errors that can occur when reading or writing the persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be (de)serialized
    #[error("Store document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// No usable data directory could be determined
    #[error("No data directory available for the store")]
    NoDataDir,
}

/// Persistent record storage consulted first in every fallback chain
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Returns the stored record for a symbol, kind and parameter set, if any
    async fn query_record(
        &self,
        symbol: &str,
        kind: DataKind,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<Record>, StoreError>;

    /// Inserts or replaces the record stored under its symbol, kind and `params`
    async fn save_record(&self, record: &Record, params: &BTreeMap<String, String>) -> Result<(), StoreError>;
}

/// On-disk document: the record plus the parameters it was fetched with
///
/// Documents without `params` are the unparameterized records written by
/// the refresh pipeline.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
    #[serde(flatten)]
    record: Record,
}

/// Stores records as JSON files on disk
///
/// Uses `~/.local/share/finfetch/store/` on Linux, or the equivalent XDG
/// path on other platforms, unless a directory is given explicitly.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where record files are stored
    dir: PathBuf,
}

impl FileStore {
    /// Creates a FileStore in the XDG data directory
    pub fn new() -> Result<Self, StoreError> {
        let project_dirs = ProjectDirs::from("", "", "finfetch").ok_or(StoreError::NoDataDir)?;
        Ok(Self {
            dir: project_dirs.data_dir().join("store"),
        })
    }

    /// Creates a FileStore rooted at a custom directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the record files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the record file for a symbol, kind and parameter set
    ///
    /// Unparameterized records live in `{SYMBOL}_{kind}.json`; each parameter
    /// adds a `_{name}-{value}` segment.
    fn record_path(&self, symbol: &str, kind: DataKind, params: &BTreeMap<String, String>) -> PathBuf {
        let mut stem = format!("{}_{}", file_component(&normalize_symbol(symbol)), kind);
        for (name, value) in params {
            stem.push('_');
            stem.push_str(&file_component(name));
            stem.push('-');
            stem.push_str(&file_component(value));
        }
        self.dir.join(format!("{}.json", stem))
    }
}

fn file_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn query_record(
        &self,
        symbol: &str,
        kind: DataKind,
        params: &BTreeMap<String, String>,
    ) -> Result<Option<Record>, StoreError> {
        let path = self.record_path(symbol, kind, params);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredRecord = serde_json::from_str(&content)?;

        // Distinct parameter sets can sanitize to the same file name
        if &stored.params != params {
            tracing::debug!(path = %path.display(), "Stored record has different parameters");
            return Ok(None);
        }
        Ok(Some(stored.record))
    }

    async fn save_record(&self, record: &Record, params: &BTreeMap<String, String>) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(&record.symbol, record.kind, params);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&StoredRecord {
            params: params.clone(),
            record: record.clone(),
        })?;

        // Readers only ever see a complete file
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn no_params() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::with_dir(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_creates_file_in_store_directory() {
        let (store, temp_dir) = create_test_store();
        let record = Record::new("KDP", DataKind::Financials, json!({"data": [{"year": 2024}]}));

        store.save_record(&record, &no_params()).await.expect("Save should succeed");

        let expected_path = temp_dir.path().join("KDP_financials.json");
        assert!(expected_path.exists(), "Record file should exist");

        let content = std::fs::read_to_string(&expected_path).expect("Should read file");
        assert!(content.contains("\"financials\""));
        assert!(content.contains("2024"));
        assert!(!temp_dir.path().join("KDP_financials.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_query_returns_none_for_missing_record() {
        let (store, _temp_dir) = create_test_store();

        let result = store
            .query_record("NOPE", DataKind::News, &no_params())
            .await.expect("Query should succeed");

        assert!(result.is_none(), "Should return None for missing record");
    }

    #[tokio::test]
    async fn test_query_returns_saved_record_with_timestamp() {
        let (store, _temp_dir) = create_test_store();
        let mut record = Record::new("KDP", DataKind::Earnings, json!([{"eps_actual": 0.41}]));
        record.as_of = Utc::now() - Duration::hours(1);

        store.save_record(&record, &no_params()).await.expect("Save should succeed");
        let loaded = store
            .query_record("kdp", DataKind::Earnings, &no_params())
            .await
            .expect("Query should succeed")
            .expect("Record should exist");

        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_save_overwrites_existing_record() {
        let (store, _temp_dir) = create_test_store();
        let first = Record::new("SBUX", DataKind::Prices, json!({"close": 90.0}));
        let second = Record::new("SBUX", DataKind::Prices, json!({"close": 91.5}));

        store.save_record(&first, &no_params()).await.expect("First save should succeed");
        store.save_record(&second, &no_params()).await.expect("Second save should succeed");

        let loaded = store
            .query_record("SBUX", DataKind::Prices, &no_params())
            .await.unwrap().unwrap();
        assert_eq!(loaded.payload, json!({"close": 91.5}));
    }

    #[tokio::test]
    async fn test_save_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("store");
        let store = FileStore::with_dir(nested_path.clone());

        let record = Record::new("FARM", DataKind::News, json!([]));
        store.save_record(&record, &no_params()).await.expect("Save should succeed");

        assert!(nested_path.join("FARM_news.json").exists());
    }

    #[tokio::test]
    async fn test_malformed_document_is_an_error() {
        let (store, temp_dir) = create_test_store();
        std::fs::write(temp_dir.path().join("BAD_prices.json"), "{not json").unwrap();

        let result = store.query_record("BAD", DataKind::Prices, &no_params()).await;

        assert!(matches!(result, Err(StoreError::Malformed(_))));
    }

    #[test]
    fn test_record_path_sanitizes_symbol() {
        let store = FileStore::with_dir("/tmp/store");
        let path = store.record_path("brk/b", DataKind::Prices, &no_params());
        assert_eq!(path, PathBuf::from("/tmp/store/BRK_B_prices.json"));

        let path = store.record_path("KDP", DataKind::Financials, &params(&[("freq", "annual")]));
        assert_eq!(path, PathBuf::from("/tmp/store/KDP_financials_freq-annual.json"));
    }

    #[tokio::test]
    async fn test_records_are_kept_per_parameter_set() {
        let (store, _temp_dir) = create_test_store();
        let annual = params(&[("freq", "annual")]);
        let record = Record::new("KDP", DataKind::Financials, json!({"freq": "annual"}));

        store.save_record(&record, &annual).await.unwrap();

        let loaded = store.query_record("KDP", DataKind::Financials, &annual).await.unwrap();
        assert_eq!(loaded, Some(record));

        let quarterly = store
            .query_record("KDP", DataKind::Financials, &params(&[("freq", "quarterly")]))
            .await
            .unwrap();
        assert!(quarterly.is_none(), "Other parameters must not see the annual record");

        let plain = store.query_record("KDP", DataKind::Financials, &no_params()).await.unwrap();
        assert!(plain.is_none(), "Unparameterized lookups must not see it either");
    }

    #[tokio::test]
    async fn test_sanitized_name_collision_is_not_served() {
        let (store, _temp_dir) = create_test_store();
        let slash = params(&[("range", "1/2")]);
        let colon = params(&[("range", "1:2")]);
        let record = Record::new("KDP", DataKind::Prices, json!({"range": "1/2"}));
        assert_eq!(
            store.record_path("KDP", DataKind::Prices, &slash),
            store.record_path("KDP", DataKind::Prices, &colon)
        );

        store.save_record(&record, &slash).await.unwrap();

        assert!(store.query_record("KDP", DataKind::Prices, &colon).await.unwrap().is_none());
        assert!(store.query_record("KDP", DataKind::Prices, &slash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reads_plain_record_documents() {
        let (store, temp_dir) = create_test_store();
        let record = Record::new("PEP", DataKind::News, json!([{"headline": "Q3"}]));
        std::fs::write(
            temp_dir.path().join("PEP_news.json"),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        let loaded = store.query_record("PEP", DataKind::News, &no_params()).await.unwrap();

        assert_eq!(loaded, Some(record));
    }

    #[test]
    fn test_new_uses_xdg_compliant_path() {
        if let Ok(store) = FileStore::new() {
            let path_str = store.dir.to_string_lossy();
            assert!(path_str.contains("finfetch"), "Store path should contain project name");
        }
        // Test passes if new() fails (e.g., no home directory in CI)
    }
}
