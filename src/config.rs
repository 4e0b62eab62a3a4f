//! Pipeline configuration.
//!
//! Loaded from a TOML file (usually `captiongraph.toml`). Every section is
//! optional and falls back to defaults. After parsing, `CAPTIONGRAPH_*`
//! environment variables override file values, then the result is validated.
//!
//! ```toml
//! [dataset]
//! path = "./data/dataset_flickr8k.json"
//! image_root = "Flickr8k_Dataset"
//!
//! [checkpoint]
//! path = "progress.json"
//!
//! [storage]
//! backend = "persistent"
//! data_dir = "./graph.cg"
//!
//! [extractor]
//! endpoint = "http://localhost:9000"
//! timeout_secs = 30
//!
//! [batch]
//! failure_policy = "abort"
//!
//! [synonyms]
//! puppy = "dog"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::FailurePolicy;
use crate::canonical::Canonicalizer;
use crate::error::ConfigError;
use crate::extract::CoreNlpConfig;
#[cfg(feature = "persistent")]
use crate::storage::PersistentConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const MIN_WAL_SIZE: u64 = 4 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub checkpoint: CheckpointConfig,
    pub storage: StorageConfig,
    pub extractor: ExtractorConfig,
    pub batch: BatchConfig,
    /// Extra `surface = "canonical"` entries layered over the built-in table.
    pub synonyms: BTreeMap<String, String>,
    pub logging: LoggingConfig,
}

/// `[dataset]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Karpathy-format caption file.
    pub path: PathBuf,
    /// Directory holding the image files named in the dataset.
    pub image_root: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/dataset_flickr8k.json"),
            image_root: PathBuf::from("Flickr8k_Dataset"),
        }
    }
}

/// `[checkpoint]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("progress.json"),
        }
    }
}

/// Which graph store backs a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// WAL-backed store under `data_dir`.
    #[default]
    Persistent,
    /// Process-local store; the graph is lost on exit.
    Memory,
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    pub sync_on_write: bool,
    /// WAL size in bytes above which the store asks for compaction.
    pub max_wal_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Persistent,
            data_dir: PathBuf::from("./graph.cg"),
            sync_on_write: true,
            max_wal_size: 64 * 1024 * 1024,
        }
    }
}

/// `[extractor]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// `[batch]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub failure_policy: FailurePolicy,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file, apply environment overrides, then validate.
    ///
    /// # Errors
    /// `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse_toml(&contents)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string, apply env overrides, then validate.
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed TOML, `ConfigError::Invalid` for bad values.
    pub fn parse_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    ///
    /// # Errors
    /// As [`PipelineConfig::parse_toml`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse_toml("")
    }

    /// Apply `CAPTIONGRAPH_*` environment variable overrides.
    ///
    /// - `CAPTIONGRAPH_DATASET_PATH` → `dataset.path`
    /// - `CAPTIONGRAPH_DATASET_IMAGE_ROOT` → `dataset.image_root`
    /// - `CAPTIONGRAPH_CHECKPOINT_PATH` → `checkpoint.path`
    /// - `CAPTIONGRAPH_STORAGE_BACKEND` → `storage.backend`
    /// - `CAPTIONGRAPH_STORAGE_DATA_DIR` → `storage.data_dir`
    /// - `CAPTIONGRAPH_STORAGE_SYNC_ON_WRITE` → `storage.sync_on_write`
    /// - `CAPTIONGRAPH_STORAGE_MAX_WAL_SIZE` → `storage.max_wal_size`
    /// - `CAPTIONGRAPH_EXTRACTOR_ENDPOINT` → `extractor.endpoint`
    /// - `CAPTIONGRAPH_EXTRACTOR_TIMEOUT_SECS` → `extractor.timeout_secs`
    /// - `CAPTIONGRAPH_BATCH_FAILURE_POLICY` → `batch.failure_policy`
    /// - `CAPTIONGRAPH_LOG_LEVEL` → `logging.level`
    /// - `CAPTIONGRAPH_LOG_FORMAT` → `logging.format`
    ///
    /// # Errors
    /// `ConfigError::Invalid` if a variable is set to an unparseable value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with a custom lookup.
    ///
    /// # Errors
    /// `ConfigError::Invalid` if a value cannot be parsed.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CAPTIONGRAPH_DATASET_PATH") {
            self.dataset.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CAPTIONGRAPH_DATASET_IMAGE_ROOT") {
            self.dataset.image_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("CAPTIONGRAPH_CHECKPOINT_PATH") {
            self.checkpoint.path = PathBuf::from(v);
        }

        if let Some(v) = lookup("CAPTIONGRAPH_STORAGE_BACKEND") {
            self.storage.backend = parse_enum("storage.backend", &v)?;
        }
        if let Some(v) = lookup("CAPTIONGRAPH_STORAGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CAPTIONGRAPH_STORAGE_SYNC_ON_WRITE") {
            self.storage.sync_on_write = parse_value("storage.sync_on_write", &v)?;
        }
        if let Some(v) = lookup("CAPTIONGRAPH_STORAGE_MAX_WAL_SIZE") {
            self.storage.max_wal_size = parse_value("storage.max_wal_size", &v)?;
        }

        if let Some(v) = lookup("CAPTIONGRAPH_EXTRACTOR_ENDPOINT") {
            self.extractor.endpoint = v;
        }
        if let Some(v) = lookup("CAPTIONGRAPH_EXTRACTOR_TIMEOUT_SECS") {
            self.extractor.timeout_secs = parse_value("extractor.timeout_secs", &v)?;
        }

        if let Some(v) = lookup("CAPTIONGRAPH_BATCH_FAILURE_POLICY") {
            self.batch.failure_policy = parse_enum("batch.failure_policy", &v)?;
        }

        if let Some(v) = lookup("CAPTIONGRAPH_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("CAPTIONGRAPH_LOG_FORMAT") {
            self.logging.format = parse_enum("logging.format", &v)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.path.as_os_str().is_empty() {
            return Err(invalid("dataset.path", "must not be empty"));
        }
        if self.checkpoint.path.as_os_str().is_empty() {
            return Err(invalid("checkpoint.path", "must not be empty"));
        }
        if self.storage.backend == StorageBackend::Persistent
            && self.storage.data_dir.as_os_str().is_empty()
        {
            return Err(invalid("storage.data_dir", "must not be empty"));
        }
        if self.storage.max_wal_size < MIN_WAL_SIZE {
            return Err(invalid(
                "storage.max_wal_size",
                format!("must be at least {MIN_WAL_SIZE} bytes"),
            ));
        }

        let endpoint = self.extractor.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(invalid(
                "extractor.endpoint",
                format!("must be an http(s) URL, got '{}'", self.extractor.endpoint),
            ));
        }
        if self.extractor.timeout_secs == 0 {
            return Err(invalid("extractor.timeout_secs", "must be greater than 0"));
        }

        if let Some((surface, _)) = self
            .synonyms
            .iter()
            .find(|(s, c)| s.trim().is_empty() || c.trim().is_empty())
        {
            return Err(invalid(
                "synonyms",
                format!("entry '{surface}' has an empty surface or canonical form"),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(
                "logging.level",
                format!(
                    "must be one of {}, got '{}'",
                    LOG_LEVELS.join(", "),
                    self.logging.level
                ),
            ));
        }
        Ok(())
    }

    /// Extractor client settings.
    #[must_use]
    pub fn corenlp_config(&self) -> CoreNlpConfig {
        CoreNlpConfig {
            endpoint: self.extractor.endpoint.trim().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.extractor.timeout_secs),
        }
    }

    /// Persistent store settings.
    #[cfg(feature = "persistent")]
    #[must_use]
    pub fn persistent_config(&self) -> PersistentConfig {
        PersistentConfig {
            max_wal_size: self.storage.max_wal_size,
            sync_on_write: self.storage.sync_on_write,
        }
    }

    /// Built-in synonym table extended with `[synonyms]`.
    #[must_use]
    pub fn canonicalizer(&self) -> Canonicalizer {
        Canonicalizer::with_extra(self.synonyms.iter().map(|(s, c)| (s, c.clone())))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_value<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, format!("cannot parse '{raw}': {e}")))
}

fn parse_enum<T: serde::de::DeserializeOwned>(field: &str, raw: &str) -> Result<T, ConfigError> {
    T::deserialize(serde::de::value::StrDeserializer::<serde::de::value::Error>::new(
        &raw.trim().to_lowercase(),
    ))
    .map_err(|e| invalid(field, format!("cannot parse '{raw}': {e}")))
}
