//! TOML configuration.
//!
//! Every field has a default, so a partial file (or none at all) is valid.
//! `load_or_init` writes the defaults out the first time it runs.

use crate::remote::{
    BulkCsvSource, CircuitBreaker, HttpFetcher, OfflineSource, RemoteSource, RoutedSource,
    YahooChartSource,
};
use crate::store::CsvStore;
use crate::tiered::TieredDataCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("write config {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("delimiter '{0}' must be a single ASCII character")]
    InvalidDelimiter(char),

    #[error("HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FincacheConfig {
    /// Root of the CSV store.
    pub data_dir: PathBuf,
    pub remote: RemoteConfig,
    pub price: PriceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Bulk statement URL with `{market}`, `{dataset}` and `{period}`
    /// placeholders. Empty disables remote statements.
    pub bulk_url_template: String,
    pub market: String,
    pub api_key_file: PathBuf,
    pub default_key: String,
    pub delimiter: char,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Pause between the statement downloads of one refresh.
    pub request_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub chart_base_url: String,
    pub range: String,
    pub moving_averages: Vec<usize>,
}

impl Default for FincacheConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote: RemoteConfig::default(),
            price: PriceConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bulk_url_template: String::new(),
            market: "us".into(),
            api_key_file: PathBuf::from("api_key.txt"),
            default_key: "free".into(),
            delimiter: ';',
            timeout_secs: 30,
            max_retries: 3,
            request_delay_ms: 500,
            breaker_cooldown_secs: 30 * 60,
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            chart_base_url: crate::remote::yahoo::DEFAULT_CHART_URL.into(),
            range: "10y".into(),
            moving_averages: vec![20, 50, 200],
        }
    }
}

/// `{cache_dir}/fincache`, or `./data` where the platform has no cache dir.
pub fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("fincache"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// `{config_dir}/fincache/config.toml`, or `./fincache.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("fincache").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("fincache.toml"))
}

impl FincacheConfig {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!(path = %path.display(), "wrote default config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, self.to_toml()?).map_err(write_err)
    }

    /// Assemble the cache: CSV store plus the routed remote tier, or an
    /// always-failing remote tier when `offline`.
    pub fn build_cache(&self, offline: bool) -> Result<TieredDataCache, ConfigError> {
        let store = CsvStore::new(&self.data_dir);
        let remote: Box<dyn RemoteSource> = if offline {
            Box::new(OfflineSource)
        } else {
            Box::new(self.remote_source()?)
        };
        Ok(TieredDataCache::new(store, remote)
            .with_request_delay(Duration::from_millis(self.remote.request_delay_ms)))
    }

    fn remote_source(&self) -> Result<RoutedSource, ConfigError> {
        let remote = &self.remote;
        if !remote.delimiter.is_ascii() {
            return Err(ConfigError::InvalidDelimiter(remote.delimiter));
        }

        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(
            remote.breaker_cooldown_secs,
        )));
        let http = || {
            HttpFetcher::new(
                Arc::clone(&breaker),
                Duration::from_secs(remote.timeout_secs),
                remote.max_retries,
            )
            .map_err(|e| ConfigError::Client(e.to_string()))
        };

        let statements = BulkCsvSource::new(
            http()?,
            remote.bulk_url_template.clone(),
            remote.market.clone(),
            remote.api_key(),
        )
        .with_delimiter(remote.delimiter as u8);

        let prices = YahooChartSource::new(http()?)
            .with_base_url(self.price.chart_base_url.clone())
            .with_range(self.price.range.clone());

        Ok(RoutedSource::new(Box::new(statements), Box::new(prices)))
    }
}

/// Where the API key in use came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyStatus {
    /// Key file missing or empty.
    Fallback { default_key: String },
    /// The file holds the default key.
    DefaultInFile { path: PathBuf },
    Custom { path: PathBuf },
}

impl fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKeyStatus::Fallback { default_key } => {
                write!(f, "key file missing or empty, using the '{default_key}' key")
            }
            ApiKeyStatus::DefaultInFile { path } => {
                write!(f, "using the default key from {}", path.display())
            }
            ApiKeyStatus::Custom { path } => {
                write!(f, "custom API key loaded from {}", path.display())
            }
        }
    }
}

impl RemoteConfig {
    fn key_from_file(&self) -> Option<String> {
        let key = fs::read_to_string(&self.api_key_file).ok()?;
        let key = key.trim();
        (!key.is_empty()).then(|| key.to_string())
    }

    /// The trimmed contents of the key file, or `default_key`.
    pub fn api_key(&self) -> String {
        self.key_from_file()
            .unwrap_or_else(|| self.default_key.clone())
    }

    pub fn api_key_status(&self) -> ApiKeyStatus {
        match self.key_from_file() {
            None => ApiKeyStatus::Fallback {
                default_key: self.default_key.clone(),
            },
            Some(key) if key.eq_ignore_ascii_case(&self.default_key) => {
                ApiKeyStatus::DefaultInFile {
                    path: self.api_key_file.clone(),
                }
            }
            Some(_) => ApiKeyStatus::Custom {
                path: self.api_key_file.clone(),
            },
        }
    }
}
