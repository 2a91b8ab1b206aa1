//! Tier 2: persistent CSV store.
//!
//! Layout: `{root}/{TICKER}/{TICKER}_{FileStem}_{period}.csv`
//!
//! Features:
//! - Atomic writes (write to a unique temp file, rename into place)
//! - Metadata sidecar per table (column kinds, row count, hash, provider)
//! - Column kinds restored from the sidecar when its hash matches the CSV,
//!   inferred from the cells otherwise
//! - Never evicts on its own; `remove_ticker` is the only delete path

use crate::key::{CacheKey, Ticker};
use crate::table::{ColumnKind, DataTable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

/// Metadata sidecar for one stored table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub key: CacheKey,
    pub row_count: usize,
    pub column_kinds: Vec<ColumnKind>,
    /// `(row, column)` of empty text cells, which the CSV cannot tell apart
    /// from nulls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub empty_text: Vec<(usize, usize)>,
    pub data_hash: String,
    pub provider: String,
    pub fetched_at: DateTime<Utc>,
}

/// A table loaded from disk with its recorded fetch time.
#[derive(Debug, Clone)]
pub struct StoredTable {
    pub table: DataTable,
    pub fetched_at: DateTime<Utc>,
    pub provider: Option<String>,
}

/// Presence of one key on disk.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub key: CacheKey,
    pub cached: bool,
    pub row_count: Option<usize>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// The CSV store.
#[derive(Debug, Clone)]
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a ticker: `{root}/{TICKER}/`
    fn ticker_dir(&self, ticker: &Ticker) -> PathBuf {
        self.root.join(ticker.as_str())
    }

    /// Path to the CSV file for a key.
    pub fn table_path(&self, key: &CacheKey) -> PathBuf {
        let ticker = key.ticker().as_str();
        self.ticker_dir(key.ticker()).join(format!(
            "{ticker}_{}_{}.csv",
            key.dataset().file_stem(),
            key.period()
        ))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.table_path(key).with_extension("meta.json")
    }

    /// Load the table for `key`. `Ok(None)` means absent.
    pub fn load(&self, key: &CacheKey) -> Result<Option<StoredTable>, StoreError> {
        let path = self.table_path(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let hash = blake3::hash(&bytes).to_hex().to_string();
        let meta = self.get_meta(key);
        let kinds = match &meta {
            Some(m) if m.data_hash == hash => Some(m.column_kinds.as_slice()),
            Some(_) => {
                warn!(key = %key, "metadata sidecar does not match CSV, inferring column kinds");
                None
            }
            None => None,
        };

        let (headers, records) = read_csv(&bytes, b',').map_err(|e| StoreError::Decode {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let mut table =
            DataTable::from_records(headers, records, key.dataset().period_column(), kinds)
                .map_err(|e| StoreError::Decode {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

        let (fetched_at, provider) = match meta.filter(|m| m.data_hash == hash) {
            Some(m) => {
                table.restore_empty_text(&m.empty_text);
                (m.fetched_at, Some(m.provider))
            }
            None => (modified_time(&path), None),
        };

        debug!(key = %key, rows = table.len(), "loaded table from disk");
        Ok(Some(StoredTable {
            table,
            fetched_at,
            provider,
        }))
    }

    /// Write the table for `key`, replacing any previous version atomically.
    pub fn save(
        &self,
        key: &CacheKey,
        table: &DataTable,
        provider: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let path = self.table_path(key);
        let dir = self.ticker_dir(key.ticker());
        fs::create_dir_all(&dir).map_err(|e| StoreError::Write {
            path: dir.clone(),
            reason: format!("create dir: {e}"),
        })?;

        let bytes = encode_csv(table).map_err(|e| StoreError::Write {
            path: path.clone(),
            reason: format!("encode: {e}"),
        })?;
        write_atomic(&path, &bytes)?;

        let meta = TableMeta {
            key: key.clone(),
            row_count: table.len(),
            column_kinds: table.columns().iter().map(|c| c.kind).collect(),
            empty_text: table.empty_text_cells(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            provider: provider.to_string(),
            fetched_at,
        };
        let meta_path = self.meta_path(key);
        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| StoreError::Write {
            path: meta_path.clone(),
            reason: format!("meta serialization: {e}"),
        })?;
        write_atomic(&meta_path, &meta_json)?;

        debug!(key = %key, rows = table.len(), path = %path.display(), "saved table to disk");
        Ok(())
    }

    /// Read the metadata sidecar for a key, if present and parseable.
    pub fn get_meta(&self, key: &CacheKey) -> Option<TableMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Remove everything stored for `ticker`. Returns whether anything existed.
    pub fn remove_ticker(&self, ticker: &Ticker) -> Result<bool, StoreError> {
        let dir = self.ticker_dir(ticker);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Remove { path: dir, source }),
        }
    }

    /// Tickers that have a directory in the store, sorted.
    pub fn tickers(&self) -> Vec<Ticker> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut tickers: Vec<Ticker> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                // Directory names must already be canonical.
                Ticker::parse(&name).ok().filter(|t| t.as_str() == name)
            })
            .collect();
        tickers.sort();
        tickers
    }

    /// Per-key presence for every dataset/period of the given tickers.
    pub fn status(&self, tickers: &[Ticker]) -> Vec<KeyStatus> {
        tickers
            .iter()
            .flat_map(CacheKey::all_keys)
            .map(|key| {
                let cached = self.table_path(&key).exists();
                let meta = if cached { self.get_meta(&key) } else { None };
                KeyStatus {
                    cached,
                    row_count: meta.as_ref().map(|m| m.row_count),
                    fetched_at: meta.as_ref().map(|m| m.fetched_at),
                    key,
                }
            })
            .collect()
    }
}

// ── CSV I/O helpers ─────────────────────────────────────────────────

type Records = (Vec<String>, Vec<Vec<String>>);

/// Parse delimited bytes into a header row and string records.
pub(crate) fn read_csv(bytes: &[u8], delimiter: u8) -> Result<Records, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let mut records = Vec::new();
    for rec in reader.records() {
        records.push(rec?.iter().map(str::to_string).collect());
    }
    Ok((headers, records))
}

/// Encode a table as comma-separated bytes, header first.
pub fn encode_csv(table: &DataTable) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.column_names())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|cell| cell.to_field()))?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Write to a unique temp file beside `path`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let id = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("table");
    let tmp_path = path.with_file_name(format!(
        ".{file_name}.{}.{id}.tmp",
        std::process::id()
    ));

    fs::write(&tmp_path, bytes).map_err(|e| StoreError::Write {
        path: tmp_path.clone(),
        reason: e.to_string(),
    })?;

    fs::rename(&tmp_path, path).map_err(|e| {
        // Clean up temp file on rename failure
        let _ = fs::remove_file(&tmp_path);
        StoreError::Write {
            path: path.to_path_buf(),
            reason: format!("atomic rename failed: {e}"),
        }
    })
}

fn modified_time(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
