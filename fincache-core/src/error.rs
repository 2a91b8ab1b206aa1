//! Typed outcomes returned by the cache.
//!
//! Every failure a caller can observe is one of these variants; none of them
//! are raised as panics. `CacheError` is `Clone` so a single in-flight fetch
//! can hand the same outcome to every waiter.

use crate::key::{CacheKey, KeyError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    #[error("no data for {key} (not cached and no remote data available)")]
    NotFound { key: CacheKey },

    #[error("remote fetch failed for {key}: {message}")]
    FetchFailed { key: CacheKey, message: String },

    /// `target` is a key (`AAPL/income/annual`) or a bare ticker for invalidation.
    #[error("could not persist {target}: {message}")]
    StorageWriteFailed { target: String, message: String },

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}

/// Stable error code for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    FetchFailed,
    StorageWriteFailed,
    MalformedTable,
    InvalidKey,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::NotFound { .. } => ErrorKind::NotFound,
            CacheError::FetchFailed { .. } => ErrorKind::FetchFailed,
            CacheError::StorageWriteFailed { .. } => ErrorKind::StorageWriteFailed,
            CacheError::MalformedTable(_) => ErrorKind::MalformedTable,
            CacheError::InvalidKey(_) => ErrorKind::InvalidKey,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        CacheError::MalformedTable(msg.into())
    }
}
