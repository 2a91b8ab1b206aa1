//! Tier 1: the session-scoped fast tier.
//!
//! A `SessionScope` is created and dropped by the caller; the cache only
//! borrows it. Entries are `Arc`s replaced whole, so a reader holding an entry
//! never observes a partially updated table.

use crate::key::{CacheKey, Ticker};
use crate::table::DataTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Which tier satisfied a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Session,
    Disk,
    Remote,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provenance::Session => "session",
            Provenance::Disk => "disk",
            Provenance::Remote => "remote",
        })
    }
}

/// One cached table plus where and when it was obtained.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub table: Arc<DataTable>,
    pub fetched_at: DateTime<Utc>,
    pub source: Provenance,
}

/// Fast tier owned by a single caller session.
#[derive(Debug, Default)]
pub struct SessionScope {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    current_ticker: RwLock<Option<Ticker>>,
}

impl SessionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert or replace the entry for `entry.key`.
    pub fn store(&self, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.key.clone(), Arc::clone(&entry));
        entry
    }

    /// Drop every entry for `ticker`. Returns how many were removed.
    pub fn evict_ticker(&self, ticker: &Ticker) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|k, _| k.ticker() != ticker);
        before - entries.len()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The ticker the user last selected in this session.
    pub fn current_ticker(&self) -> Option<Ticker> {
        self.current_ticker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Select a ticker. Returns the previous selection if it differs.
    pub fn select_ticker(&self, ticker: Ticker) -> Option<Ticker> {
        let mut current = self
            .current_ticker
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match current.replace(ticker) {
            Some(prev) if Some(&prev) != current.as_ref() => Some(prev),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, ColumnKind, Scalar};
    use chrono::NaiveDate;

    fn entry(key: &str) -> CacheEntry {
        let mut parts = key.split('/');
        let key = CacheKey::parse(
            parts.next().unwrap(),
            parts.next().unwrap(),
            parts.next().unwrap(),
        )
        .unwrap();
        let table = DataTable::new(
            vec![Column::new("Report Date", ColumnKind::Date)],
            vec![vec![Scalar::Date(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap())]],
            "Report Date",
        )
        .unwrap();
        CacheEntry {
            key,
            table: Arc::new(table),
            fetched_at: Utc::now(),
            source: Provenance::Remote,
        }
    }

    #[test]
    fn store_and_lookup() {
        let session = SessionScope::new();
        let e = entry("AAPL/income/annual");
        let key = e.key.clone();
        session.store(e);
        assert!(session.lookup(&key).is_some());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn evict_ticker_only_touches_that_ticker() {
        let session = SessionScope::new();
        session.store(entry("AAPL/income/annual"));
        session.store(entry("AAPL/balance/quarterly"));
        session.store(entry("MSFT/income/annual"));

        let aapl = Ticker::parse("AAPL").unwrap();
        assert_eq!(session.evict_ticker(&aapl), 2);
        assert_eq!(session.evict_ticker(&aapl), 0);
        assert_eq!(session.keys().len(), 1);
        assert_eq!(session.keys()[0].ticker().as_str(), "MSFT");
    }

    #[test]
    fn replacing_an_entry_leaves_old_arc_intact() {
        let session = SessionScope::new();
        let first = session.store(entry("AAPL/income/annual"));
        let held = session.lookup(&first.key).unwrap();
        session.store(entry("AAPL/income/annual"));
        assert!(Arc::ptr_eq(&held, &first));
        assert!(!Arc::ptr_eq(&session.lookup(&first.key).unwrap(), &first));
    }

    #[test]
    fn select_ticker_reports_switch() {
        let session = SessionScope::new();
        let aapl = Ticker::parse("AAPL").unwrap();
        let msft = Ticker::parse("MSFT").unwrap();
        assert_eq!(session.select_ticker(aapl.clone()), None);
        assert_eq!(session.select_ticker(aapl.clone()), None);
        assert_eq!(session.select_ticker(msft.clone()), Some(aapl));
        assert_eq!(session.current_ticker(), Some(msft));
    }
}
