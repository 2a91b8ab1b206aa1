//! The tiered cache: session → disk → remote.
//!
//! A lookup is answered by the first tier holding the key. Hits on a lower
//! tier are written upward, so the next lookup in the same session is served
//! from memory. Remote payloads are filtered to the requested ticker,
//! normalized and validated before any tier sees them.
//!
//! Concurrent misses on one key share a single remote fetch: the first caller
//! becomes the leader of an in-flight entry, later callers wait on it. The
//! in-flight map is only locked to join or leave a flight, never across I/O.
//!
//! `put` and `invalidate` bump a per-ticker generation. A lookup or refresh
//! that started under an older generation still returns its table but writes
//! it to no tier, so a completed `invalidate` is never undone by a fetch that
//! was already running.

use crate::error::CacheError;
use crate::key::{CacheKey, Ticker};
use crate::remote::{FetchError, FetchRequest, FetchScope, RemoteSource};
use crate::session::{CacheEntry, Provenance, SessionScope};
use crate::store::{CsvStore, StoreError};
use crate::table::DataTable;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Provider name recorded for tables written through [`TieredDataCache::put`].
pub const LOCAL_PROVIDER: &str = "local";

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub table: Arc<DataTable>,
    /// The tier that answered.
    pub provenance: Provenance,
    pub fetched_at: DateTime<Utc>,
    /// Set when a remote table reached the session but not the disk.
    pub persist_error: Option<CacheError>,
}

impl Lookup {
    fn from_entry(entry: &CacheEntry, provenance: Provenance) -> Self {
        Self {
            table: Arc::clone(&entry.table),
            provenance,
            fetched_at: entry.fetched_at,
            persist_error: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.persist_error.is_some()
    }
}

/// Outcome of refreshing one key.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Saved { rows: usize },
    Failed(CacheError),
}

/// Per-key results of [`TieredDataCache::refresh_statements`].
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub ticker: Ticker,
    pub outcomes: Vec<(CacheKey, RefreshOutcome)>,
}

impl RefreshReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, o)| matches!(o, RefreshOutcome::Saved { .. }))
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RefreshOutcome::Failed(_)))
            .count()
    }
}

/// Progress callbacks for multi-key refreshes.
pub trait RefreshProgress {
    fn on_start(&self, key: &CacheKey, index: usize, total: usize);
    fn on_complete(&self, key: &CacheKey, index: usize, total: usize, outcome: &RefreshOutcome);
}

/// Progress sink that ignores every event.
pub struct NoProgress;

impl RefreshProgress for NoProgress {
    fn on_start(&self, _key: &CacheKey, _index: usize, _total: usize) {}
    fn on_complete(&self, _key: &CacheKey, _index: usize, _total: usize, _outcome: &RefreshOutcome) {}
}

// ── Single-flight ───────────────────────────────────────────────────

/// What a flight leader hands to its followers.
#[derive(Debug, Clone)]
struct Shared {
    entry: Arc<CacheEntry>,
    persist_error: Option<CacheError>,
    /// A put or invalidate for the ticker landed while the flight ran.
    superseded: bool,
}

#[derive(Default)]
struct Flight {
    result: Mutex<Option<Result<Shared, CacheError>>>,
    done: Condvar,
}

impl Flight {
    fn complete(&self, result: Result<Shared, CacheError>) {
        *lock(&self.result) = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<Shared, CacheError> {
        let mut slot = lock(&self.result);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Held by the leader. Completes the flight and leaves the in-flight map on
/// drop, so followers are released even if the leader unwinds.
struct FlightLead<'a> {
    in_flight: &'a Mutex<HashMap<CacheKey, Arc<Flight>>>,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightLead<'_> {
    fn finish(mut self, result: Result<Shared, CacheError>) -> Result<Shared, CacheError> {
        self.flight.complete(result.clone());
        self.finished = true;
        result
    }
}

impl Drop for FlightLead<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.flight.complete(Err(CacheError::FetchFailed {
                key: self.key.clone(),
                message: "fetch aborted".into(),
            }));
        }
        lock(self.in_flight).remove(self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── The cache ───────────────────────────────────────────────────────

pub struct TieredDataCache {
    store: CsvStore,
    remote: Box<dyn RemoteSource>,
    request_delay: Duration,
    in_flight: Mutex<HashMap<CacheKey, Arc<Flight>>>,
    generations: Mutex<HashMap<Ticker, u64>>,
}

impl TieredDataCache {
    pub fn new(store: CsvStore, remote: Box<dyn RemoteSource>) -> Self {
        Self {
            store,
            remote,
            request_delay: Duration::ZERO,
            in_flight: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Pause between consecutive remote calls in [`Self::refresh_statements`].
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn store(&self) -> &CsvStore {
        &self.store
    }

    pub fn remote(&self) -> &dyn RemoteSource {
        self.remote.as_ref()
    }

    /// Look `key` up tier by tier.
    ///
    /// With `allow_remote == false` a miss on both local tiers is `NotFound`.
    pub fn get(
        &self,
        session: &SessionScope,
        key: &CacheKey,
        allow_remote: bool,
    ) -> Result<Lookup, CacheError> {
        if let Some(entry) = session.lookup(key) {
            debug!(
                ticker = %key.ticker(),
                dataset = %key.dataset(),
                period = %key.period(),
                provenance = "session",
                "cache hit"
            );
            return Ok(Lookup::from_entry(&entry, Provenance::Session));
        }

        let generation = self.generation(key.ticker());
        if let Some(entry) = self.load_disk(key)? {
            debug!(
                ticker = %key.ticker(),
                dataset = %key.dataset(),
                period = %key.period(),
                provenance = "disk",
                "cache hit"
            );
            let lookup = Lookup::from_entry(&entry, Provenance::Disk);
            self.if_current(key.ticker(), generation, || session.store(entry));
            return Ok(lookup);
        }

        if !allow_remote {
            return Err(CacheError::NotFound { key: key.clone() });
        }

        let shared = self.fetch_shared(key)?;
        if !shared.superseded {
            self.if_current(key.ticker(), generation, || {
                session.store(CacheEntry::clone(&shared.entry))
            });
        }
        Ok(Lookup {
            table: Arc::clone(&shared.entry.table),
            provenance: shared.entry.source,
            fetched_at: shared.entry.fetched_at,
            persist_error: shared.persist_error,
        })
    }

    /// Store a caller-supplied table in both tiers.
    ///
    /// The table is normalized first. If the disk write fails the session
    /// entry is still replaced and `StorageWriteFailed` is returned.
    pub fn put(
        &self,
        session: &SessionScope,
        key: &CacheKey,
        table: DataTable,
    ) -> Result<(), CacheError> {
        let table = Arc::new(table.normalize()?);
        let entry = CacheEntry {
            key: key.clone(),
            table,
            fetched_at: Utc::now(),
            source: Provenance::Session,
        };
        self.bump_generation(key.ticker(), || {
            self.write_through(session, entry, LOCAL_PROVIDER)
        })
    }

    /// Drop every session and disk entry for `ticker`. Idempotent.
    pub fn invalidate(&self, session: &SessionScope, ticker: &Ticker) -> Result<(), CacheError> {
        let (evicted, removed) = self.bump_generation(ticker, || {
            let evicted = session.evict_ticker(ticker);
            self.store
                .remove_ticker(ticker)
                .map(|removed| (evicted, removed))
                .map_err(|e| CacheError::StorageWriteFailed {
                    target: ticker.to_string(),
                    message: e.to_string(),
                })
        })?;
        info!(ticker = %ticker, evicted, removed_from_disk = removed, "invalidated ticker");
        Ok(())
    }

    /// Re-download `key` regardless of what the local tiers hold.
    ///
    /// Nothing is replaced unless the fetch succeeds.
    pub fn refresh(&self, session: &SessionScope, key: &CacheKey) -> Result<Lookup, CacheError> {
        let generation = self.generation(key.ticker());
        let table = Arc::new(self.fetch_remote(key)?);
        let entry = CacheEntry {
            key: key.clone(),
            table,
            fetched_at: Utc::now(),
            source: Provenance::Remote,
        };
        let mut lookup = Lookup::from_entry(&entry, Provenance::Remote);
        match self.if_current(key.ticker(), generation, || {
            self.write_through(session, entry, self.remote.name())
        }) {
            Some(Err(e)) => lookup.persist_error = Some(e),
            Some(Ok(())) => {}
            None => debug!(key = %key, "ticker changed during refresh, result not cached"),
        }
        Ok(lookup)
    }

    /// Refresh all six statement keys of `ticker`, one remote call at a time.
    pub fn refresh_statements(&self, session: &SessionScope, ticker: &Ticker) -> RefreshReport {
        self.refresh_statements_with_progress(session, ticker, &NoProgress)
    }

    pub fn refresh_statements_with_progress(
        &self,
        session: &SessionScope,
        ticker: &Ticker,
        progress: &dyn RefreshProgress,
    ) -> RefreshReport {
        let keys = CacheKey::statement_keys(ticker);
        let total = keys.len();
        let mut outcomes = Vec::with_capacity(total);

        for (i, key) in keys.iter().enumerate() {
            if i > 0 && !self.request_delay.is_zero() {
                std::thread::sleep(self.request_delay);
            }
            progress.on_start(key, i, total);

            let outcome = match self.refresh(session, key) {
                Ok(Lookup {
                    persist_error: Some(e),
                    ..
                }) => RefreshOutcome::Failed(e),
                Ok(lookup) => RefreshOutcome::Saved {
                    rows: lookup.table.len(),
                },
                Err(e) => RefreshOutcome::Failed(e),
            };
            progress.on_complete(key, i, total, &outcome);
            outcomes.push((key.clone(), outcome));

            // Stop hammering a provider that has blocked us.
            if !self.remote.is_available() {
                for rest in &keys[i + 1..] {
                    let outcome = RefreshOutcome::Failed(CacheError::FetchFailed {
                        key: rest.clone(),
                        message: FetchError::CircuitBreakerTripped.to_string(),
                    });
                    outcomes.push((rest.clone(), outcome));
                }
                break;
            }
        }

        let report = RefreshReport {
            ticker: ticker.clone(),
            outcomes,
        };
        info!(
            ticker = %ticker,
            total,
            failed = report.failed(),
            "statement refresh finished"
        );
        report
    }

    // ── internals ───────────────────────────────────────────────────

    fn generation(&self, ticker: &Ticker) -> u64 {
        lock(&self.generations).get(ticker).copied().unwrap_or(0)
    }

    /// Run `f` with the ticker's generation advanced and held.
    fn bump_generation<T>(&self, ticker: &Ticker, f: impl FnOnce() -> T) -> T {
        let mut generations = lock(&self.generations);
        *generations.entry(ticker.clone()).or_insert(0) += 1;
        let out = f();
        drop(generations);
        out
    }

    /// Run `f` only if no `put` or `invalidate` touched `ticker` since
    /// `generation` was read. The check and `f` are atomic with respect to
    /// [`Self::bump_generation`].
    fn if_current<T>(&self, ticker: &Ticker, generation: u64, f: impl FnOnce() -> T) -> Option<T> {
        let generations = lock(&self.generations);
        let current = generations.get(ticker).copied().unwrap_or(0) == generation;
        let out = current.then(f);
        drop(generations);
        out
    }

    /// Disk first, then session. A failed disk write leaves the session entry
    /// in place and is returned as `StorageWriteFailed`.
    fn write_through(
        &self,
        session: &SessionScope,
        entry: CacheEntry,
        provider: &str,
    ) -> Result<(), CacheError> {
        let saved = self
            .store
            .save(&entry.key, &entry.table, provider, entry.fetched_at)
            .map_err(|e| {
                warn!(key = %entry.key, error = %e, "disk write failed, session only");
                CacheError::StorageWriteFailed {
                    target: entry.key.to_string(),
                    message: e.to_string(),
                }
            });
        session.store(entry);
        saved
    }

    /// Load and validate the disk copy of `key`.
    fn load_disk(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let stored = match self.store.load(key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(None),
            Err(StoreError::Decode { path, reason }) => {
                return Err(CacheError::malformed(format!(
                    "{}: {reason}",
                    path.display()
                )))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "disk tier unreadable, treating as absent");
                return Ok(None);
            }
        };
        stored.table.validate()?;

        Ok(Some(CacheEntry {
            key: key.clone(),
            table: Arc::new(stored.table),
            fetched_at: stored.fetched_at,
            source: Provenance::Disk,
        }))
    }

    /// Join or lead the flight for `key`.
    fn fetch_shared(&self, key: &CacheKey) -> Result<Shared, CacheError> {
        let (flight, leader) = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::default());
                    in_flight.insert(key.clone(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if !leader {
            debug!(key = %key, "waiting on in-flight fetch");
            return flight.wait();
        }

        let lead = FlightLead {
            in_flight: &self.in_flight,
            key,
            flight,
            finished: false,
        };
        lead.finish(self.load_or_fetch(key))
    }

    /// Leader path. Re-checks the disk, since a flight that finished just
    /// before this one started may already have written it.
    fn load_or_fetch(&self, key: &CacheKey) -> Result<Shared, CacheError> {
        let generation = self.generation(key.ticker());
        if let Some(entry) = self.load_disk(key)? {
            return Ok(Shared {
                entry: Arc::new(entry),
                persist_error: None,
                superseded: self.generation(key.ticker()) != generation,
            });
        }

        let table = self.fetch_remote(key)?;
        let fetched_at = Utc::now();
        let saved = self.if_current(key.ticker(), generation, || {
            self.store.save(key, &table, self.remote.name(), fetched_at)
        });
        let superseded = saved.is_none();
        let persist_error = match saved {
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "disk write failed, serving from session only");
                Some(CacheError::StorageWriteFailed {
                    target: key.to_string(),
                    message: e.to_string(),
                })
            }
            Some(Ok(())) => None,
            None => {
                debug!(key = %key, "ticker changed during fetch, result not cached");
                None
            }
        };

        Ok(Shared {
            entry: Arc::new(CacheEntry {
                key: key.clone(),
                table: Arc::new(table),
                fetched_at,
                source: Provenance::Remote,
            }),
            persist_error,
            superseded,
        })
    }

    /// Fetch, filter to the key's ticker and normalize. No tier is touched.
    fn fetch_remote(&self, key: &CacheKey) -> Result<DataTable, CacheError> {
        info!(
            ticker = %key.ticker(),
            dataset = %key.dataset(),
            period = %key.period(),
            source = self.remote.name(),
            "fetching from remote"
        );

        let payload = self
            .remote
            .fetch(&FetchRequest::from(key))
            .map_err(|e| match e {
                FetchError::UnknownTicker(_) => CacheError::NotFound { key: key.clone() },
                other => CacheError::FetchFailed {
                    key: key.clone(),
                    message: other.to_string(),
                },
            })?;

        if payload.table.is_empty() {
            return Err(CacheError::FetchFailed {
                key: key.clone(),
                message: FetchError::EmptyPayload(format!("{} has no rows", key.dataset()))
                    .to_string(),
            });
        }

        let table = match payload.scope {
            FetchScope::SingleTicker => payload.table,
            FetchScope::AllTickers { ticker_column } => {
                let total = payload.table.len();
                let filtered = payload
                    .table
                    .filter_ticker(&ticker_column, key.ticker().as_str())?;
                debug!(key = %key, total, kept = filtered.len(), "filtered bulk payload");
                if filtered.is_empty() {
                    return Err(CacheError::NotFound { key: key.clone() });
                }
                filtered
            }
        };

        table.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteTable;
    use crate::table::{Column, ColumnKind, Scalar};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        response: Result<RemoteTable, FetchError>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(response: Result<RemoteTable, FetchError>) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl RemoteSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        fn fetch(&self, _request: &FetchRequest) -> Result<RemoteTable, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> Scalar {
        Scalar::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn bulk_income() -> DataTable {
        DataTable::new(
            vec![
                Column::new("Ticker", ColumnKind::Text),
                Column::new("Report Date", ColumnKind::Date),
                Column::new("Revenue", ColumnKind::Float),
            ],
            vec![
                vec![Scalar::Text("MSFT".into()), date(2022, 6, 30), Scalar::Float(198.0)],
                vec![Scalar::Text("AAPL".into()), date(2022, 9, 30), Scalar::Float(394.0)],
                vec![Scalar::Text("AAPL".into()), date(2021, 9, 30), Scalar::Float(365.0)],
            ],
            "Report Date",
        )
        .unwrap()
    }

    fn bulk(table: DataTable) -> Result<RemoteTable, FetchError> {
        Ok(RemoteTable {
            table,
            scope: FetchScope::AllTickers {
                ticker_column: "Ticker".into(),
            },
        })
    }

    fn key(ticker: &str) -> CacheKey {
        CacheKey::parse(ticker, "income", "annual").unwrap()
    }

    #[test]
    fn remote_payload_is_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(dir.path()),
            Box::new(StubSource::new(bulk(bulk_income()))),
        );
        let session = SessionScope::new();

        let lookup = cache.get(&session, &key("AAPL"), true).unwrap();
        assert_eq!(lookup.provenance, Provenance::Remote);
        assert!(!lookup.is_degraded());
        assert_eq!(lookup.table.column_names(), vec!["Report Date", "Revenue"]);
        assert_eq!(
            lookup.table.float_column("Revenue").unwrap(),
            vec![Some(365.0), Some(394.0)]
        );

        let again = cache.get(&session, &key("AAPL"), false).unwrap();
        assert_eq!(again.provenance, Provenance::Session);
        assert!(Arc::ptr_eq(&again.table, &lookup.table));

        let fresh = SessionScope::new();
        let from_disk = cache.get(&fresh, &key("AAPL"), false).unwrap();
        assert_eq!(from_disk.provenance, Provenance::Disk);
        assert_eq!(*from_disk.table, *lookup.table);
    }

    #[test]
    fn ticker_absent_from_payload_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(dir.path()),
            Box::new(StubSource::new(bulk(bulk_income()))),
        );
        let session = SessionScope::new();
        let err = cache.get(&session, &key("TSLA"), true).unwrap_err();
        assert_eq!(err, CacheError::NotFound { key: key("TSLA") });
        assert!(session.is_empty());
        assert!(cache.store().tickers().is_empty());
    }

    #[test]
    fn empty_payload_is_fetch_failed() {
        let dir = tempfile::tempdir().unwrap();
        let empty = DataTable::new(bulk_income().columns().to_vec(), Vec::new(), "Report Date")
            .unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(dir.path()),
            Box::new(StubSource::new(bulk(empty))),
        );
        let err = cache
            .get(&SessionScope::new(), &key("AAPL"), true)
            .unwrap_err();
        assert!(matches!(err, CacheError::FetchFailed { .. }));
    }

    #[test]
    fn provider_error_touches_no_tier() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(dir.path()),
            Box::new(StubSource::new(Err(FetchError::NetworkUnreachable(
                "dns".into(),
            )))),
        );
        let session = SessionScope::new();
        let err = cache.get(&session, &key("AAPL"), true).unwrap_err();
        match err {
            CacheError::FetchFailed { key: k, message } => {
                assert_eq!(k, key("AAPL"));
                assert!(message.contains("dns"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.is_empty());
        assert!(!cache.store().table_path(&key("AAPL")).exists());
    }

    #[test]
    fn local_only_miss_never_calls_remote() {
        struct Unreachable;
        impl RemoteSource for Unreachable {
            fn name(&self) -> &str {
                "unreachable"
            }
            fn fetch(&self, _request: &FetchRequest) -> Result<RemoteTable, FetchError> {
                panic!("remote tier must not be consulted");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(CsvStore::new(dir.path()), Box::new(Unreachable));
        let err = cache
            .get(&SessionScope::new(), &key("AAPL"), false)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn degraded_write_still_fills_session() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the store root should be makes every save fail.
        let root = dir.path().join("blocked");
        std::fs::write(&root, b"not a directory").unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(&root),
            Box::new(StubSource::new(bulk(bulk_income()))),
        );
        let session = SessionScope::new();

        let lookup = cache.get(&session, &key("AAPL"), true).unwrap();
        assert_eq!(lookup.provenance, Provenance::Remote);
        assert!(matches!(
            lookup.persist_error,
            Some(CacheError::StorageWriteFailed { .. })
        ));
        assert_eq!(
            cache.get(&session, &key("AAPL"), false).unwrap().provenance,
            Provenance::Session
        );
    }

    #[test]
    fn put_reports_failed_disk_write_after_updating_session() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blocked");
        std::fs::write(&root, b"x").unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(&root),
            Box::new(StubSource::new(bulk(bulk_income()))),
        );
        let session = SessionScope::new();
        let table = bulk_income().filter_ticker("Ticker", "AAPL").unwrap();

        let err = cache.put(&session, &key("AAPL"), table).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StorageWriteFailed);
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn put_rejects_duplicate_periods() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(dir.path()),
            Box::new(StubSource::new(bulk(bulk_income()))),
        );
        let table = DataTable::new(
            vec![Column::new("Report Date", ColumnKind::Date)],
            vec![vec![date(2021, 1, 1)], vec![date(2021, 1, 1)]],
            "Report Date",
        )
        .unwrap();
        let session = SessionScope::new();
        let err = cache.put(&session, &key("AAPL"), table).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedTable);
        assert!(session.is_empty());
    }

    #[test]
    fn invalidate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(
            CsvStore::new(dir.path()),
            Box::new(StubSource::new(bulk(bulk_income()))),
        );
        let session = SessionScope::new();
        let ticker = Ticker::parse("AAPL").unwrap();
        cache.get(&session, &key("AAPL"), true).unwrap();

        cache.invalidate(&session, &ticker).unwrap();
        cache.invalidate(&session, &ticker).unwrap();
        assert!(session.is_empty());
        assert!(matches!(
            cache.get(&session, &key("AAPL"), false),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn refresh_report_stops_when_provider_blocks() {
        struct Blocked;
        impl RemoteSource for Blocked {
            fn name(&self) -> &str {
                "blocked"
            }
            fn fetch(&self, _request: &FetchRequest) -> Result<RemoteTable, FetchError> {
                Err(FetchError::CircuitBreakerTripped)
            }
            fn is_available(&self) -> bool {
                false
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(CsvStore::new(dir.path()), Box::new(Blocked));
        let report =
            cache.refresh_statements(&SessionScope::new(), &Ticker::parse("AAPL").unwrap());
        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.failed(), 6);
        assert!(!report.all_succeeded());
    }
}
