//! fincache core: a ticker-scoped, three-tier financial data cache.
//!
//! - Cache keys and the tabular data model
//! - Session tier (in-memory, owned by the caller)
//! - Disk tier (CSV files with metadata sidecars, atomic writes)
//! - Remote tier (bulk statement CSV, Yahoo chart API, circuit breaker)
//! - `TieredDataCache`: lookup order, write-through, single-flight fetches
//! - Derived price indicators and statement metric series
//! - TOML configuration

pub mod config;
pub mod error;
pub mod indicators;
pub mod key;
pub mod metrics;
pub mod remote;
pub mod session;
pub mod store;
pub mod table;
pub mod tiered;

pub use config::FincacheConfig;
pub use error::{CacheError, ErrorKind};
pub use key::{CacheKey, Dataset, Period, Ticker};
pub use session::{CacheEntry, Provenance, SessionScope};
pub use store::CsvStore;
pub use table::{Column, ColumnKind, DataTable, Scalar};
pub use tiered::{Lookup, RefreshOutcome, RefreshReport, TieredDataCache};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the cache and everything it hands out can cross
    /// threads. Callers share one `TieredDataCache` between sessions.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TieredDataCache>();
        require_sync::<TieredDataCache>();
        require_send::<SessionScope>();
        require_sync::<SessionScope>();
        require_send::<CsvStore>();
        require_sync::<CsvStore>();

        require_send::<Lookup>();
        require_sync::<Lookup>();
        require_send::<CacheEntry>();
        require_sync::<CacheEntry>();
        require_send::<DataTable>();
        require_sync::<DataTable>();
        require_send::<CacheError>();
        require_sync::<CacheError>();

        require_send::<remote::CircuitBreaker>();
        require_sync::<remote::CircuitBreaker>();
        require_send::<remote::BulkCsvSource>();
        require_sync::<remote::BulkCsvSource>();
        require_send::<remote::YahooChartSource>();
        require_sync::<remote::YahooChartSource>();
    }
}
