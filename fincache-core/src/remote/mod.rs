//! Tier 3: remote data providers.
//!
//! The `RemoteSource` trait abstracts over providers so the cache can swap
//! implementations and mock them in tests. Providers don't know about the
//! cache; the cache decides what to keep from what they return.

pub mod bulk;
pub mod circuit_breaker;
pub mod http;
pub mod yahoo;

pub use bulk::BulkCsvSource;
pub use circuit_breaker::CircuitBreaker;
pub use http::HttpFetcher;
pub use yahoo::YahooChartSource;

use crate::key::{CacheKey, Dataset, Period, Ticker};
use crate::table::DataTable;
use thiserror::Error;

/// Structured errors from remote providers.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("provider returned no data: {0}")]
    EmptyPayload(String),

    #[error("provider does not know ticker {0}")]
    UnknownTicker(String),

    #[error("provider error: {0}")]
    Other(String),
}

/// What to fetch. The ticker is a hint: bulk providers ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticker: Ticker,
    pub dataset: Dataset,
    pub period: Period,
}

impl From<&CacheKey> for FetchRequest {
    fn from(key: &CacheKey) -> Self {
        Self {
            ticker: key.ticker().clone(),
            dataset: key.dataset(),
            period: key.period(),
        }
    }
}

/// How much of the provider's universe a payload covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchScope {
    /// Rows for every ticker; `ticker_column` tells them apart.
    AllTickers { ticker_column: String },
    /// Already limited to the requested ticker.
    SingleTicker,
}

/// A provider payload.
#[derive(Debug, Clone)]
pub struct RemoteTable {
    pub table: DataTable,
    pub scope: FetchScope,
}

/// Trait for remote providers.
pub trait RemoteSource: Send + Sync {
    /// Human-readable name, recorded in the store's metadata sidecar.
    fn name(&self) -> &str;

    fn fetch(&self, request: &FetchRequest) -> Result<RemoteTable, FetchError>;

    /// Whether the provider currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Sends statements to one source and price history to another.
pub struct RoutedSource {
    statements: Box<dyn RemoteSource>,
    prices: Box<dyn RemoteSource>,
    name: String,
}

impl RoutedSource {
    pub fn new(statements: Box<dyn RemoteSource>, prices: Box<dyn RemoteSource>) -> Self {
        let name = format!("{}+{}", statements.name(), prices.name());
        Self {
            statements,
            prices,
            name,
        }
    }

    fn route(&self, dataset: Dataset) -> &dyn RemoteSource {
        if dataset.is_statement() {
            self.statements.as_ref()
        } else {
            self.prices.as_ref()
        }
    }
}

impl RemoteSource for RoutedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, request: &FetchRequest) -> Result<RemoteTable, FetchError> {
        self.route(request.dataset).fetch(request)
    }

    fn is_available(&self) -> bool {
        self.statements.is_available() && self.prices.is_available()
    }
}

/// A source that never has network access; every fetch fails.
pub struct OfflineSource;

impl RemoteSource for OfflineSource {
    fn name(&self) -> &str {
        "offline"
    }

    fn fetch(&self, _request: &FetchRequest) -> Result<RemoteTable, FetchError> {
        Err(FetchError::NetworkUnreachable("offline mode".into()))
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, ColumnKind};

    struct Named(&'static str);

    impl RemoteSource for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn fetch(&self, _request: &FetchRequest) -> Result<RemoteTable, FetchError> {
            Err(FetchError::Other(self.0.to_string()))
        }
    }

    fn request(dataset: Dataset, period: Period) -> FetchRequest {
        FetchRequest {
            ticker: Ticker::parse("AAPL").unwrap(),
            dataset,
            period,
        }
    }

    #[test]
    fn routed_source_dispatches_by_dataset() {
        let routed = RoutedSource::new(Box::new(Named("bulk")), Box::new(Named("chart")));
        assert_eq!(routed.name(), "bulk+chart");

        let err = routed
            .fetch(&request(Dataset::Income, Period::Annual))
            .unwrap_err();
        assert!(matches!(err, FetchError::Other(ref s) if s == "bulk"));

        let err = routed
            .fetch(&request(Dataset::Price, Period::Daily))
            .unwrap_err();
        assert!(matches!(err, FetchError::Other(ref s) if s == "chart"));
    }

    #[test]
    fn offline_source_is_unavailable() {
        assert!(!OfflineSource.is_available());
        assert!(OfflineSource
            .fetch(&request(Dataset::Income, Period::Annual))
            .is_err());
    }

    #[test]
    fn remote_table_carries_scope() {
        let table = DataTable::new(
            vec![Column::new("Date", ColumnKind::Date)],
            Vec::new(),
            "Date",
        )
        .unwrap();
        let rt = RemoteTable {
            table,
            scope: FetchScope::SingleTicker,
        };
        assert_eq!(rt.scope, FetchScope::SingleTicker);
    }
}
