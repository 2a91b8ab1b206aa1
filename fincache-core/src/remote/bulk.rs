//! Bulk statement provider.
//!
//! Downloads a whole dataset (every ticker in the market) as one delimited CSV
//! file, the way bulk financial-data APIs publish their statements. The cache
//! filters the payload down to the requested ticker.

use super::http::HttpFetcher;
use super::{FetchError, FetchRequest, FetchScope, RemoteSource, RemoteTable};
use crate::key::{Dataset, Period};
use crate::store::read_csv;
use crate::table::{ColumnKind, DataTable};
use tracing::info;

pub struct BulkCsvSource {
    http: HttpFetcher,
    url_template: String,
    market: String,
    api_key: String,
    delimiter: u8,
    ticker_column: String,
}

impl BulkCsvSource {
    /// `url_template` may use `{market}`, `{dataset}` and `{period}`.
    pub fn new(
        http: HttpFetcher,
        url_template: impl Into<String>,
        market: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url_template: url_template.into(),
            market: market.into(),
            api_key: api_key.into(),
            delimiter: b';',
            ticker_column: "Ticker".to_string(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn dataset_url(&self, dataset: Dataset, period: Period) -> String {
        expand_template(&self.url_template, &self.market, dataset, period)
    }

    fn parse_payload(&self, bytes: &[u8], dataset: Dataset) -> Result<DataTable, FetchError> {
        parse_bulk_csv(bytes, self.delimiter, &self.ticker_column, dataset)
    }
}

fn expand_template(template: &str, market: &str, dataset: Dataset, period: Period) -> String {
    template
        .replace("{market}", market)
        .replace("{dataset}", dataset.slug())
        .replace("{period}", period.slug())
}

/// Parse a bulk payload. The ticker column must be present so the cache can
/// filter it; an empty payload is an error rather than an empty table.
fn parse_bulk_csv(
    bytes: &[u8],
    delimiter: u8,
    ticker_column: &str,
    dataset: Dataset,
) -> Result<DataTable, FetchError> {
    let (headers, records) = read_csv(bytes, delimiter)
        .map_err(|e| FetchError::ResponseFormatChanged(format!("unreadable CSV: {e}")))?;

    let Some(ticker_idx) = headers.iter().position(|h| h == ticker_column) else {
        return Err(FetchError::ResponseFormatChanged(format!(
            "could not find '{ticker_column}' column in {} dataset",
            dataset.readable_name()
        )));
    };
    if records.is_empty() {
        return Err(FetchError::EmptyPayload(format!(
            "{} dataset has no rows",
            dataset.readable_name()
        )));
    }

    // Tickers stay text even when a market's symbols are all digits.
    let mut kinds = DataTable::infer_kinds(&records, headers.len());
    kinds[ticker_idx] = ColumnKind::Text;

    DataTable::from_records(headers, records, dataset.period_column(), Some(&kinds))
        .map_err(|e| FetchError::ResponseFormatChanged(e.to_string()))
}

impl RemoteSource for BulkCsvSource {
    fn name(&self) -> &str {
        "bulk_csv"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<RemoteTable, FetchError> {
        if !request.dataset.is_statement() {
            return Err(FetchError::Other(format!(
                "bulk source does not serve {}",
                request.dataset.readable_name()
            )));
        }
        if self.url_template.trim().is_empty() {
            return Err(FetchError::Other(
                "remote.bulk_url_template is not configured".into(),
            ));
        }

        let url = self.dataset_url(request.dataset, request.period);
        info!(
            dataset = %request.dataset,
            period = %request.period,
            market = %self.market,
            "downloading bulk dataset"
        );
        let auth = format!("api-key {}", self.api_key);
        let bytes = self.http.get(&url, &[("Authorization", auth.as_str())])?;
        let table = self.parse_payload(&bytes, request.dataset)?;

        Ok(RemoteTable {
            table,
            scope: FetchScope::AllTickers {
                ticker_column: self.ticker_column.clone(),
            },
        })
    }

    fn is_available(&self) -> bool {
        self.http.is_available()
    }
}
