//! Yahoo Finance price provider.
//!
//! Fetches OHLCV history from Yahoo's v8 chart API, one ticker per request.
//! Yahoo has no official API and changes its format without notice; parse
//! failures surface as `ResponseFormatChanged`.

use super::http::HttpFetcher;
use super::{FetchError, FetchRequest, FetchScope, RemoteSource, RemoteTable};
use crate::key::{Dataset, Period};
use crate::table::{Column, ColumnKind, DataTable, Scalar};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

pub const PRICE_COLUMNS: [&str; 7] = ["Date", "Open", "High", "Low", "Close", "Adj Close", "Volume"];

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

pub struct YahooChartSource {
    http: HttpFetcher,
    base_url: String,
    range: String,
}

impl YahooChartSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            base_url: DEFAULT_CHART_URL.to_string(),
            range: "10y".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// History length, in Yahoo's range syntax (`1y`, `5y`, `max`, ...).
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    fn chart_url(&self, symbol: &str, period: Period) -> String {
        format!(
            "{}/{symbol}?range={}&interval={}&includeAdjustedClose=true",
            self.base_url.trim_end_matches('/'),
            self.range,
            interval(period)
        )
    }
}

fn interval(period: Period) -> &'static str {
    match period {
        Period::Weekly => "1wk",
        Period::Monthly => "1mo",
        _ => "1d",
    }
}

/// Parse the chart API response into a price table.
fn parse_response(symbol: &str, resp: ChartResponse) -> Result<DataTable, FetchError> {
    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => FetchError::UnknownTicker(symbol.to_string()),
        Some(err) => FetchError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => FetchError::ResponseFormatChanged("empty result with no error".into()),
    })?;

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::ResponseFormatChanged("result array is empty".into()))?;

    let timestamps = data
        .timestamp
        .ok_or_else(|| FetchError::UnknownTicker(symbol.to_string()))?;

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::ResponseFormatChanged("no quote data".into()))?;

    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let mut rows: Vec<Vec<Scalar>> = Vec::with_capacity(timestamps.len());
    let mut last_date: Option<NaiveDate> = None;

    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| FetchError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;

        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let volume = quote.volume.get(i).copied().flatten();
        let adj_close = adj_closes
            .as_ref()
            .and_then(|v| v.get(i).copied().flatten());

        // Holidays and non-trading days come back with every field missing.
        if [open, high, low, close, volume].iter().all(Option::is_none) {
            continue;
        }

        let row = vec![
            Scalar::Date(date),
            float(open),
            float(high),
            float(low),
            float(close),
            float(adj_close),
            float(volume),
        ];

        // The in-progress weekly/monthly bar can share a date with the last
        // complete one; keep the newer values.
        if last_date == Some(date) {
            if let Some(prev) = rows.last_mut() {
                *prev = row;
            }
            continue;
        }
        last_date = Some(date);
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(FetchError::UnknownTicker(symbol.to_string()));
    }

    let columns = PRICE_COLUMNS
        .iter()
        .map(|&name| {
            let kind = if name == "Date" {
                ColumnKind::Date
            } else {
                ColumnKind::Float
            };
            Column::new(name, kind)
        })
        .collect();

    DataTable::new(columns, rows, Dataset::Price.period_column())
        .map_err(|e| FetchError::ResponseFormatChanged(e.to_string()))
}

fn float(v: Option<f64>) -> Scalar {
    match v {
        Some(x) if x.is_finite() => Scalar::Float(x),
        _ => Scalar::Null,
    }
}

impl RemoteSource for YahooChartSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<RemoteTable, FetchError> {
        if request.dataset != Dataset::Price {
            return Err(FetchError::Other(format!(
                "chart source does not serve {}",
                request.dataset.readable_name()
            )));
        }

        let symbol = request.ticker.as_str();
        let url = self.chart_url(symbol, request.period);
        info!(ticker = symbol, period = %request.period, range = %self.range, "downloading price history");

        let bytes = self.http.get(&url, &[]).map_err(|e| match e {
            FetchError::Http { status: 404, .. } => FetchError::UnknownTicker(symbol.to_string()),
            other => other,
        })?;
        let chart: ChartResponse = serde_json::from_slice(&bytes).map_err(|e| {
            FetchError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;

        Ok(RemoteTable {
            table: parse_response(symbol, chart)?,
            scope: FetchScope::SingleTicker,
        })
    }

    fn is_available(&self) -> bool {
        self.http.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<DataTable, FetchError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        parse_response("SPY", resp)
    }

    // 2024-01-02, 2024-01-03 (holiday-style all-null bar), 2024-01-04 (UTC midnight)
    const CHART: &str = r#"{
        "chart": {
            "result": [{
                "timestamp": [1704153600, 1704240000, 1704326400],
                "indicators": {
                    "quote": [{
                        "open":   [470.0, null, 472.0],
                        "high":   [475.0, null, 476.5],
                        "low":    [468.0, null, 470.1],
                        "close":  [472.5, null, 474.0],
                        "volume": [1000000, null, 1200000]
                    }],
                    "adjclose": [{ "adjclose": [471.0, null, null] }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parses_bars_and_skips_empty_ones() {
        let table = parse(CHART).unwrap();
        assert_eq!(table.column_names(), PRICE_COLUMNS.to_vec());
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.key_dates(),
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            ]
        );
        assert_eq!(table.float_column("Close").unwrap(), vec![Some(472.5), Some(474.0)]);
        assert!(table.cell(1, "Adj Close").unwrap().is_null());
        table.validate().unwrap();
    }

    #[test]
    fn not_found_maps_to_unknown_ticker() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(parse(json), Err(FetchError::UnknownTicker(s)) if s == "SPY"));
    }

    #[test]
    fn other_error_is_format_change() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input"}}}"#;
        assert!(matches!(parse(json), Err(FetchError::ResponseFormatChanged(_))));
    }

    #[test]
    fn duplicate_trailing_bar_keeps_latest() {
        let json = r#"{"chart":{"result":[{"timestamp":[1704067200,1704070800],
            "indicators":{"quote":[{"open":[1.0,1.5],"high":[2.0,2.5],"low":[0.5,0.5],
            "close":[1.5,2.0],"volume":[10,20]}]}}],"error":null}}"#;
        let table = parse(json).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.float_column("Close").unwrap(), vec![Some(2.0)]);
    }

    #[test]
    fn interval_follows_period() {
        assert_eq!(interval(Period::Daily), "1d");
        assert_eq!(interval(Period::Weekly), "1wk");
        assert_eq!(interval(Period::Monthly), "1mo");
    }
}
