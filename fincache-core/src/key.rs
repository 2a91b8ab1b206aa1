//! Cache keys: ticker, dataset, period.
//!
//! A `CacheKey` uniquely identifies one cached table. Keys are validated on
//! construction so every tier can derive storage paths from them without
//! re-checking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum accepted ticker length.
const MAX_TICKER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid ticker '{0}': expected 1-12 characters from A-Z, 0-9, '.', '-'")]
    InvalidTicker(String),

    #[error("unknown dataset '{0}' (expected income, balance, cashflow or price)")]
    UnknownDataset(String),

    #[error("unknown period '{0}' (expected annual, quarterly, daily, weekly or monthly)")]
    UnknownPeriod(String),

    #[error("period '{period}' is not valid for dataset '{dataset}'")]
    PeriodMismatch { dataset: Dataset, period: Period },
}

/// An uppercase ticker symbol, safe to use as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let symbol = raw.trim().to_ascii_uppercase();
        let valid_len = !symbol.is_empty() && symbol.len() <= MAX_TICKER_LEN;
        let leads_alnum = symbol
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        let charset = symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');

        if valid_len && leads_alnum && charset {
            Ok(Self(symbol))
        } else {
            Err(KeyError::InvalidTicker(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Ticker {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Ticker {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(t: Ticker) -> Self {
        t.0
    }
}

/// Which table a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Income,
    Balance,
    Cashflow,
    Price,
}

impl Dataset {
    pub const STATEMENTS: [Dataset; 3] = [Dataset::Income, Dataset::Balance, Dataset::Cashflow];

    pub fn slug(self) -> &'static str {
        match self {
            Dataset::Income => "income",
            Dataset::Balance => "balance",
            Dataset::Cashflow => "cashflow",
            Dataset::Price => "price",
        }
    }

    pub fn readable_name(self) -> &'static str {
        match self {
            Dataset::Income => "Income Statement",
            Dataset::Balance => "Balance Sheet",
            Dataset::Cashflow => "Cash Flow Statement",
            Dataset::Price => "Price History",
        }
    }

    /// Stem used in on-disk file names.
    pub fn file_stem(self) -> &'static str {
        match self {
            Dataset::Income => "Income_Statement",
            Dataset::Balance => "Balance_Sheet",
            Dataset::Cashflow => "Cash_Flow_Statement",
            Dataset::Price => "Price_History",
        }
    }

    /// Name of the period-key column in tables of this dataset.
    pub fn period_column(self) -> &'static str {
        match self {
            Dataset::Price => "Date",
            _ => "Report Date",
        }
    }

    pub fn is_statement(self) -> bool {
        !matches!(self, Dataset::Price)
    }

    pub fn accepts(self, period: Period) -> bool {
        if self.is_statement() {
            matches!(period, Period::Annual | Period::Quarterly)
        } else {
            matches!(period, Period::Daily | Period::Weekly | Period::Monthly)
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Dataset {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Dataset::Income),
            "balance" => Ok(Dataset::Balance),
            "cashflow" | "cash_flow" => Ok(Dataset::Cashflow),
            "price" => Ok(Dataset::Price),
            _ => Err(KeyError::UnknownDataset(s.to_string())),
        }
    }
}

/// Reporting cadence (statements) or sampling interval (prices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Annual,
    Quarterly,
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub const STATEMENT_PERIODS: [Period; 2] = [Period::Annual, Period::Quarterly];

    pub fn slug(self) -> &'static str {
        match self {
            Period::Annual => "annual",
            Period::Quarterly => "quarterly",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Period {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual" => Ok(Period::Annual),
            "quarterly" => Ok(Period::Quarterly),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            _ => Err(KeyError::UnknownPeriod(s.to_string())),
        }
    }
}

/// Identifies one cached table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawKey")]
pub struct CacheKey {
    ticker: Ticker,
    dataset: Dataset,
    period: Period,
}

/// Deserialized parts of a key before the dataset/period check.
#[derive(Deserialize)]
struct RawKey {
    ticker: Ticker,
    dataset: Dataset,
    period: Period,
}

impl TryFrom<RawKey> for CacheKey {
    type Error = KeyError;

    fn try_from(raw: RawKey) -> Result<Self, Self::Error> {
        CacheKey::new(raw.ticker, raw.dataset, raw.period)
    }
}

impl CacheKey {
    pub fn new(ticker: Ticker, dataset: Dataset, period: Period) -> Result<Self, KeyError> {
        if !dataset.accepts(period) {
            return Err(KeyError::PeriodMismatch { dataset, period });
        }
        Ok(Self {
            ticker,
            dataset,
            period,
        })
    }

    /// Parse all three parts from strings.
    pub fn parse(ticker: &str, dataset: &str, period: &str) -> Result<Self, KeyError> {
        Self::new(Ticker::parse(ticker)?, dataset.parse()?, period.parse()?)
    }

    /// The six statement keys (income/balance/cashflow × annual/quarterly).
    pub fn statement_keys(ticker: &Ticker) -> Vec<CacheKey> {
        Period::STATEMENT_PERIODS
            .iter()
            .flat_map(|&period| {
                Dataset::STATEMENTS.iter().map(move |&dataset| CacheKey {
                    ticker: ticker.clone(),
                    dataset,
                    period,
                })
            })
            .collect()
    }

    /// Every valid key for a ticker: six statement keys plus three price keys.
    pub fn all_keys(ticker: &Ticker) -> Vec<CacheKey> {
        let mut keys = Self::statement_keys(ticker);
        keys.extend(
            [Period::Daily, Period::Weekly, Period::Monthly]
                .into_iter()
                .map(|period| CacheKey {
                    ticker: ticker.clone(),
                    dataset: Dataset::Price,
                    period,
                }),
        );
        keys
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    pub fn period(&self) -> Period {
        self.period
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.ticker, self.dataset, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialized_keys_are_validated() {
        let ok: CacheKey =
            serde_json::from_str(r#"{"ticker":"aapl","dataset":"income","period":"annual"}"#)
                .unwrap();
        assert_eq!(ok, CacheKey::parse("AAPL", "income", "annual").unwrap());

        let err = serde_json::from_str::<CacheKey>(
            r#"{"ticker":"AAPL","dataset":"income","period":"daily"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("daily"), "{err}");
        assert!(serde_json::from_str::<CacheKey>(
            r#"{"ticker":"AAPL","dataset":"price","period":"annual"}"#
        )
        .is_err());
    }

    #[test]
    fn ticker_is_normalized() {
        assert_eq!(Ticker::parse(" aapl ").unwrap().as_str(), "AAPL");
        assert_eq!(Ticker::parse("brk.b").unwrap().as_str(), "BRK.B");
    }

    #[test]
    fn ticker_rejects_path_like_input() {
        assert!(Ticker::parse("../etc").is_err());
        assert!(Ticker::parse("A/B").is_err());
        assert!(Ticker::parse("").is_err());
        assert!(Ticker::parse(".HIDDEN").is_err());
        assert!(Ticker::parse("WAYTOOLONGTICKER").is_err());
    }

    #[test]
    fn period_must_match_dataset() {
        let t = Ticker::parse("AAPL").unwrap();
        assert!(CacheKey::new(t.clone(), Dataset::Income, Period::Annual).is_ok());
        assert!(CacheKey::new(t.clone(), Dataset::Price, Period::Weekly).is_ok());
        assert_eq!(
            CacheKey::new(t.clone(), Dataset::Income, Period::Daily),
            Err(KeyError::PeriodMismatch {
                dataset: Dataset::Income,
                period: Period::Daily
            })
        );
        assert!(CacheKey::new(t, Dataset::Price, Period::Annual).is_err());
    }

    #[test]
    fn statement_keys_cover_six_combinations() {
        let keys = CacheKey::statement_keys(&Ticker::parse("MSFT").unwrap());
        assert_eq!(keys.len(), 6);
        assert!(keys.iter().all(|k| k.dataset().is_statement()));
        assert_eq!(keys[0].period(), Period::Annual);
        assert_eq!(keys[5].period(), Period::Quarterly);
    }

    #[test]
    fn parse_from_strings() {
        let key = CacheKey::parse("goog", "cashflow", "quarterly").unwrap();
        assert_eq!(key.to_string(), "GOOG/cashflow/quarterly");
        assert!(matches!(
            CacheKey::parse("goog", "valuation", "annual"),
            Err(KeyError::UnknownDataset(_))
        ));
    }
}
