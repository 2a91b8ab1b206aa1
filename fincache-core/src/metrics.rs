//! Chart-ready series from statement tables.
//!
//! Providers name the same line item differently, so headline metrics are
//! resolved through alias lists: the first alias present wins.

use crate::error::CacheError;
use crate::table::DataTable;
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

pub const REVENUE_ALIASES: &[&str] = &["Revenue", "Total Revenue", "Sales"];

pub const NET_INCOME_ALIASES: &[&str] = &[
    "Net Income (Common)",
    "Net Income",
    "Net Income Available to Common Shareholders",
];

/// First alias that names a column of `table`.
pub fn resolve_column<'a>(table: &DataTable, aliases: &[&'a str]) -> Option<&'a str> {
    aliases.iter().copied().find(|name| table.has_column(name))
}

/// `(period, value)` points for a float column, skipping nulls.
pub fn series(table: &DataTable, column: &str) -> Result<Vec<(NaiveDate, f64)>, CacheError> {
    let values = table.float_column(column)?;
    let dates = table
        .column_values(&table.key_column().name)
        .unwrap_or_default();
    Ok(dates
        .into_iter()
        .zip(values)
        .filter_map(|(date, value)| Some((date.as_date()?, value?)))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    Revenue,
    NetIncome,
    Column(String),
}

impl Metric {
    fn aliases(&self) -> Vec<&str> {
        match self {
            Metric::Revenue => REVENUE_ALIASES.to_vec(),
            Metric::NetIncome => NET_INCOME_ALIASES.to_vec(),
            Metric::Column(name) => vec![name.as_str()],
        }
    }

    /// The column this metric reads in `table`.
    pub fn column<'a>(&'a self, table: &DataTable) -> Result<&'a str, CacheError> {
        resolve_column(table, &self.aliases())
            .ok_or_else(|| CacheError::malformed(format!("{self} column not found")))
    }

    pub fn series(&self, table: &DataTable) -> Result<Vec<(NaiveDate, f64)>, CacheError> {
        series(table, self.column(table)?)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Revenue => f.write_str("Revenue"),
            Metric::NetIncome => f.write_str("Net Income"),
            Metric::Column(name) => write!(f, "'{name}'"),
        }
    }
}

impl FromStr for Metric {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "revenue" => Metric::Revenue,
            "net-income" | "net_income" | "netincome" => Metric::NetIncome,
            _ => Metric::Column(s.trim().to_string()),
        })
    }
}
