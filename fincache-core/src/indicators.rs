//! Indicators derived from price tables.
//!
//! Every function here reads a table and returns a new one; inputs are never
//! mutated. Windows follow the usual trailing convention: a value at row `i`
//! uses rows `i-w+1..=i`, the first `w-1` rows are null, and a window that
//! contains a null is null.

use crate::error::CacheError;
use crate::table::{ColumnKind, DataTable, Scalar};
use serde::Serialize;

/// Trading days per year, used for 52-week ranges and annualization.
pub const TRADING_DAYS: usize = 252;

const BAND_WINDOW: usize = 20;
const MOMENTUM_LAG: usize = 10;

/// Add `MA{w}` for each distinct non-zero window.
///
/// ```
/// use fincache_core::indicators::with_moving_averages;
/// # use fincache_core::table::{Column, ColumnKind, DataTable, Scalar};
/// # use chrono::NaiveDate;
/// # let rows = [10.0, 20.0, 30.0, 40.0, 50.0].iter().enumerate().map(|(i, c)| vec![
/// #     Scalar::Date(NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap()),
/// #     Scalar::Float(*c),
/// # ]).collect();
/// # let prices = DataTable::new(
/// #     vec![Column::new("Date", ColumnKind::Date), Column::new("Close", ColumnKind::Float)],
/// #     rows, "Date").unwrap();
/// let out = with_moving_averages(&prices, &[3]).unwrap();
/// assert_eq!(
///     out.float_column("MA3").unwrap(),
///     vec![None, None, Some(20.0), Some(30.0), Some(40.0)]
/// );
/// ```
pub fn with_moving_averages(table: &DataTable, windows: &[usize]) -> Result<DataTable, CacheError> {
    let close = table.float_column("Close")?;

    let mut distinct: Vec<usize> = windows.iter().copied().filter(|&w| w > 0).collect();
    distinct.sort_unstable();
    distinct.dedup();

    let mut out = table.clone();
    for w in distinct {
        out = out.with_column(&format!("MA{w}"), ColumnKind::Float, floats(rolling_mean(&close, w)))?;
    }
    Ok(out)
}

/// Add the extended indicator set: daily return, 20-row volatility, SMA_20
/// with ±2σ bands and 10-row momentum.
pub fn with_indicators(table: &DataTable) -> Result<DataTable, CacheError> {
    let close = table.float_column("Close")?;
    let returns = pct_change(&close);
    let sma = rolling_mean(&close, BAND_WINDOW);
    let close_std = rolling_std(&close, BAND_WINDOW);

    let band = |sign: f64| -> Vec<Option<f64>> {
        sma.iter()
            .zip(&close_std)
            .map(|(m, s)| Some((*m)? + sign * 2.0 * (*s)?))
            .collect()
    };
    let upper = band(1.0);
    let lower = band(-1.0);

    let momentum = (0..close.len())
        .map(|i| {
            let lagged = i.checked_sub(MOMENTUM_LAG)?;
            Some(close[i]? - close[lagged]?)
        })
        .collect();

    table
        .with_column("Daily_Return", ColumnKind::Float, floats(returns.clone()))?
        .with_column(
            "Volatility_20d",
            ColumnKind::Float,
            floats(rolling_std(&returns, BAND_WINDOW)),
        )?
        .with_column("SMA_20", ColumnKind::Float, floats(sma))?
        .with_column("Upper_Band", ColumnKind::Float, floats(upper))?
        .with_column("Lower_Band", ColumnKind::Float, floats(lower))?
        .with_column("Momentum_10d", ColumnKind::Float, floats(momentum))
}

/// Headline statistics for a price table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSummary {
    pub current_price: f64,
    /// `None` when fewer than 252 rows exist.
    pub high_52w: Option<f64>,
    pub low_52w: Option<f64>,
    /// First close to last close, in percent.
    pub period_return_pct: f64,
    pub annualized_volatility_pct: Option<f64>,
    pub avg_daily_volume: Option<f64>,
}

pub fn price_summary(table: &DataTable) -> Result<PriceSummary, CacheError> {
    let close: Vec<f64> = table.float_column("Close")?.into_iter().flatten().collect();
    let (Some(&first), Some(&last)) = (close.first(), close.last()) else {
        return Err(CacheError::malformed("no price data"));
    };

    let trailing_year = |name: &str| -> Result<Option<Vec<f64>>, CacheError> {
        if !table.has_column(name) {
            return Ok(None);
        }
        let values = table.float_column(name)?;
        if values.len() < TRADING_DAYS {
            return Ok(None);
        }
        Ok(Some(values[values.len() - TRADING_DAYS..].iter().flatten().copied().collect()))
    };

    let high_52w = trailing_year("High")?.and_then(|v| v.into_iter().reduce(f64::max));
    let low_52w = trailing_year("Low")?.and_then(|v| v.into_iter().reduce(f64::min));

    let returns: Vec<f64> = close.windows(2).map(|p| p[1] / p[0] - 1.0).collect();
    let annualized_volatility_pct =
        sample_std(&returns).map(|s| s * (TRADING_DAYS as f64).sqrt() * 100.0);

    let avg_daily_volume = if table.has_column("Volume") {
        let volume: Vec<f64> = table.float_column("Volume")?.into_iter().flatten().collect();
        mean(&volume)
    } else {
        None
    };

    Ok(PriceSummary {
        current_price: last,
        high_52w,
        low_52w,
        period_return_pct: (last / first - 1.0) * 100.0,
        annualized_volatility_pct,
        avg_daily_volume,
    })
}

// ── rolling helpers ─────────────────────────────────────────────────

/// Trailing mean over a running sum.
pub(crate) fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut result = vec![None; n];
    if window == 0 || n < window {
        return result;
    }

    let mut sum = 0.0;
    let mut nulls = 0usize;
    for (i, v) in values.iter().enumerate() {
        match v {
            Some(x) => sum += x,
            None => nulls += 1,
        }
        if i >= window {
            match values[i - window] {
                Some(x) => sum -= x,
                None => nulls -= 1,
            }
        }
        if i + 1 >= window && nulls == 0 {
            result[i] = Some(sum / window as f64);
        }
        // Resum once per window length to keep float drift bounded.
        if nulls == 0 && i % window == window - 1 {
            sum = values[i + 1 - window..=i].iter().flatten().sum();
        }
    }
    result
}

/// Trailing sample standard deviation (n-1 denominator).
pub(crate) fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window < 2 || i + 1 < window {
                return None;
            }
            let w: Option<Vec<f64>> = values[i + 1 - window..=i].iter().copied().collect();
            sample_std(&w?)
        })
        .collect()
}

fn pct_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let prev = values[i.checked_sub(1)?]?;
            let cur = values[i]?;
            (prev != 0.0).then(|| cur / prev - 1.0)
        })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

fn floats(values: Vec<Option<f64>>) -> Vec<Scalar> {
    values
        .into_iter()
        .map(|v| v.map_or(Scalar::Null, Scalar::Float))
        .collect()
}
