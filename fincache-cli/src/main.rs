//! fincache CLI: read-through access to the three-tier financial data cache.
//!
//! Commands:
//! - `get`: look up one table (session, disk, then remote) and print it
//! - `refresh`: re-download every statement table of a ticker
//! - `invalidate`: drop a ticker from the session and the disk store
//! - `summary`: headline price statistics
//! - `series`: a dated statement metric (revenue, net income, any column)
//! - `cache status`: per-key presence on disk

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fincache_core::config::{default_config_path, ApiKeyStatus};
use fincache_core::indicators::{price_summary, with_indicators, with_moving_averages};
use fincache_core::metrics::Metric;
use fincache_core::store::encode_csv;
use fincache_core::tiered::RefreshProgress;
use fincache_core::{
    CacheError, CacheKey, DataTable, Dataset, FincacheConfig, Period, RefreshOutcome,
    SessionScope, Ticker, TieredDataCache,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(
    name = "fincache",
    about = "fincache: ticker-scoped financial data cache (session, disk, remote)"
)]
struct Cli {
    /// Config file. Created with defaults when missing.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Offline mode: no network access, misses are reported as failures.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one table and print it.
    Get {
        ticker: Ticker,

        /// income, balance, cashflow or price.
        #[arg(long, default_value = "income")]
        dataset: Dataset,

        /// annual or quarterly for statements; daily, weekly or monthly for price.
        #[arg(long, default_value = "annual")]
        period: Period,

        /// Moving-average windows to append (e.g. --ma 20,50).
        #[arg(long, value_delimiter = ',')]
        ma: Vec<usize>,

        /// Append returns, volatility, Bollinger bands and momentum.
        #[arg(long, default_value_t = false)]
        indicators: bool,

        /// Only consult the session and disk tiers.
        #[arg(long, default_value_t = false)]
        local: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
    /// Re-download every statement table of a ticker.
    Refresh { ticker: Ticker },
    /// Remove a ticker from the session and the disk store.
    Invalidate { ticker: Ticker },
    /// Price summary: current price, 52-week range, return, volatility.
    Summary {
        ticker: Ticker,

        #[arg(long, default_value = "daily")]
        period: Period,

        /// Print JSON instead of a text block.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print a dated statement metric.
    Series {
        ticker: Ticker,

        /// revenue, net-income, or any column name.
        #[arg(long)]
        metric: Metric,

        #[arg(long, default_value = "income")]
        dataset: Dataset,

        #[arg(long, default_value = "annual")]
        period: Period,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Per-key presence, row counts and fetch times.
    Status {
        /// Tickers to report. Defaults to every ticker on disk.
        tickers: Vec<Ticker>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<CacheError>() {
                Some(cache_err) => eprintln!("error [{:?}]: {err:#}", cache_err.kind()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "fincache=debug" } else { "fincache=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = FincacheConfig::load_or_init(&config_path)?;
    debug!(config = %config_path.display(), data_dir = %config.data_dir.display(), "loaded config");

    let cache = config.build_cache(cli.offline)?;
    // One session per process.
    let session = SessionScope::new();

    match cli.command {
        Commands::Get {
            ticker,
            dataset,
            period,
            ma,
            indicators,
            local,
            format,
        } => {
            let key = CacheKey::new(ticker, dataset, period)?;
            run_get(&cache, &session, &key, &ma, indicators, !local, format)
        }
        Commands::Refresh { ticker } => run_refresh(&cache, &session, &ticker),
        Commands::Invalidate { ticker } => {
            cache.invalidate(&session, &ticker)?;
            println!("Invalidated {ticker}");
            Ok(())
        }
        Commands::Summary {
            ticker,
            period,
            json,
        } => {
            let key = CacheKey::new(ticker, Dataset::Price, period)?;
            run_summary(&cache, &session, &key, json)
        }
        Commands::Series {
            ticker,
            metric,
            dataset,
            period,
        } => {
            let key = CacheKey::new(ticker, dataset, period)?;
            run_series(&cache, &session, &key, &metric)
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { tickers } => run_cache_status(&cache, &config, tickers),
        },
    }
}

fn run_get(
    cache: &TieredDataCache,
    session: &SessionScope,
    key: &CacheKey,
    windows: &[usize],
    indicators: bool,
    allow_remote: bool,
    format: OutputFormat,
) -> Result<()> {
    session.select_ticker(key.ticker().clone());
    let lookup = cache.get(session, key, allow_remote)?;
    if let Some(err) = &lookup.persist_error {
        warn!(%key, error = %err, "served without a disk copy");
    }

    let mut table = (*lookup.table).clone();
    if !windows.is_empty() {
        table = with_moving_averages(&table, windows)?;
    }
    if indicators {
        table = with_indicators(&table)?;
    }

    eprintln!(
        "{key}: {} rows from {} (fetched {})",
        table.len(),
        lookup.provenance,
        lookup.fetched_at.format("%Y-%m-%d %H:%M UTC"),
    );
    print_table(&table, format)
}

fn run_refresh(cache: &TieredDataCache, session: &SessionScope, ticker: &Ticker) -> Result<()> {
    let report = cache.refresh_statements_with_progress(session, ticker, &StdoutProgress);

    if !report.all_succeeded() {
        println!(
            "{} of {} tables failed for {}",
            report.failed(),
            report.outcomes.len(),
            report.ticker
        );
        if let Some((_, RefreshOutcome::Failed(err))) = report
            .outcomes
            .iter()
            .find(|(_, o)| matches!(o, RefreshOutcome::Failed(_)))
        {
            return Err(err.clone().into());
        }
    }
    Ok(())
}

fn run_summary(
    cache: &TieredDataCache,
    session: &SessionScope,
    key: &CacheKey,
    json: bool,
) -> Result<()> {
    let lookup = cache.get(session, key, true)?;
    let summary = price_summary(&lookup.table)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let opt = |v: Option<f64>, suffix: &str| {
        v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}{suffix}"))
    };
    println!("{} ({} rows, {})", key, lookup.table.len(), lookup.provenance);
    println!("  Current price:      {:.2}", summary.current_price);
    println!("  52-week high:       {}", opt(summary.high_52w, ""));
    println!("  52-week low:        {}", opt(summary.low_52w, ""));
    println!("  Period return:      {:.2}%", summary.period_return_pct);
    println!(
        "  Annualized vol:     {}",
        opt(summary.annualized_volatility_pct, "%")
    );
    println!("  Avg daily volume:   {}", opt(summary.avg_daily_volume, ""));
    Ok(())
}

fn run_series(
    cache: &TieredDataCache,
    session: &SessionScope,
    key: &CacheKey,
    metric: &Metric,
) -> Result<()> {
    let lookup = cache.get(session, key, true)?;
    let column = metric.column(&lookup.table)?;
    let points = metric.series(&lookup.table)?;

    println!("{:<12} {:>20}", key.dataset().period_column(), column);
    println!("{}", "-".repeat(33));
    for (date, value) in &points {
        println!("{:<12} {:>20.2}", date.format("%Y-%m-%d"), value);
    }
    Ok(())
}

fn run_cache_status(
    cache: &TieredDataCache,
    config: &FincacheConfig,
    tickers: Vec<Ticker>,
) -> Result<()> {
    let store = cache.store();
    let tickers = if tickers.is_empty() {
        store.tickers()
    } else {
        tickers
    };

    println!("Cache: {}", store.root().display());
    match config.remote.api_key_status() {
        status @ ApiKeyStatus::Custom { .. } => println!("API key: {status}"),
        status => println!("API key: {status} (free tier datasets only)"),
    }
    println!("Remote: {}", cache.remote().name());

    if tickers.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }

    println!();
    println!(
        "{:<8} {:<10} {:<10} {:>8}  {:<17}",
        "Ticker", "Dataset", "Period", "Rows", "Fetched"
    );
    println!("{}", "-".repeat(58));
    for status in store.status(&tickers) {
        let key = &status.key;
        let rows = status
            .row_count
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        let fetched = match (status.cached, status.fetched_at) {
            (true, Some(at)) => at.format("%Y-%m-%d %H:%M").to_string(),
            (true, None) => "(no meta)".to_string(),
            (false, _) => "not cached".to_string(),
        };
        println!(
            "{:<8} {:<10} {:<10} {:>8}  {:<17}",
            key.ticker(),
            key.dataset(),
            key.period(),
            rows,
            fetched
        );
    }
    Ok(())
}

fn print_table(table: &DataTable, format: OutputFormat) -> Result<()> {
    let mut out = std::io::stdout().lock();
    match format {
        OutputFormat::Csv => {
            let bytes = encode_csv(table).context("encode CSV")?;
            out.write_all(&bytes)?;
        }
        OutputFormat::Json => {
            let records: Vec<serde_json::Map<String, serde_json::Value>> = table
                .rows()
                .iter()
                .map(|row| {
                    table
                        .columns()
                        .iter()
                        .zip(row)
                        .map(|(col, cell)| {
                            serde_json::to_value(cell).map(|value| (col.name.clone(), value))
                        })
                        .collect::<serde_json::Result<serde_json::Map<_, _>>>()
                })
                .collect::<serde_json::Result<Vec<_>>>()?;
            serde_json::to_writer_pretty(&mut out, &records)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Prints one line per refreshed key.
struct StdoutProgress;

impl RefreshProgress for StdoutProgress {
    fn on_start(&self, key: &CacheKey, index: usize, total: usize) {
        print!("[{}/{}] {} ... ", index + 1, total, key);
        let _ = std::io::stdout().flush();
    }

    fn on_complete(&self, _key: &CacheKey, _index: usize, _total: usize, outcome: &RefreshOutcome) {
        match outcome {
            RefreshOutcome::Saved { rows } => println!("{rows} rows"),
            RefreshOutcome::Failed(err) => println!("FAILED: {err}"),
        }
    }
}
