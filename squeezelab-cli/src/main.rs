//! `squeezelab` command line: single backtests and parameter sweeps over
//! OHLCV CSV files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use squeezelab_core::domain::Bar;
use squeezelab_core::engine::{EngineConfig, MarketData};
use squeezelab_runner::{
    Partition, ResultStore, RunOptions, SqueezeParams, SweepRunner, SweepSpec,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "squeezelab", version, about = "Squeeze strategy backtester")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one backtest and print the summary.
    Run {
        /// OHLCV CSV file (timestamp,open,high,low,close,volume).
        #[arg(long)]
        data: PathBuf,
        /// Instrument symbol of the data.
        #[arg(long)]
        symbol: String,
        /// Optional TOML file with strategy parameters.
        #[arg(long)]
        params: Option<PathBuf>,
        #[arg(long, default_value_t = 100_000.0)]
        cash: f64,
        #[arg(long, default_value_t = 0.0006)]
        commission: f64,
    },
    /// Expand a sweep spec and run every combination through the cache.
    Sweep {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        symbol: String,
        /// TOML sweep spec; single values or lists per knob.
        #[arg(long)]
        spec: PathBuf,
        /// Root directory of the result store.
        #[arg(long, default_value = "results")]
        out: PathBuf,
        /// Worker threads; defaults to all available execution units.
        #[arg(long, default_value_t = squeezelab_runner::default_threads())]
        threads: usize,
        /// Recompute even when a cached row exists.
        #[arg(long)]
        no_cache: bool,
        /// Do not persist results.
        #[arg(long)]
        no_save: bool,
        #[arg(long, default_value_t = 100_000.0)]
        cash: f64,
        #[arg(long, default_value_t = 0.0006)]
        commission: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Run {
            data,
            symbol,
            params,
            cash,
            commission,
        } => run(&data, &symbol, params.as_deref(), cash, commission),
        Command::Sweep {
            data,
            symbol,
            spec,
            out,
            threads,
            no_cache,
            no_save,
            cash,
            commission,
        } => sweep(
            &data, &symbol, &spec, &out, threads, no_cache, no_save, cash, commission,
        ),
    }
}

fn run(
    data_path: &Path,
    symbol: &str,
    params_path: Option<&Path>,
    cash: f64,
    commission: f64,
) -> Result<()> {
    let data = load_bars(data_path, symbol)?;
    let params = match params_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading params from {}", path.display()))?;
            toml_params(&text)?
        }
        None => SqueezeParams::default(),
    };
    let engine = EngineConfig {
        initial_cash: cash,
        commission_rate: commission,
    };

    let report = squeezelab_runner::run_one(symbol, &params, &data, &engine)?;
    let m = &report.metrics;
    println!("fingerprint:   {}", report.fingerprint);
    println!("bars:          {}", report.result.bar_count);
    println!("end value:     {:.2}", m.end_value);
    println!("trades:        {} ({} won / {} lost)", m.total_trades, m.trades_won, m.trades_lost);
    println!("net pnl:       {:.2}", m.pnl_net);
    println!("max drawdown:  {:.2}% ({:.2})", m.max_drawdown_pct, m.max_drawdown_money);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn sweep(
    data_path: &Path,
    symbol: &str,
    spec_path: &Path,
    out: &Path,
    threads: usize,
    no_cache: bool,
    no_save: bool,
    cash: f64,
    commission: f64,
) -> Result<()> {
    let data = load_bars(data_path, symbol)?;
    let text = fs::read_to_string(spec_path)
        .with_context(|| format!("reading sweep spec from {}", spec_path.display()))?;
    let combos = SweepSpec::from_toml_str(&text)?.expand();
    if combos.is_empty() {
        bail!("sweep spec expands to no combinations");
    }

    let (start, end) = data_span(&data)?;
    let partition = Partition {
        strategy: "squeeze".into(),
        symbol: symbol.to_string(),
        start,
        end,
    };
    let engine = EngineConfig {
        initial_cash: cash,
        commission_rate: commission,
    };

    let store = Arc::new(ResultStore::new(out));
    let runner = SweepRunner::new(RunOptions {
        threads,
        use_cache: !no_cache,
        save_results: !no_save,
    })
    .with_store(store)
    .on_item(|item| {
        info!(
            index = item.index + 1,
            total = item.total,
            cached = item.is_cached(),
            "combination finished"
        );
    });

    let items = runner.run(&partition, &combos, &data, &engine);
    let computed = items.iter().filter(|i| i.is_computed()).count();
    let cached = items.iter().filter(|i| i.is_cached()).count();
    let skipped = items.len() - computed - cached;
    println!(
        "{} combinations: {computed} computed, {cached} cached, {skipped} skipped",
        items.len()
    );
    Ok(())
}

fn toml_params(text: &str) -> Result<SqueezeParams> {
    Ok(SweepSpec::from_toml_str(text)?
        .expand()
        .into_iter()
        .next()
        .unwrap_or_default())
}

fn load_bars(path: &Path, symbol: &str) -> Result<MarketData> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let col = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .with_context(|| format!("missing column {name} in {}", path.display()))
    };
    let (ts, open, high, low, close) = (
        col("timestamp")?,
        col("open")?,
        col("high")?,
        col("low")?,
        col("close")?,
    );
    let volume = headers.iter().position(|h| h.eq_ignore_ascii_case("volume"));

    let mut bars = Vec::new();
    for row in reader.records() {
        let row = row?;
        let timestamp = parse_timestamp(&row[ts])?;
        let bar = Bar {
            symbol: symbol.to_string(),
            timestamp,
            open: row[open].parse()?,
            high: row[high].parse()?,
            low: row[low].parse()?,
            close: row[close].parse()?,
            volume: volume
                .and_then(|i| row.get(i))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
        };
        if !bar.is_sane() {
            warn!(%timestamp, "skipping bar with inconsistent OHLC");
            continue;
        }
        bars.push(bar);
    }
    if bars.is_empty() {
        bail!("no bars in {}", path.display());
    }
    Ok(MarketData::from_bars(bars))
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }
    bail!("unrecognized timestamp: {text}")
}

fn data_span(data: &MarketData) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let first = data.ticks.first().context("empty data")?.timestamp;
    let last = data.ticks.last().context("empty data")?.timestamp;
    Ok((first, last))
}
