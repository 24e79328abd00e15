use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use decision_core::{
    Candle, CandleWindow, DecisionPipeline, IndicatorSnapshot, PipelineConfig, TriggerStatus,
};

#[derive(Parser, Debug)]
#[command(name = "decision-core")]
#[command(about = "Market-structure & trade-decision pipeline over OHLCV data")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one full decision cycle on the latest window and print it as JSON
    Evaluate {
        /// Path to an OHLCV CSV (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        csv: PathBuf,

        /// Symbol the series belongs to
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Timeframe label of the series
        #[arg(short, long, default_value = "1h")]
        timeframe: String,

        /// Bars per evaluation window
        #[arg(short, long, default_value = "200")]
        window: usize,

        /// Optional pipeline config JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Step through the CSV bar by bar and log every decision transition
    Watch {
        #[arg(short, long)]
        csv: PathBuf,

        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        #[arg(short, long, default_value = "1h")]
        timeframe: String,

        #[arg(short, long, default_value = "200")]
        window: usize,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the detected support/resistance levels for the latest window
    Levels {
        #[arg(short, long)]
        csv: PathBuf,

        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        #[arg(short, long, default_value = "1h")]
        timeframe: String,

        #[arg(short, long, default_value = "200")]
        window: usize,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Evaluate {
            csv,
            symbol,
            timeframe,
            window,
            config,
        } => evaluate(&csv, &symbol, &timeframe, window, config.as_deref()),
        Commands::Watch {
            csv,
            symbol,
            timeframe,
            window,
            config,
        } => watch(&csv, &symbol, &timeframe, window, config.as_deref()),
        Commands::Levels {
            csv,
            symbol,
            timeframe,
            window,
            config,
        } => levels(&csv, &symbol, &timeframe, window, config.as_deref()),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_from_path(path),
        None => Ok(PipelineConfig::default()),
    }
}

/// One CSV row. Indicator columns are optional; when present on the last row
/// they override the window-derived values.
#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    ema_20: Option<f64>,
    #[serde(default)]
    ema_50: Option<f64>,
    #[serde(default)]
    ema_200: Option<f64>,
    #[serde(default)]
    adx_14: Option<f64>,
    #[serde(default)]
    rsi_14: Option<f64>,
    #[serde(default)]
    atr_percent: Option<f64>,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<i64>() {
        // unix seconds or milliseconds
        let secs = if secs > 10_000_000_000 { secs / 1000 } else { secs };
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .with_context(|| format!("timestamp out of range: {}", raw));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("unparseable timestamp: {}", raw))
}

fn load_rows(path: &std::path::Path) -> Result<Vec<(Candle, IndicatorSnapshot)>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut rows = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.context("malformed CSV row")?;
        let candle = Candle {
            timestamp: parse_timestamp(&row.timestamp)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        };
        let overrides = IndicatorSnapshot {
            ema_20: row.ema_20,
            ema_50: row.ema_50,
            ema_200: row.ema_200,
            adx_14: row.adx_14,
            rsi_14: row.rsi_14,
            atr_percent: row.atr_percent,
            ..Default::default()
        };
        rows.push((candle, overrides));
    }
    if rows.is_empty() {
        bail!("{} contains no rows", path.display());
    }
    info!("Loaded {} bars from {}", rows.len(), path.display());
    Ok(rows)
}

fn window_of(rows: &[(Candle, IndicatorSnapshot)], end: usize, size: usize) -> Result<CandleWindow> {
    let start = end.saturating_sub(size);
    let candles = rows[start..end].iter().map(|(c, _)| c.clone()).collect();
    CandleWindow::new(candles)
}

fn evaluate(
    csv: &std::path::Path,
    symbol: &str,
    timeframe: &str,
    window_size: usize,
    config: Option<&std::path::Path>,
) -> Result<()> {
    let rows = load_rows(csv)?;
    let window = window_of(&rows, rows.len(), window_size)?;
    let overrides = rows.last().map(|(_, snap)| snap.clone()).unwrap_or_default();

    let mut pipeline = DecisionPipeline::new(load_config(config)?);
    let record = pipeline
        .process(&window, symbol, timeframe, Some(&overrides))
        .context("pipeline produced no record for a full cycle")?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn watch(
    csv: &std::path::Path,
    symbol: &str,
    timeframe: &str,
    window_size: usize,
    config: Option<&std::path::Path>,
) -> Result<()> {
    let rows = load_rows(csv)?;
    let warmup = 50.min(rows.len());
    let mut pipeline = DecisionPipeline::new(load_config(config)?);

    let mut decisions = 0usize;
    for end in warmup..=rows.len() {
        let window = window_of(&rows, end, window_size)?;
        let overrides = rows[end - 1].1.clone();
        let Some(record) = pipeline.process(&window, symbol, timeframe, Some(&overrides)) else {
            continue;
        };
        decisions += 1;

        let triggered = record
            .trigger
            .as_ref()
            .map(|t| t.status == TriggerStatus::Triggered)
            .unwrap_or(false);
        let exited = record
            .exit_signal
            .as_ref()
            .map(|s| s.should_exit)
            .unwrap_or(false);

        info!(
            "{} | {} | {}",
            record.timestamp,
            record
                .regime
                .as_ref()
                .map(|r| r.regime.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.note
        );
        // full records only for the interesting transitions
        if triggered || exited {
            println!("{}", serde_json::to_string(&record)?);
        }
    }

    info!("Watch complete: {} decision cycles", decisions);
    Ok(())
}

fn levels(
    csv: &std::path::Path,
    symbol: &str,
    timeframe: &str,
    window_size: usize,
    config: Option<&std::path::Path>,
) -> Result<()> {
    let rows = load_rows(csv)?;
    let window = window_of(&rows, rows.len(), window_size)?;
    let config = load_config(config)?;

    let engine = decision_core::LevelEngine::new(config.levels);
    let result = engine.detect_levels(&window, symbol, timeframe, None);

    info!(
        "{} levels for {} {} (price {:.4})",
        result.levels.len(),
        result.symbol,
        result.timeframe,
        result.current_price
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
