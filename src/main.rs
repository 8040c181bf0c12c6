//! Intraday Sniper - main entry point
//!
//! Subcommands:
//! - scan: Scan the universe for VWAP + RSI momentum setups
//! - universe: Show the tickers a scan would cover

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use intraday_sniper::config::DataSource;
use intraday_sniper::providers::Interval;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "intraday-sniper")]
#[command(about = "Intraday momentum scanner with ATR stops and risk-based position sizing", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan tickers for bullish VWAP + RSI setups
    Scan {
        /// Path to configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tickers to scan (comma-separated). E.g., "RELIANCE,TCS,INFY"
        #[arg(short, long)]
        tickers: Option<String>,

        /// Trading budget
        #[arg(long)]
        budget: Option<f64>,

        /// Risk per trade in percent (0.5 - 2.0)
        #[arg(long)]
        risk_pct: Option<f64>,

        /// Data source: "yahoo" (default), "zerodha" or "csv"
        #[arg(long)]
        source: Option<DataSource>,

        /// Directory of CSV snapshots for --source csv
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Number of tickers fetched concurrently
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-ticker fetch timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Bar interval (1m, 5m, 15m, 30m, 1h, 1d)
        #[arg(long)]
        interval: Option<Interval>,

        /// Order signals by last-bar volume, highest first
        #[arg(long)]
        sort_by_volume: bool,

        /// Print the scan report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the ticker universe
    Universe {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tickers (comma-separated) instead of the configured list
        #[arg(short, long)]
        tickers: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn setup_logging(log_dir: &Path, verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = log_dir.join(&log_filename);

    // Filter out noisy HTTP crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);

    if file_only {
        // Console stays clean for the progress bar and report
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

/// Log file prefix, and whether the console layer is suppressed
fn logging_mode(cli: &Cli) -> (&'static str, bool) {
    match &cli.command {
        Commands::Scan { .. } => ("scan", !cli.verbose),
        Commands::Universe { json, .. } => ("universe", *json),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = logging_mode(&cli);
    setup_logging(Path::new("logs"), cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Scan {
            config,
            tickers,
            budget,
            risk_pct,
            source,
            data_dir,
            concurrency,
            timeout,
            interval,
            sort_by_volume,
            json,
        } => commands::scan::run(commands::scan::ScanArgs {
            config,
            tickers,
            budget,
            risk_pct,
            source,
            data_dir,
            concurrency,
            timeout,
            interval,
            sort_by_volume,
            json,
        }),

        Commands::Universe {
            config,
            tickers,
            json,
        } => commands::universe::run(config, tickers, json),
    }
}
