//! Scan command implementation

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};

use intraday_sniper::config::DataSource;
use intraday_sniper::providers::Interval;
use intraday_sniper::scanner::{ScanReport, Scanner};
use intraday_sniper::universe::Universe;
use intraday_sniper::{Config, Signal};

use super::{bar_provider, list_provider, runtime};

/// Command-line overrides for a scan
#[derive(Debug, Default)]
pub struct ScanArgs {
    pub config: Option<PathBuf>,
    pub tickers: Option<String>,
    pub budget: Option<f64>,
    /// Percent, e.g. 1.0 for 1%
    pub risk_pct: Option<f64>,
    pub source: Option<DataSource>,
    pub data_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub interval: Option<Interval>,
    pub sort_by_volume: bool,
    pub json: bool,
}

pub fn run(args: ScanArgs) -> Result<()> {
    dotenv::dotenv().ok();
    runtime()?.block_on(run_async(args))
}

fn apply_overrides(config: &mut Config, args: &ScanArgs) {
    if let Some(budget) = args.budget {
        info!("Overriding budget to: ₹{:.2}", budget);
        config.risk.budget = budget;
    }
    if let Some(pct) = args.risk_pct {
        info!("Overriding risk per trade to: {:.2}%", pct);
        config.risk.risk_pct = pct / 100.0;
    }
    if let Some(source) = args.source {
        config.scanner.source = source;
    }
    if let Some(dir) = &args.data_dir {
        config.data.data_dir = dir.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.scanner.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        config.scanner.timeout_secs = timeout;
    }
    if let Some(interval) = args.interval {
        config.scanner.interval = interval;
    }
    if args.sort_by_volume {
        config.scanner.sort_by_volume = true;
    }
}

async fn run_async(args: ScanArgs) -> Result<()> {
    let mut config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let risk = config.risk_config()?;
    let provider = bar_provider(&config)?;
    let list = list_provider(&config, args.tickers.as_deref())?;

    info!(
        source = %config.scanner.source,
        budget = risk.budget(),
        risk_pct = risk.risk_pct(),
        "Starting intraday scan"
    );

    let universe = Universe::resolve(list.as_ref()).await;
    if let Some(warning) = &universe.warning {
        if !args.json {
            println!("⚠ {}", warning);
        }
    }

    let scanner = Scanner::new(provider, config.scanner_config()?);
    let cancel = scanner.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling scan...");
            cancel.cancel();
        }
    });

    let pb = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(universe.len() as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("🎯 {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );

    let mut report = scanner
        .scan_with_progress(&universe.tickers, &risk, |outcome| {
            pb.set_message(outcome.ticker.to_string());
            pb.inc(1);
        })
        .await;
    pb.finish_and_clear();
    ctrl_c.abort();

    report.warning = universe.warning.clone();
    if config.scanner.sort_by_volume {
        report.sort_by_volume();
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_report(&report, &config);
    }
    Ok(())
}

fn print_report(report: &ScanReport, config: &Config) {
    let s = &report.summary;

    println!("\n{}", "=".repeat(92));
    println!("INTRADAY SNIPER: VWAP + RSI MOMENTUM SCAN");
    println!("{}", "=".repeat(92));
    println!(
        "Budget: ₹{:.2}    Risk/trade: {:.2}%    Source: {}",
        config.risk.budget,
        config.risk.risk_pct * 100.0,
        config.scanner.source
    );

    if report.signals.is_empty() {
        println!("{}", "-".repeat(92));
        println!("No setups found across {} tickers.", s.scanned);
    } else {
        println!("{}", "-".repeat(92));
        println!(
            "{:<16} {:>10} {:>10} {:>6} {:>10} {:>10} {:>6} {:>12} {:>12}",
            "TICKER", "PRICE", "VWAP", "RSI", "STOP", "TARGET", "QTY", "VOLUME", "AVG VOL"
        );
        println!("{}", "-".repeat(92));
        for signal in &report.signals {
            println!(
                "{:<16} {:>10} {:>10} {:>6.1} {:>10} {:>10} {:>6} {:>12.0} {:>12}",
                signal.ticker.as_str(),
                signal.price.to_string(),
                signal.vwap.to_string(),
                signal.rsi,
                signal.stop_loss.to_string(),
                signal.target.to_string(),
                signal.quantity,
                signal.volume,
                signal
                    .avg_volume
                    .map(|v| format!("{:.0}", v))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }

        if let Some(top) = report.top_pick() {
            print_top_pick(top);
        }
    }

    println!("{}", "-".repeat(92));
    println!("Scanned:            {}", s.scanned);
    println!("Signals:            {}", s.signaled);
    println!("No setup:           {}", s.no_setup);
    println!(
        "Failed:             {} (data unavailable: {}, degenerate: {})",
        s.failed, s.data_unavailable, s.degenerate
    );
    if s.cancelled > 0 {
        println!("Cancelled:          {}", s.cancelled);
    }
    println!("{}", "=".repeat(92));
}

fn print_top_pick(signal: &Signal) {
    println!("{}", "-".repeat(92));
    println!("🏆 TOP PICK (highest volume): {}", signal.ticker);
    println!("   Entry:       ₹{}", signal.price);
    println!("   Stop Loss:   ₹{}  (risk ₹{}/share)", signal.stop_loss, signal.risk_per_share());
    println!("   Target:      ₹{}", signal.target);
    println!("   Quantity:    {}", signal.quantity);
}
