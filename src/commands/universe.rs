//! Universe command: show which tickers a scan would cover

use anyhow::{Context, Result};
use std::path::PathBuf;

use intraday_sniper::universe::{Universe, UniverseSource};
use intraday_sniper::Config;

use super::{list_provider, runtime};

pub fn run(config_path: Option<PathBuf>, tickers: Option<String>, json: bool) -> Result<()> {
    dotenv::dotenv().ok();
    runtime()?.block_on(run_async(config_path, tickers, json))
}

async fn run_async(config_path: Option<PathBuf>, tickers: Option<String>, json: bool) -> Result<()> {
    let config = Config::load(config_path.as_deref()).context("Failed to load config")?;
    let list = list_provider(&config, tickers.as_deref())?;
    let universe = Universe::resolve(list.as_ref()).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&universe).context("Failed to serialize universe")?
        );
        return Ok(());
    }

    if let Some(warning) = &universe.warning {
        println!("⚠ {}", warning);
    }
    let source = match universe.source {
        UniverseSource::Provider => list.name().to_string(),
        UniverseSource::Fallback => "built-in fallback list".to_string(),
    };
    println!("{} tickers from {}:", universe.len(), source);
    for ticker in &universe.tickers {
        println!("  {}", ticker);
    }
    Ok(())
}
