//! Subcommand implementations

pub mod scan;
pub mod universe;

use anyhow::{Context, Result};
use std::sync::Arc;

use intraday_sniper::config::DataSource;
use intraday_sniper::providers::{
    BarProvider, CsvBarProvider, ListProvider, YahooBarProvider, ZerodhaBarProvider,
    ZerodhaCredentials,
};
use intraday_sniper::universe::{CachedListProvider, RemoteCsvListProvider, StaticListProvider};
use intraday_sniper::Config;

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

/// Ticker source: `--tickers`, then `universe.tickers`, then the remote list
fn list_provider(config: &Config, tickers: Option<&str>) -> Result<Box<dyn ListProvider>> {
    let suffix = &config.universe.suffix;
    if let Some(list) = tickers {
        return Ok(Box::new(StaticListProvider::parse(list, suffix)));
    }
    if let Some(list) = &config.universe.tickers {
        return Ok(Box::new(StaticListProvider::parse(&list.join(","), suffix)));
    }

    let remote = RemoteCsvListProvider::new(&config.universe.url, config.fetch_timeout())
        .context("Failed to create constituents client")?
        .with_suffix(suffix.as_str());
    Ok(Box::new(CachedListProvider::new(remote, config.cache_ttl())))
}

fn bar_provider(config: &Config) -> Result<Arc<dyn BarProvider>> {
    let timeout = config.fetch_timeout();
    let provider: Arc<dyn BarProvider> = match config.scanner.source {
        DataSource::Yahoo => Arc::new(
            YahooBarProvider::new(timeout).context("Failed to create Yahoo client")?,
        ),
        DataSource::Zerodha => {
            let credentials = ZerodhaCredentials::new(
                config.zerodha.api_key.clone().unwrap_or_default(),
                config.zerodha.access_token.clone().unwrap_or_default(),
            );
            Arc::new(
                ZerodhaBarProvider::new(credentials, timeout)
                    .context("Failed to create Kite client")?
                    .with_instruments(config.zerodha.instruments.clone()),
            )
        }
        DataSource::Csv => Arc::new(CsvBarProvider::new(&config.data.data_dir)),
    };
    Ok(provider)
}
