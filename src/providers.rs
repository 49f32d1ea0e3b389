//! Market data provider traits
//!
//! The pipeline depends on these seams rather than any concrete feed, so
//! tests inject fixtures and production wires real adapters. All methods are
//! fallible; the pipeline degrades per symbol instead of aborting the scan
//! when a provider errors or times out.

use async_trait::async_trait;

use crate::types::{MarketContext, NewsItem, OhlcBar, OptionContract};

/// Daily OHLC price history for an underlying
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// Bars in ascending date order, covering up to `lookback_days` trading
    /// days. Shorter histories are acceptable; the consumers account for
    /// sample size.
    async fn price_history(&self, symbol: &str, lookback_days: usize)
        -> anyhow::Result<Vec<OhlcBar>>;
}

/// Full option-chain snapshot for an underlying
#[async_trait]
pub trait OptionsChainProvider: Send + Sync {
    async fn options_chain(&self, symbol: &str) -> anyhow::Result<Vec<OptionContract>>;
}

/// Per-underlying market snapshot (spot, volumes, trend, news)
#[async_trait]
pub trait MarketContextProvider: Send + Sync {
    async fn market_context(&self, symbol: &str) -> anyhow::Result<MarketContext>;

    /// Recent headlines with sentiment; default empty for feeds without news
    async fn recent_news(&self, _symbol: &str) -> anyhow::Result<Vec<NewsItem>> {
        Ok(Vec::new())
    }
}
