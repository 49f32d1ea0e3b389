//! Core types used throughout the scoring engine
//!
//! Defines the contract snapshot, Greeks, market context, and the scored
//! opportunity record the pipeline emits.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Option contract type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "CALL"),
            OptionType::Put => write!(f, "PUT"),
        }
    }
}

/// Immutable snapshot of one exchange-traded option contract.
///
/// Created per scan cycle and discarded after scoring; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying ticker symbol
    pub symbol: String,
    /// Strike price
    pub strike: f64,
    /// Expiration date
    pub expiration: NaiveDate,
    /// Call or put
    pub option_type: OptionType,
    /// Last traded price
    pub last_price: f64,
    /// Best bid
    pub bid: f64,
    /// Best ask
    pub ask: f64,
    /// Session volume (contracts)
    pub volume: u64,
    /// Open interest (contracts)
    pub open_interest: u64,
    /// Implied volatility as quoted by the data source. May arrive as a
    /// decimal fraction (0.25) or a percentage (25.0); pricing normalizes it.
    pub implied_volatility: f64,
    /// Spot price of the underlying at snapshot time
    pub underlying_price: f64,
    /// Greeks as supplied by the data source, if any. Zero fields are treated
    /// as missing and recomputed by the pricing model.
    #[serde(default)]
    pub greeks: Option<Greeks>,
}

impl OptionContract {
    /// Mid price of the quoted spread, falling back to last price when the
    /// book is one-sided.
    pub fn mid_price(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last_price
        }
    }

    /// Bid/ask spread as a fraction of the mid price
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid_price();
        if mid > 0.0 && self.ask >= self.bid {
            (self.ask - self.bid) / mid
        } else {
            f64::INFINITY
        }
    }

    /// Strike distance from spot, relative to spot (positive = above spot)
    pub fn moneyness(&self) -> f64 {
        if self.underlying_price > 0.0 {
            (self.strike - self.underlying_price) / self.underlying_price
        } else {
            0.0
        }
    }

    /// Whole calendar days until expiration
    pub fn days_to_expiration(&self, now: DateTime<Utc>) -> i64 {
        (self.expiration - now.date_naive()).num_days()
    }
}

/// First-order option Greeks.
///
/// Theta is value change per calendar day; vega is value change per one
/// percentage point of implied volatility. Downstream consumers assume these
/// units, so they are fixed here and never rescaled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    /// Per calendar day (annual theta / 365)
    pub theta: f64,
    /// Per 1% IV change (raw vega / 100)
    pub vega: f64,
}

/// News headline with sentiment score in [-1, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    pub sentiment: f64,
}

/// Technical trend classification for an underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

impl Default for TrendBias {
    fn default() -> Self {
        TrendBias::Neutral
    }
}

impl fmt::Display for TrendBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendBias::Bullish => write!(f, "BULLISH"),
            TrendBias::Bearish => write!(f, "BEARISH"),
            TrendBias::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Per-underlying market snapshot, one per scan cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    /// Underlying ticker symbol
    pub symbol: String,
    /// Spot price
    pub underlying_price: f64,
    /// Session share volume
    pub volume: u64,
    /// Trailing average daily volume (for unusual-volume detection)
    pub avg_volume: u64,
    /// Realized volatility (annualized decimal)
    pub realized_volatility: f64,
    /// At-the-money implied volatility (annualized decimal)
    pub implied_volatility: f64,
    /// Price change over the recent confirmation window, as a fraction
    pub recent_price_change_pct: f64,
    /// Recent headlines with sentiment
    #[serde(default)]
    pub news: Vec<NewsItem>,
    /// Technical trend classification
    pub trend: TrendBias,
}

impl MarketContext {
    /// Degraded context for a symbol where no collaborator could supply data.
    /// Neutral trend, no news, zero volatility estimates.
    pub fn degraded(symbol: &str, underlying_price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            underlying_price,
            volume: 0,
            avg_volume: 0,
            realized_volatility: 0.0,
            implied_volatility: 0.0,
            recent_price_change_pct: 0.0,
            news: Vec::new(),
            trend: TrendBias::Neutral,
        }
    }

    /// Mean sentiment across recent news, 0.0 when there is none
    pub fn avg_sentiment(&self) -> f64 {
        if self.news.is_empty() {
            return 0.0;
        }
        self.news.iter().map(|n| n.sentiment).sum::<f64>() / self.news.len() as f64
    }
}

/// Daily OHLC bar from the price-history provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OhlcBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Risk classification for a scored opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    CapitalPreservation,
    Conservative,
    Balanced,
    Aggressive,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::CapitalPreservation => write!(f, "CAPITAL_PRESERVATION"),
            RiskLevel::Conservative => write!(f, "CONSERVATIVE"),
            RiskLevel::Balanced => write!(f, "BALANCED"),
            RiskLevel::Aggressive => write!(f, "AGGRESSIVE"),
        }
    }
}

/// Numeric recovery recorded while scoring a contract.
///
/// These are never dropped silently: each clamp or floor that touched the
/// result is carried here and logged when it happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Non-positive IV replaced by the minimum floor
    VolatilityFloored,
    /// Probability-of-profit fell outside [0,1] and was clamped
    ProbabilityClamped,
    /// A supplied Greek field was zero/missing and was recomputed
    GreeksRecomputed,
    /// A collaborator was unavailable; statistics degraded for this contract
    ProviderDegraded(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::VolatilityFloored => write!(f, "volatility_floored"),
            Diagnostic::ProbabilityClamped => write!(f, "probability_clamped"),
            Diagnostic::GreeksRecomputed => write!(f, "greeks_recomputed"),
            Diagnostic::ProviderDegraded(s) => write!(f, "provider_degraded:{}", s),
        }
    }
}

/// Threshold(s) a fallback-admitted contract fell short of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortfallReason {
    BelowProbabilityOfProfit,
    BelowCompositeScore,
    BelowDeltaMagnitude,
}

impl fmt::Display for ShortfallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShortfallReason::BelowProbabilityOfProfit => write!(f, "below_probability_of_profit"),
            ShortfallReason::BelowCompositeScore => write!(f, "below_composite_score"),
            ShortfallReason::BelowDeltaMagnitude => write!(f, "below_delta_magnitude"),
        }
    }
}

/// Per-symbol evaluation failure surfaced alongside successful results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationError {
    pub symbol: String,
    pub reason: String,
}

/// Final scored opportunity emitted by the filtering pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredOpportunity {
    /// The contract snapshot that was scored
    pub contract: OptionContract,
    /// Greeks after the supplied/recomputed merge
    pub greeks: Greeks,
    /// Aggregated directional bias for the underlying
    pub bias: crate::signals::AggregatedBias,
    /// Similar-trade backtest result
    pub backtest: crate::backtest::BacktestResult,
    /// Empirical historical-move statistics for the required move
    pub historical_move: crate::history::HistoricalMoveContext,
    /// Kelly position sizing recommendation
    pub sizing: crate::sizing::PositionSizingRecommendation,
    /// Probability the position finishes profitable, clamped to [0,1]
    pub probability_of_profit: f64,
    /// Composite ranking score, 0-100
    pub composite_score: f64,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// Thresholds this entry fell short of; empty when admitted strictly.
    /// Non-empty entries were backfilled by the fallback guarantee.
    #[serde(default)]
    pub fallback_shortfalls: Vec<ShortfallReason>,
    /// Numeric recoveries recorded while scoring
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl ScoredOpportunity {
    /// Whether strict institutional filters were relaxed to admit this entry
    pub fn is_fallback(&self) -> bool {
        !self.fallback_shortfalls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(bid: f64, ask: f64, last: f64) -> OptionContract {
        OptionContract {
            symbol: "TEST".to_string(),
            strike: 105.0,
            expiration: NaiveDate::from_ymd_opt(2027, 1, 15).unwrap(),
            option_type: OptionType::Call,
            last_price: last,
            bid,
            ask,
            volume: 500,
            open_interest: 1200,
            implied_volatility: 0.25,
            underlying_price: 100.0,
            greeks: None,
        }
    }

    #[test]
    fn test_mid_price_prefers_quotes() {
        let c = contract(1.0, 1.2, 2.0);
        assert!((c.mid_price() - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_mid_price_falls_back_to_last() {
        let c = contract(0.0, 1.2, 2.0);
        assert!((c.mid_price() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_spread_pct() {
        let c = contract(1.0, 1.2, 1.1);
        // 0.2 spread on 1.1 mid
        assert!((c.spread_pct() - 0.2 / 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_moneyness_above_spot() {
        let c = contract(1.0, 1.2, 1.1);
        assert!((c.moneyness() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_avg_sentiment_empty() {
        let ctx = MarketContext::degraded("TEST", 100.0);
        assert_eq!(ctx.avg_sentiment(), 0.0);
    }
}
