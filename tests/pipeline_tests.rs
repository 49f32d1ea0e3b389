//! End-to-end scan cycle tests with fixture providers

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};

use optscreen::config::ScanConfig;
use optscreen::error::EngineError;
use optscreen::pipeline::OpportunityEngine;
use optscreen::providers::{MarketContextProvider, OptionsChainProvider, PriceHistoryProvider};
use optscreen::types::{
    Diagnostic, MarketContext, OhlcBar, OptionContract, OptionType, TrendBias,
};

/// Daily bars drifting `daily_return` per bar, starting at 100
fn drifting_bars(count: usize, daily_return: f64) -> Vec<OhlcBar> {
    let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
    let mut close = 100.0;
    (0..count)
        .map(|i| {
            let open = close;
            close *= 1.0 + daily_return;
            OhlcBar {
                date: start + Duration::days(i as i64),
                open,
                high: open.max(close) * 1.002,
                low: open.min(close) * 0.998,
                close,
                volume: 1_000_000,
            }
        })
        .collect()
}

/// A liquid near-the-money call expiring 45 days out
fn candidate(symbol: &str, strike: f64) -> OptionContract {
    OptionContract {
        symbol: symbol.to_string(),
        strike,
        expiration: Utc::now().date_naive() + Duration::days(45),
        option_type: OptionType::Call,
        last_price: 3.5,
        bid: 3.4,
        ask: 3.6,
        volume: 800,
        open_interest: 2500,
        implied_volatility: 0.25,
        underlying_price: 100.0,
        greeks: None,
    }
}

struct FixtureHistory {
    bars: Vec<OhlcBar>,
}

#[async_trait]
impl PriceHistoryProvider for FixtureHistory {
    async fn price_history(
        &self,
        _symbol: &str,
        _lookback_days: usize,
    ) -> anyhow::Result<Vec<OhlcBar>> {
        Ok(self.bars.clone())
    }
}

struct FixtureChains {
    chain: Vec<OptionContract>,
}

#[async_trait]
impl OptionsChainProvider for FixtureChains {
    async fn options_chain(&self, symbol: &str) -> anyhow::Result<Vec<OptionContract>> {
        Ok(self
            .chain
            .iter()
            .filter(|c| c.symbol == symbol)
            .cloned()
            .collect())
    }
}

struct FixtureContexts;

#[async_trait]
impl MarketContextProvider for FixtureContexts {
    async fn market_context(&self, symbol: &str) -> anyhow::Result<MarketContext> {
        Ok(MarketContext {
            symbol: symbol.to_string(),
            underlying_price: 100.0,
            volume: 2_000_000,
            avg_volume: 1_500_000,
            realized_volatility: 0.22,
            implied_volatility: 0.25,
            recent_price_change_pct: 0.01,
            news: Vec::new(),
            trend: TrendBias::Bullish,
        })
    }
}

struct FailingProvider;

#[async_trait]
impl PriceHistoryProvider for FailingProvider {
    async fn price_history(
        &self,
        _symbol: &str,
        _lookback_days: usize,
    ) -> anyhow::Result<Vec<OhlcBar>> {
        anyhow::bail!("feed offline")
    }
}

#[async_trait]
impl OptionsChainProvider for FailingProvider {
    async fn options_chain(&self, _symbol: &str) -> anyhow::Result<Vec<OptionContract>> {
        anyhow::bail!("feed offline")
    }
}

#[async_trait]
impl MarketContextProvider for FailingProvider {
    async fn market_context(&self, _symbol: &str) -> anyhow::Result<MarketContext> {
        anyhow::bail!("feed offline")
    }
}

/// Opt-in scan logging for test runs (`RUST_LOG=optscreen=debug`)
fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with(
    config: ScanConfig,
    bars: Vec<OhlcBar>,
    chain: Vec<OptionContract>,
) -> OpportunityEngine {
    trace_init();
    OpportunityEngine::new(
        config,
        Arc::new(FixtureHistory { bars }),
        Arc::new(FixtureChains { chain }),
        Arc::new(FixtureContexts),
    )
}

#[tokio::test]
async fn test_scan_admits_and_ranks_by_composite() {
    let candidates = vec![
        candidate("AAA", 100.0),
        candidate("AAA", 102.0),
        candidate("BBB", 100.0),
    ];
    let engine = engine_with(
        ScanConfig::default(),
        drifting_bars(250, 0.003),
        candidates.clone(),
    );

    let outcome = engine.scan(candidates, HashMap::new()).await.unwrap();
    assert!(outcome.errors.is_empty());
    assert!(!outcome.opportunities.is_empty());
    assert_eq!(outcome.summary.liquidity_rejected, 0);
    // Sorted best-first
    for pair in outcome.opportunities.windows(2) {
        assert!(pair[0].composite_score >= pair[1].composite_score);
    }
    // A steady uptrend backs the calls with a strong realized record
    let top = &outcome.opportunities[0];
    assert!(top.backtest.sufficient);
    assert!(top.backtest.win_rate > 0.8);
}

#[tokio::test]
async fn test_fallback_backfills_to_minimum_with_shortfall_tags() {
    // Downtrend kills the calls' backtest; far OTM strikes kill probability
    // and delta, so nothing passes the strict filter
    let mut candidates = Vec::new();
    for symbol in ["AAA", "BBB", "CCC"] {
        for strike in [135.0, 140.0, 145.0, 150.0] {
            candidates.push(candidate(symbol, strike));
        }
    }
    let engine = engine_with(
        ScanConfig::default(),
        drifting_bars(250, -0.001),
        candidates.clone(),
    );

    let outcome = engine.scan(candidates, HashMap::new()).await.unwrap();
    assert_eq!(outcome.summary.strict_admitted, 0);
    // 12 scored candidates, minimum 10, cap 5 per symbol: exactly 10 backfilled
    assert_eq!(outcome.opportunities.len(), 10);
    assert_eq!(outcome.summary.backfilled, 10);
    for opportunity in &outcome.opportunities {
        assert!(opportunity.is_fallback());
        assert!(!opportunity.fallback_shortfalls.is_empty());
    }
}

#[tokio::test]
async fn test_liquidity_gate_never_bypassed_by_fallback() {
    // All candidates are illiquid; the fallback must not resurrect them
    let mut candidates: Vec<OptionContract> = (0..12)
        .map(|i| candidate("AAA", 100.0 + i as f64))
        .collect();
    for contract in &mut candidates {
        contract.volume = 0;
    }
    let engine = engine_with(
        ScanConfig::default(),
        drifting_bars(250, 0.003),
        candidates.clone(),
    );

    let outcome = engine.scan(candidates, HashMap::new()).await.unwrap();
    assert!(outcome.opportunities.is_empty());
    assert_eq!(outcome.summary.liquidity_rejected, 12);
    assert_eq!(outcome.summary.scored, 0);
}

#[tokio::test]
async fn test_per_symbol_cap_limits_concentration() {
    let candidates: Vec<OptionContract> = (0..10)
        .map(|i| candidate("AAA", 98.0 + i as f64))
        .collect();
    let mut config = ScanConfig::default();
    config.fallback.per_symbol_cap = 3;
    let engine = engine_with(config, drifting_bars(250, 0.003), candidates.clone());

    let outcome = engine.scan(candidates, HashMap::new()).await.unwrap();
    assert!(outcome.opportunities.len() <= 3);
}

#[tokio::test]
async fn test_expired_contract_becomes_error_entry() {
    let mut expired = candidate("AAA", 100.0);
    expired.expiration = Utc::now().date_naive() - Duration::days(1);
    let healthy = candidate("AAA", 102.0);
    let candidates = vec![expired, healthy];
    let engine = engine_with(
        ScanConfig::default(),
        drifting_bars(250, 0.003),
        candidates.clone(),
    );

    let outcome = engine.scan(candidates, HashMap::new()).await.unwrap();
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].reason.contains("expired"));
    // The healthy contract still scored
    assert_eq!(outcome.summary.scored, 1);
}

#[tokio::test]
async fn test_degraded_providers_still_produce_results() {
    trace_init();
    let candidates = vec![candidate("AAA", 100.0), candidate("AAA", 102.0)];
    let engine = OpportunityEngine::new(
        ScanConfig::default(),
        Arc::new(FailingProvider),
        Arc::new(FailingProvider),
        Arc::new(FailingProvider),
    );

    let outcome = engine.scan(candidates, HashMap::new()).await.unwrap();
    assert!(!outcome.opportunities.is_empty());
    for opportunity in &outcome.opportunities {
        assert!(opportunity
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::ProviderDegraded(_))));
        // No history means the backtest sample is structurally thin
        assert!(!opportunity.backtest.sufficient);
        assert!(!opportunity.historical_move.available);
    }
}

#[tokio::test]
async fn test_invalid_weighting_rejects_scan_before_work() {
    let mut config = ScanConfig::default();
    config.signals.skew_weight = 0.7; // 0.7 + 0.45 != 1.0
    let engine = engine_with(config, drifting_bars(250, 0.003), Vec::new());

    let error = engine.scan(vec![candidate("AAA", 100.0)], HashMap::new()).await.unwrap_err();
    assert!(matches!(error, EngineError::InvalidWeighting { .. }));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn test_supplied_greeks_survive_merge() {
    let mut contract = candidate("AAA", 100.0);
    contract.greeks = Some(optscreen::types::Greeks {
        delta: 0.61,
        gamma: 0.0,
        theta: -0.02,
        vega: 0.30,
    });
    let engine = engine_with(
        ScanConfig::default(),
        drifting_bars(250, 0.003),
        vec![contract.clone()],
    );

    let outcome = engine.scan(vec![contract], HashMap::new()).await.unwrap();
    let top = &outcome.opportunities[0];
    // Non-zero supplied fields kept, the zero gamma recomputed
    assert_eq!(top.greeks.delta, 0.61);
    assert!(top.greeks.gamma > 0.0);
    assert!(top.diagnostics.contains(&Diagnostic::GreeksRecomputed));
}

#[tokio::test]
async fn test_supplied_context_bypasses_context_provider() {
    trace_init();
    let candidates = vec![candidate("AAA", 100.0)];
    let engine = OpportunityEngine::new(
        ScanConfig::default(),
        Arc::new(FixtureHistory {
            bars: drifting_bars(250, 0.003),
        }),
        Arc::new(FixtureChains {
            chain: candidates.clone(),
        }),
        Arc::new(FailingProvider), // context provider is down
    );

    let mut contexts = HashMap::new();
    contexts.insert(
        "AAA".to_string(),
        MarketContext {
            symbol: "AAA".to_string(),
            underlying_price: 100.0,
            volume: 2_000_000,
            avg_volume: 1_500_000,
            realized_volatility: 0.22,
            implied_volatility: 0.25,
            recent_price_change_pct: 0.01,
            news: Vec::new(),
            trend: TrendBias::Bullish,
        },
    );

    let outcome = engine.scan(candidates, contexts).await.unwrap();
    assert!(!outcome.opportunities.is_empty());
    for opportunity in &outcome.opportunities {
        assert!(!opportunity
            .diagnostics
            .contains(&Diagnostic::ProviderDegraded("market_context".to_string())));
    }
}

#[tokio::test]
async fn test_large_batch_mixes_admitted_and_backfilled() {
    // 90 liquid candidates: three near-the-money strikes with a strong
    // realized record, the rest far OTM with no edge
    let mut candidates = Vec::new();
    for (i, symbol) in ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"].iter().enumerate() {
        let strikes: Vec<f64> = if i == 0 {
            let mut s: Vec<f64> = vec![100.0, 101.0, 102.0];
            s.extend((0..12).map(|j| 140.0 + j as f64));
            s
        } else {
            (0..15).map(|j| 140.0 + j as f64).collect()
        };
        for strike in strikes {
            candidates.push(candidate(symbol, strike));
        }
    }
    assert_eq!(candidates.len(), 90);

    let engine = engine_with(
        ScanConfig::default(),
        drifting_bars(250, 0.003),
        candidates.clone(),
    );
    let outcome = engine.scan(candidates, HashMap::new()).await.unwrap();

    // Strict/override admissions fall short of the minimum, so the pipeline
    // backfills the ranked pool up to exactly min_results
    assert_eq!(outcome.opportunities.len(), 10);
    assert_eq!(outcome.summary.strict_admitted, 3);
    assert_eq!(outcome.summary.backfilled, 7);
    let tagged = outcome
        .opportunities
        .iter()
        .filter(|o| o.is_fallback())
        .count();
    assert_eq!(tagged, 7);
    // The strong strikes outrank every backfilled entry
    for opportunity in outcome.opportunities.iter().take(3) {
        assert!(!opportunity.is_fallback());
    }
}

#[tokio::test]
async fn test_scored_opportunity_round_trips_through_json() {
    // Results are handed to an orchestrator as JSON; the full record must
    // survive serialization. The chain carries a put so the call/put volume
    // ratio stays finite.
    let call = candidate("AAA", 100.0);
    let mut put = candidate("AAA", 95.0);
    put.option_type = OptionType::Put;
    let engine = engine_with(
        ScanConfig::default(),
        drifting_bars(250, 0.003),
        vec![call.clone(), put],
    );

    let outcome = engine.scan(vec![call], HashMap::new()).await.unwrap();
    let top = &outcome.opportunities[0];
    let json = serde_json::to_string(top).unwrap();
    let parsed: optscreen::types::ScoredOpportunity = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.contract.symbol, top.contract.symbol);
    assert_eq!(parsed.composite_score, top.composite_score);
    assert_eq!(parsed.risk_level, top.risk_level);
    assert_eq!(parsed.backtest.trade_count, top.backtest.trade_count);
}
