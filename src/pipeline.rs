//! Opportunity scanning pipeline
//!
//! Orchestrates one scan cycle over a batch of candidate contracts:
//!
//! 1. Hard liquidity gate (never relaxed)
//! 2. Per-symbol market data assembly, one fetch per underlying
//! 3. Scoring: Greeks, probability of profit, directional bias, historical
//!    moves, backtest, Kelly sizing, composite score
//! 4. Institutional-quality filter with a strong-backtest override table
//! 5. Per-symbol diversification cap, then the minimum-count fallback
//!    backfill with explicit shortfall tags
//!
//! Failures are isolated: a contract that cannot be evaluated becomes an
//! error entry, a degraded provider becomes a diagnostic, and only a
//! malformed configuration rejects the whole scan.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::{self, BacktestResult, CandidateSetup, ConfidenceTier};
use crate::config::{InstitutionalConfig, LiquidityConfig, ScanConfig};
use crate::error::EngineError;
use crate::history::{self, HistoricalMoveContext, HistoricalMoveQuery, MoveDirection};
use crate::pricing;
use crate::providers::{MarketContextProvider, OptionsChainProvider, PriceHistoryProvider};
use crate::signals::{self, AggregatedBias, SignalDirection};
use crate::sizing;
use crate::types::{
    Diagnostic, EvaluationError, MarketContext, OhlcBar, OptionContract, OptionType, RiskLevel,
    ScoredOpportunity, ShortfallReason,
};

/// Neutral prior used for the backtest score component when the matched
/// sample is too thin to mean anything
const BACKTEST_NEUTRAL_COMPONENT: f64 = 40.0;

/// Counters describing what one scan cycle did
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub candidates: usize,
    pub liquidity_rejected: usize,
    pub scored: usize,
    pub strict_admitted: usize,
    pub backfilled: usize,
}

/// Result of one scan cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Admitted opportunities, best composite score first
    pub opportunities: Vec<ScoredOpportunity>,
    /// Candidates that could not be evaluated at all
    pub errors: Vec<EvaluationError>,
    pub summary: ScanSummary,
}

/// The scanning engine: providers plus configuration
pub struct OpportunityEngine {
    config: ScanConfig,
    history: Arc<dyn PriceHistoryProvider>,
    chains: Arc<dyn OptionsChainProvider>,
    contexts: Arc<dyn MarketContextProvider>,
}

/// Symbol-level inputs assembled once and shared by every contract of the
/// underlying
struct SymbolInputs {
    bias: AggregatedBias,
    bars: Option<Vec<OhlcBar>>,
    diagnostics: Vec<Diagnostic>,
}

impl OpportunityEngine {
    pub fn new(
        config: ScanConfig,
        history: Arc<dyn PriceHistoryProvider>,
        chains: Arc<dyn OptionsChainProvider>,
        contexts: Arc<dyn MarketContextProvider>,
    ) -> Self {
        Self {
            config,
            history,
            chains,
            contexts,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one scan cycle over a batch of candidate contracts.
    ///
    /// `contexts` carries caller-supplied market snapshots keyed by symbol;
    /// symbols without one get a context assembled from the providers.
    /// Only configuration errors abort; every other failure degrades to an
    /// error entry or a diagnostic on the affected contract.
    pub async fn scan(
        &self,
        candidates: Vec<OptionContract>,
        mut contexts: HashMap<String, MarketContext>,
    ) -> Result<ScanOutcome, EngineError> {
        self.config.validate()?;
        let now = Utc::now();
        let total = candidates.len();
        info!(candidates = total, config = %self.config.digest(), "starting scan cycle");

        // Stage 1: the liquidity gate is a hard filter, applied before any
        // scoring and never relaxed by the fallback
        let mut liquid: Vec<OptionContract> = Vec::with_capacity(total);
        let mut liquidity_rejected = 0usize;
        for contract in candidates {
            if passes_liquidity(&contract, &self.config.liquidity) {
                liquid.push(contract);
            } else {
                debug!(
                    symbol = %contract.symbol,
                    strike = contract.strike,
                    "liquidity gate rejected contract"
                );
                liquidity_rejected += 1;
            }
        }

        // Stage 2 + 3: group by underlying so market data is fetched once per
        // symbol, then score every surviving contract
        let mut by_symbol: BTreeMap<String, Vec<OptionContract>> = BTreeMap::new();
        for contract in liquid {
            by_symbol.entry(contract.symbol.clone()).or_default().push(contract);
        }

        let evaluations = join_all(by_symbol.into_iter().map(|(symbol, contracts)| {
            let supplied = contexts.remove(&symbol);
            self.evaluate_symbol(symbol, contracts, supplied, now)
        }))
        .await;

        let mut scored: Vec<ScoredOpportunity> = Vec::new();
        let mut errors: Vec<EvaluationError> = Vec::new();
        for (mut symbol_scored, mut symbol_errors) in evaluations {
            scored.append(&mut symbol_scored);
            errors.append(&mut symbol_errors);
        }
        let scored_count = scored.len();

        // Rank before filtering so the cap and backfill both see the same
        // composite order
        scored.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));

        // Stage 4: institutional filter with the override table, capped per
        // symbol as it admits
        let cap = self.config.fallback.per_symbol_cap;
        let mut per_symbol: HashMap<String, usize> = HashMap::new();
        let mut admitted: Vec<ScoredOpportunity> = Vec::new();
        let mut leftovers: Vec<ScoredOpportunity> = Vec::new();
        for opportunity in scored {
            let count = per_symbol
                .entry(opportunity.contract.symbol.clone())
                .or_insert(0);
            if admits(&opportunity, &self.config.institutional) && *count < cap {
                *count += 1;
                admitted.push(opportunity);
            } else {
                leftovers.push(opportunity);
            }
        }
        let strict_admitted = admitted.len();

        // Stage 5: fallback guarantee. Backfill the best remaining scored
        // contracts, tagged with the thresholds they fell short of, still
        // honoring the per-symbol cap.
        let mut backfilled = 0usize;
        for mut opportunity in leftovers {
            if admitted.len() >= self.config.fallback.min_results {
                break;
            }
            let count = per_symbol
                .entry(opportunity.contract.symbol.clone())
                .or_insert(0);
            if *count >= cap {
                continue;
            }
            *count += 1;
            opportunity.fallback_shortfalls =
                shortfalls(&opportunity, &self.config.institutional);
            admitted.push(opportunity);
            backfilled += 1;
        }

        admitted.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));

        let summary = ScanSummary {
            candidates: total,
            liquidity_rejected,
            scored: scored_count,
            strict_admitted,
            backfilled,
        };
        info!(
            candidates = summary.candidates,
            liquidity_rejected = summary.liquidity_rejected,
            scored = summary.scored,
            strict_admitted = summary.strict_admitted,
            backfilled = summary.backfilled,
            errors = errors.len(),
            "scan cycle complete"
        );

        Ok(ScanOutcome {
            opportunities: admitted,
            errors,
            summary,
        })
    }

    /// Assemble symbol-level inputs and score each contract of one underlying
    async fn evaluate_symbol(
        &self,
        symbol: String,
        contracts: Vec<OptionContract>,
        supplied_context: Option<MarketContext>,
        now: DateTime<Utc>,
    ) -> (Vec<ScoredOpportunity>, Vec<EvaluationError>) {
        let mut errors: Vec<EvaluationError> = Vec::new();

        let spot = contracts
            .iter()
            .map(|c| c.underlying_price)
            .find(|p| *p > 0.0);
        let Some(spot) = spot else {
            let unavailable = EngineError::DataUnavailable {
                symbol: symbol.clone(),
                reason: "no spot price in any candidate".to_string(),
            };
            errors.push(EvaluationError {
                symbol: symbol.clone(),
                reason: unavailable.to_string(),
            });
            return (Vec::new(), errors);
        };

        let inputs = self
            .assemble_inputs(&symbol, &contracts, spot, supplied_context, now)
            .await;

        let mut scored = Vec::with_capacity(contracts.len());
        for contract in contracts {
            match self.score_contract(&contract, &inputs, now) {
                Ok(opportunity) => scored.push(opportunity),
                Err(error) => {
                    debug!(symbol = %error.symbol, reason = %error.reason, "contract not evaluable");
                    errors.push(error);
                }
            }
        }
        (scored, errors)
    }

    /// Fetch market context, chain snapshot, and price history for one
    /// underlying, degrading per collaborator on error or timeout
    async fn assemble_inputs(
        &self,
        symbol: &str,
        contracts: &[OptionContract],
        spot: f64,
        supplied_context: Option<MarketContext>,
        now: DateTime<Utc>,
    ) -> SymbolInputs {
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        let bars = self
            .with_timeout(
                symbol,
                "price_history",
                self.history.price_history(symbol, self.config.lookback_days),
            )
            .await
            .filter(|bars: &Vec<OhlcBar>| !bars.is_empty());
        if bars.is_none() {
            diagnostics.push(Diagnostic::ProviderDegraded("price_history".to_string()));
        }

        let provided = match supplied_context {
            Some(context) => Some(context),
            None => {
                self.with_timeout(symbol, "market_context", self.contexts.market_context(symbol))
                    .await
            }
        };
        let mut context = match provided {
            Some(context) => context,
            None => {
                diagnostics.push(Diagnostic::ProviderDegraded("market_context".to_string()));
                context_from_bars(symbol, spot, bars.as_deref())
            }
        };
        if context.news.is_empty() {
            if let Some(news) = self
                .with_timeout(symbol, "news", self.contexts.recent_news(symbol))
                .await
            {
                context.news = news;
            }
        }

        // A missing chain snapshot degrades to the candidate set itself; the
        // detectors then see a partial chain rather than nothing
        let chain = match self
            .with_timeout(symbol, "options_chain", self.chains.options_chain(symbol))
            .await
        {
            Some(chain) if !chain.is_empty() => chain,
            _ => {
                diagnostics.push(Diagnostic::ProviderDegraded("options_chain".to_string()));
                contracts.to_vec()
            }
        };

        let bias = match signals::evaluate_bias(&chain, &context, &self.config.signals, now) {
            Ok(bias) => bias,
            Err(error) => {
                warn!(symbol, %error, "signal evaluation failed; neutral bias");
                AggregatedBias::unavailable(&error.to_string())
            }
        };

        SymbolInputs {
            bias,
            bars,
            diagnostics,
        }
    }

    /// Score one liquidity-surviving contract end to end
    fn score_contract(
        &self,
        contract: &OptionContract,
        inputs: &SymbolInputs,
        now: DateTime<Utc>,
    ) -> Result<ScoredOpportunity, EvaluationError> {
        let rate = self.config.signals.risk_free_rate;
        let mut diagnostics = inputs.diagnostics.clone();

        let computation =
            pricing::greeks_for_contract(contract, now, rate).map_err(|error| EvaluationError {
                symbol: contract.symbol.clone(),
                reason: error.to_string(),
            })?;
        if computation.volatility_floored {
            diagnostics.push(Diagnostic::VolatilityFloored);
        }
        let (greeks, recomputed) = pricing::merge_greeks(contract.greeks.as_ref(), &computation.greeks);
        if recomputed {
            diagnostics.push(Diagnostic::GreeksRecomputed);
        }

        let premium = contract.mid_price();
        if premium <= 0.0 {
            return Err(EvaluationError {
                symbol: contract.symbol.clone(),
                reason: format!("no usable premium for strike {}", contract.strike),
            });
        }

        let time_to_expiry = pricing::time_to_expiry_years(contract.expiration, now);
        let (probability_of_profit, clamped) = pricing::probability_of_profit(
            contract.option_type,
            contract.underlying_price,
            contract.strike,
            premium,
            contract.implied_volatility,
            time_to_expiry,
            rate,
        );
        if clamped {
            diagnostics.push(Diagnostic::ProbabilityClamped);
        }

        // Positive because greeks_for_contract already rejected expiry <= now
        let dte = contract.days_to_expiration(now).max(1) as usize;

        // Required move to breakeven drives the historical query
        let spot = contract.underlying_price;
        let (target_move, direction) = match contract.option_type {
            OptionType::Call => (((contract.strike + premium - spot) / spot).max(0.0), MoveDirection::Up),
            OptionType::Put => (((spot - (contract.strike - premium)) / spot).max(0.0), MoveDirection::Down),
        };
        let mut query = HistoricalMoveQuery::new(&contract.symbol, target_move, direction, dte);
        query.lookback_days = self.config.lookback_days;
        let historical_move = match &inputs.bars {
            Some(bars) => history::analyze(&query, bars),
            None => HistoricalMoveContext::unavailable(&query, 0),
        };

        let setup = CandidateSetup::from_contract(contract, dte);
        let backtest = match &inputs.bars {
            Some(bars) => backtest::run(&setup, bars, &self.config.backtest, rate),
            None => BacktestResult::insufficient(
                backtest::pattern_id(&setup, &self.config.backtest),
                0,
            ),
        };

        // Sizing inputs: blend the model probability with realized history
        // when the backtest sample is meaningful; otherwise the risk-neutral
        // payoff ratio keeps the recommendation at zero edge
        let win_probability = if backtest.sufficient {
            0.5 * probability_of_profit + 0.5 * backtest.win_rate
        } else {
            probability_of_profit
        };
        let payoff_ratio = if backtest.sufficient && backtest.avg_win > 0.0 && backtest.avg_loss > 0.0
        {
            backtest.avg_win / backtest.avg_loss
        } else if probability_of_profit > 0.0 {
            (1.0 - probability_of_profit) / probability_of_profit
        } else {
            0.0
        };
        let sizing = sizing::recommend(
            win_probability,
            payoff_ratio,
            self.config.default_risk_tier,
            &self.config.kelly,
        );

        let composite_score = self.composite_score(
            &backtest,
            &inputs.bias,
            contract.option_type,
            probability_of_profit,
            &greeks,
            premium,
        );
        let risk_level = classify_risk(probability_of_profit, sizing.negative_edge);

        Ok(ScoredOpportunity {
            contract: contract.clone(),
            greeks,
            bias: inputs.bias.clone(),
            backtest,
            historical_move,
            sizing,
            probability_of_profit,
            composite_score,
            risk_level,
            fallback_shortfalls: Vec::new(),
            diagnostics,
        })
    }

    /// Weighted composite in [0,100]
    fn composite_score(
        &self,
        backtest: &BacktestResult,
        bias: &AggregatedBias,
        option_type: OptionType,
        probability_of_profit: f64,
        greeks: &crate::types::Greeks,
        premium: f64,
    ) -> f64 {
        let weights = &self.config.score;
        let backtest_component = backtest_component(backtest);
        let bias_component = bias_component(bias, option_type);
        let probability_component = probability_of_profit * 100.0;
        let risk_adjusted_component = risk_adjusted_component(greeks, premium);

        (weights.backtest * backtest_component
            + weights.bias * bias_component
            + weights.probability * probability_component
            + weights.risk_adjusted * risk_adjusted_component)
            .clamp(0.0, 100.0)
    }

    /// Run a provider call under the configured timeout, flattening timeout
    /// and error into a degraded `None`
    async fn with_timeout<T>(
        &self,
        symbol: &str,
        provider: &str,
        call: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Option<T> {
        let budget = Duration::from_millis(self.config.provider_timeout_ms);
        match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                warn!(symbol, provider, %error, "provider call failed; degrading");
                None
            }
            Err(_) => {
                warn!(symbol, provider, timeout_ms = self.config.provider_timeout_ms, "provider call timed out; degrading");
                None
            }
        }
    }
}

/// Trading days per year for annualizing realized volatility
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Bars in the recent price-change confirmation window
const RECENT_CHANGE_WINDOW: usize = 5;

/// Assemble a usable market context from price history alone, for symbols
/// where no context was supplied and the provider is down
fn context_from_bars(symbol: &str, spot: f64, bars: Option<&[OhlcBar]>) -> MarketContext {
    let mut context = MarketContext::degraded(symbol, spot);
    let Some(bars) = bars.filter(|b| b.len() >= 2) else {
        return context;
    };

    let returns: Vec<f64> = bars
        .windows(2)
        .filter(|w| w[0].close > 0.0 && w[1].close > 0.0)
        .map(|w| (w[1].close / w[0].close).ln())
        .collect();
    if returns.len() >= 2 {
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        context.realized_volatility = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
    }

    context.avg_volume =
        (bars.iter().map(|b| b.volume).sum::<u64>() as f64 / bars.len() as f64) as u64;
    context.volume = bars[bars.len() - 1].volume;

    let window_start = bars.len().saturating_sub(RECENT_CHANGE_WINDOW + 1);
    let anchor = bars[window_start].close;
    let last = bars[bars.len() - 1].close;
    if anchor > 0.0 {
        context.recent_price_change_pct = (last - anchor) / anchor;
    }

    context
}

/// Hard liquidity gate; every bound must hold
fn passes_liquidity(contract: &OptionContract, config: &LiquidityConfig) -> bool {
    contract.volume >= config.min_volume
        && contract.open_interest >= config.min_open_interest
        && contract.mid_price() >= config.min_price
        && contract.spread_pct() <= config.max_spread_pct
}

/// Strict institutional thresholds
fn passes_strict(opportunity: &ScoredOpportunity, config: &InstitutionalConfig) -> bool {
    opportunity.probability_of_profit >= config.min_probability_of_profit
        && opportunity.composite_score >= config.min_composite_score
        && opportunity.greeks.delta.abs() >= config.min_delta_magnitude
}

/// A sufficiently strong backtest can admit a candidate past the strict
/// thresholds; the table rows are (min trades, min win rate)
fn passes_override(opportunity: &ScoredOpportunity, config: &InstitutionalConfig) -> bool {
    opportunity.backtest.sufficient
        && config.overrides.iter().any(|row| {
            opportunity.backtest.trade_count >= row.min_trades
                && opportunity.backtest.win_rate >= row.min_win_rate
        })
}

fn admits(opportunity: &ScoredOpportunity, config: &InstitutionalConfig) -> bool {
    passes_strict(opportunity, config) || passes_override(opportunity, config)
}

/// Which strict thresholds a backfilled candidate fell short of
fn shortfalls(
    opportunity: &ScoredOpportunity,
    config: &InstitutionalConfig,
) -> Vec<ShortfallReason> {
    let mut reasons = Vec::new();
    if opportunity.probability_of_profit < config.min_probability_of_profit {
        reasons.push(ShortfallReason::BelowProbabilityOfProfit);
    }
    if opportunity.composite_score < config.min_composite_score {
        reasons.push(ShortfallReason::BelowCompositeScore);
    }
    if opportunity.greeks.delta.abs() < config.min_delta_magnitude {
        reasons.push(ShortfallReason::BelowDeltaMagnitude);
    }
    reasons
}

/// Backtest score component: realized win rate scaled by sample confidence,
/// with a small Sharpe bonus; a thin sample contributes a neutral prior
fn backtest_component(backtest: &BacktestResult) -> f64 {
    if !backtest.sufficient {
        return BACKTEST_NEUTRAL_COMPONENT;
    }
    let sample_factor = match backtest.confidence {
        ConfidenceTier::High => 1.0,
        ConfidenceTier::Medium => 0.9,
        ConfidenceTier::Low => 0.7,
        ConfidenceTier::Insufficient => 0.0,
    };
    let sharpe_bonus = backtest
        .sharpe_ratio
        .map(|s| (s.max(0.0) * 10.0).min(10.0))
        .unwrap_or(0.0);
    (backtest.win_rate * 100.0 * sample_factor + sharpe_bonus).clamp(0.0, 100.0)
}

/// Bias score component: directional agreement with the contract.
/// Aligned bias pushes above 50, opposed bias below, neutral contributes 50.
fn bias_component(bias: &AggregatedBias, option_type: OptionType) -> f64 {
    let aligned = matches!(
        (bias.direction, option_type),
        (SignalDirection::Bullish, OptionType::Call) | (SignalDirection::Bearish, OptionType::Put)
    );
    match bias.direction {
        SignalDirection::Neutral => 50.0,
        _ if aligned => 50.0 + bias.confidence / 2.0,
        _ => 50.0 - bias.confidence / 2.0,
    }
}

/// Risk-adjusted component: reward directional exposure, penalize daily
/// theta bleed relative to the premium paid
fn risk_adjusted_component(greeks: &crate::types::Greeks, premium: f64) -> f64 {
    let delta_term = (greeks.delta.abs() * 100.0).min(100.0);
    let bleed_pct = if premium > 0.0 {
        (greeks.theta.abs() / premium) * 100.0
    } else {
        0.0
    };
    (delta_term - 2.0 * bleed_pct).clamp(0.0, 100.0)
}

/// Risk classification from the profit probability; a negative sizing edge
/// always reads aggressive
fn classify_risk(probability_of_profit: f64, negative_edge: bool) -> RiskLevel {
    if negative_edge {
        return RiskLevel::Aggressive;
    }
    if probability_of_profit >= 0.75 {
        RiskLevel::CapitalPreservation
    } else if probability_of_profit >= 0.60 {
        RiskLevel::Conservative
    } else if probability_of_profit >= 0.45 {
        RiskLevel::Balanced
    } else {
        RiskLevel::Aggressive
    }
}
