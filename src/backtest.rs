//! Backtest Validator - realized outcomes of historically similar setups
//!
//! Projects the candidate's pattern (option type, moneyness ratio,
//! days-to-expiration) onto historical entry points and simulates what the
//! trade would have returned at each. The entry premium is always the
//! pricing model's theoretical value at that point, never a historical
//! premium. Aggregates win rate, return distribution, Sharpe, and max
//! drawdown over the ordered outcome series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pricing::{self, PricingInputs, DAYS_PER_YEAR};
use crate::types::{OhlcBar, OptionContract, OptionType};

/// Below this many matched setups the result is marked insufficient
/// (still returned, never an error)
pub const MIN_MATCHES: usize = 5;

/// Simulated premiums below this are treated as untradeable and skipped
const MIN_SIMULATED_PREMIUM: f64 = 0.01;

/// How many recent example trades to carry on the result
const MAX_RECENT_TRADES: usize = 3;

/// Candidate trade setup to validate against history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSetup {
    pub option_type: OptionType,
    /// Strike distance from spot as a fraction of spot; the simulation
    /// projects this ratio onto every historical entry point
    pub moneyness: f64,
    pub days_to_expiration: usize,
    pub implied_volatility: f64,
}

impl CandidateSetup {
    /// Snapshot a live contract for validation
    pub fn from_contract(contract: &OptionContract, days_to_expiration: usize) -> Self {
        Self {
            option_type: contract.option_type,
            moneyness: contract.moneyness(),
            days_to_expiration,
            implied_volatility: contract.implied_volatility,
        }
    }
}

/// Similarity bands around the candidate; tunable configuration, not a
/// hidden constant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityBands {
    /// Moneyness bucket width used for pattern identity (fraction of spot)
    pub moneyness_band: f64,
    /// Tolerance on days-to-expiration; trailing entries with at least
    /// `dte - band` bars of history remaining still qualify
    pub dte_band_days: usize,
    /// Spacing between historical entries, to limit window overlap
    pub entry_stride_days: usize,
}

impl Default for SimilarityBands {
    fn default() -> Self {
        Self {
            moneyness_band: 0.05,
            dte_band_days: 5,
            entry_stride_days: 5,
        }
    }
}

/// One simulated historical trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_spot: f64,
    pub strike: f64,
    /// Theoretical entry premium from the pricing model
    pub premium: f64,
    pub terminal_spot: f64,
    /// Return net of premium, as a fraction of premium
    pub return_pct: f64,
    pub is_win: bool,
}

/// Confidence tier from matched-sample size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    /// Below the minimum match count; statistics are not meaningful
    Insufficient,
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn from_matches(count: usize) -> Self {
        if count < MIN_MATCHES {
            ConfidenceTier::Insufficient
        } else if count < 20 {
            ConfidenceTier::Low
        } else if count < 50 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::High
        }
    }
}

/// Aggregated backtest statistics for one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Bucketed pattern identity, e.g. "call_+5pct_30d"
    pub pattern_id: String,
    pub trade_count: usize,
    /// False when `trade_count < MIN_MATCHES`; statistics below are then
    /// carried for transparency but must not gate admission
    pub sufficient: bool,
    pub win_rate: f64,
    pub avg_return: f64,
    pub median_return: f64,
    pub best_return: f64,
    pub worst_return: f64,
    /// Mean return of winning trades (0 when there are none)
    pub avg_win: f64,
    /// Mean absolute return of losing trades (0 when there are none)
    pub avg_loss: f64,
    /// None when the series has fewer than 2 points or zero variance
    pub sharpe_ratio: Option<f64>,
    /// Peak-to-trough of the cumulative return series, as a positive fraction
    pub max_drawdown: f64,
    pub confidence: ConfidenceTier,
    /// Most recent simulated trades, for human audit
    pub recent_trades: Vec<SimulatedTrade>,
}

impl BacktestResult {
    /// Structured empty result when history could not be searched at all
    pub fn insufficient(pattern_id: String, trade_count: usize) -> Self {
        Self {
            pattern_id,
            trade_count,
            sufficient: false,
            win_rate: 0.0,
            avg_return: 0.0,
            median_return: 0.0,
            best_return: 0.0,
            worst_return: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            sharpe_ratio: None,
            max_drawdown: 0.0,
            confidence: ConfidenceTier::Insufficient,
            recent_trades: Vec::new(),
        }
    }
}

/// Bucketed pattern identity for a candidate under the configured bands
pub fn pattern_id(candidate: &CandidateSetup, bands: &SimilarityBands) -> String {
    let band = bands.moneyness_band.max(1e-6);
    let bucket = (candidate.moneyness / band).round() * band * 100.0;
    let dte_band = bands.dte_band_days.max(1);
    let dte_bucket =
        ((candidate.days_to_expiration as f64 / dte_band as f64).round() as usize) * dte_band;
    let kind = match candidate.option_type {
        OptionType::Call => "call",
        OptionType::Put => "put",
    };
    format!("{}_{:+.0}pct_{}d", kind, bucket, dte_bucket)
}

/// Search history for similar setups and simulate each trade's outcome.
///
/// Bars must be in ascending date order. Always returns a result object;
/// thin history yields `sufficient: false` rather than an error.
pub fn run(
    candidate: &CandidateSetup,
    bars: &[OhlcBar],
    bands: &SimilarityBands,
    risk_free_rate: f64,
) -> BacktestResult {
    let id = pattern_id(candidate, bands);
    let dte = candidate.days_to_expiration;
    let moneyness_ratio = 1.0 + candidate.moneyness;
    if dte == 0 || moneyness_ratio <= 0.0 || bars.len() <= dte {
        return BacktestResult::insufficient(id, 0);
    }

    let min_horizon = dte.saturating_sub(bands.dte_band_days).max(1);
    let stride = bands.entry_stride_days.max(1);

    let mut trades: Vec<SimulatedTrade> = Vec::new();
    let mut i = 0usize;
    while i < bars.len() {
        let remaining = bars.len() - 1 - i;
        if remaining < min_horizon {
            break;
        }
        let horizon = dte.min(remaining);
        let entry = &bars[i];
        let exit = &bars[i + horizon];
        i += stride;

        if entry.close <= 0.0 {
            continue;
        }
        let strike = entry.close * moneyness_ratio;
        let Ok(priced) = pricing::compute_greeks(&PricingInputs {
            option_type: candidate.option_type,
            spot: entry.close,
            strike,
            volatility: candidate.implied_volatility,
            time_to_expiry: horizon as f64 / DAYS_PER_YEAR,
            risk_free_rate,
        }) else {
            continue;
        };
        let premium = priced.price;
        if premium < MIN_SIMULATED_PREMIUM {
            continue;
        }

        let payoff = pricing::terminal_payoff(candidate.option_type, strike, exit.close);
        let net = payoff - premium;
        trades.push(SimulatedTrade {
            entry_date: entry.date,
            exit_date: exit.date,
            entry_spot: entry.close,
            strike,
            premium,
            terminal_spot: exit.close,
            return_pct: net / premium,
            is_win: net > 0.0,
        });
    }

    if trades.is_empty() {
        debug!(pattern = %id, "backtest validator: no simulatable setups");
        return BacktestResult::insufficient(id, 0);
    }

    aggregate(id, trades)
}

fn aggregate(pattern_id: String, trades: Vec<SimulatedTrade>) -> BacktestResult {
    let count = trades.len();
    let wins = trades.iter().filter(|t| t.is_win).count();
    let win_rate = wins as f64 / count as f64;

    let mut returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
    let avg_return = returns.iter().sum::<f64>() / count as f64;
    returns.sort_by(|a, b| a.total_cmp(b));
    let median_return = if count % 2 == 1 {
        returns[count / 2]
    } else {
        (returns[count / 2 - 1] + returns[count / 2]) / 2.0
    };
    let best_return = returns[count - 1];
    let worst_return = returns[0];

    let avg_win = if wins > 0 {
        trades
            .iter()
            .filter(|t| t.is_win)
            .map(|t| t.return_pct)
            .sum::<f64>()
            / wins as f64
    } else {
        0.0
    };
    let losses = count - wins;
    let avg_loss = if losses > 0 {
        trades
            .iter()
            .filter(|t| !t.is_win)
            .map(|t| t.return_pct.abs())
            .sum::<f64>()
            / losses as f64
    } else {
        0.0
    };

    // Per-trade Sharpe; undefined for degenerate series
    let sharpe_ratio = if count < 2 {
        None
    } else {
        let variance = trades
            .iter()
            .map(|t| (t.return_pct - avg_return).powi(2))
            .sum::<f64>()
            / count as f64;
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            Some(avg_return / std_dev)
        } else {
            None
        }
    };

    // Max drawdown over the ordered cumulative return series
    let mut cumulative = 0.0;
    let mut peak = 0.0f64;
    let mut max_drawdown = 0.0f64;
    for trade in &trades {
        cumulative += trade.return_pct;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    let recent_trades = trades
        .iter()
        .rev()
        .take(MAX_RECENT_TRADES)
        .cloned()
        .collect();

    BacktestResult {
        pattern_id,
        trade_count: count,
        sufficient: count >= MIN_MATCHES,
        win_rate,
        avg_return,
        median_return,
        best_return,
        worst_return,
        avg_win,
        avg_loss,
        sharpe_ratio,
        max_drawdown,
        confidence: ConfidenceTier::from_matches(count),
        recent_trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bars(count: usize, daily_return: f64) -> Vec<OhlcBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let mut close = 100.0;
        (0..count)
            .map(|i| {
                let open = close;
                close *= 1.0 + daily_return;
                OhlcBar {
                    date: start + Duration::days(i as i64),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 1_000_000,
                }
            })
            .collect()
    }

    fn atm_call(dte: usize) -> CandidateSetup {
        CandidateSetup {
            option_type: OptionType::Call,
            moneyness: 0.0,
            days_to_expiration: dte,
            implied_volatility: 0.25,
        }
    }

    #[test]
    fn test_uptrend_favors_calls() {
        let result = run(&atm_call(20), &bars(250, 0.005), &SimilarityBands::default(), 0.02);
        assert!(result.sufficient);
        assert!(result.trade_count >= MIN_MATCHES);
        assert!(result.win_rate > 0.8, "win rate {}", result.win_rate);
        assert!(result.avg_return > 0.0);
        assert!(result.avg_win > 0.0);
        assert!(result.sharpe_ratio.is_some());
    }

    #[test]
    fn test_downtrend_punishes_calls() {
        let result = run(&atm_call(20), &bars(250, -0.005), &SimilarityBands::default(), 0.02);
        assert!(result.sufficient);
        assert!(result.win_rate < 0.2, "win rate {}", result.win_rate);
        assert!(result.avg_return < 0.0);
        assert!(result.avg_loss > 0.0);
        assert!(result.max_drawdown > 0.0);
    }

    #[test]
    fn test_thin_history_marked_insufficient_not_error() {
        let result = run(&atm_call(20), &bars(30, 0.005), &SimilarityBands::default(), 0.02);
        assert!(!result.sufficient);
        assert_eq!(result.confidence, ConfidenceTier::Insufficient);
    }

    #[test]
    fn test_no_history_returns_structured_result() {
        let result = run(&atm_call(20), &[], &SimilarityBands::default(), 0.02);
        assert_eq!(result.trade_count, 0);
        assert!(!result.sufficient);
        assert!(result.sharpe_ratio.is_none());
    }

    #[test]
    fn test_pattern_id_buckets() {
        let candidate = CandidateSetup {
            option_type: OptionType::Call,
            moneyness: 0.05,
            days_to_expiration: 31,
            implied_volatility: 0.25,
        };
        let id = pattern_id(&candidate, &SimilarityBands::default());
        assert_eq!(id, "call_+5pct_30d");
    }

    #[test]
    fn test_setup_from_contract_uses_spot_relative_strike() {
        let contract = OptionContract {
            symbol: "TEST".to_string(),
            strike: 105.0,
            expiration: NaiveDate::from_ymd_opt(2027, 1, 15).unwrap(),
            option_type: OptionType::Call,
            last_price: 2.0,
            bid: 1.9,
            ask: 2.1,
            volume: 100,
            open_interest: 500,
            implied_volatility: 0.25,
            underlying_price: 100.0,
            greeks: None,
        };
        let setup = CandidateSetup::from_contract(&contract, 31);
        assert!((setup.moneyness - 0.05).abs() < 1e-12);
        assert_eq!(
            pattern_id(&setup, &SimilarityBands::default()),
            "call_+5pct_30d"
        );
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(ConfidenceTier::from_matches(4), ConfidenceTier::Insufficient);
        assert_eq!(ConfidenceTier::from_matches(5), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_matches(20), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_matches(50), ConfidenceTier::High);
    }

    #[test]
    fn test_recent_trades_capped() {
        let result = run(&atm_call(20), &bars(400, 0.004), &SimilarityBands::default(), 0.02);
        assert!(result.recent_trades.len() <= MAX_RECENT_TRADES);
        assert!(!result.recent_trades.is_empty());
    }

    #[test]
    fn test_zero_variance_series_has_no_sharpe() {
        let trades: Vec<SimulatedTrade> = (0..6)
            .map(|i| SimulatedTrade {
                entry_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap() + Duration::days(i),
                exit_date: NaiveDate::from_ymd_opt(2025, 2, 2).unwrap() + Duration::days(i),
                entry_spot: 100.0,
                strike: 100.0,
                premium: 1.0,
                terminal_spot: 101.0,
                return_pct: 0.5,
                is_win: true,
            })
            .collect();
        let result = aggregate("call_+0pct_20d".to_string(), trades);
        assert!(result.sharpe_ratio.is_none());
        assert_eq!(result.win_rate, 1.0);
    }
}
