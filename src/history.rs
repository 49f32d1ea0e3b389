//! Historical Move Analyzer - empirical move frequencies over price history
//!
//! Measures how often the underlying's trailing return over any horizon-day
//! window met a target move, using overlapping windows across the lookback
//! period. Reports "touch" (any-point extremum reached the target inside the
//! window) and "finish" (close at window end reached it) probabilities, each
//! with a Wilson binomial confidence interval, plus the most recent
//! qualifying occurrences for human audit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::OhlcBar;

/// Minimum overlapping windows before any estimate is reported at all
pub const MIN_WINDOWS: usize = 10;

/// Windows below this count are labeled low-confidence
pub const LOW_CONFIDENCE_WINDOWS: usize = 20;

/// Windows at or above this count are labeled high-confidence
pub const HIGH_CONFIDENCE_WINDOWS: usize = 50;

/// z-score for the 95% Wilson interval
const WILSON_Z: f64 = 1.96;

/// How many recent qualifying occurrences to keep for transparency
const MAX_RECENT_OCCURRENCES: usize = 5;

/// Direction of the target move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Query for the analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalMoveQuery {
    pub symbol: String,
    /// Target move as a positive fraction (0.05 = 5%)
    pub target_move_pct: f64,
    pub direction: MoveDirection,
    /// Window length in trading days
    pub horizon_days: usize,
    /// Lookback period in trading days
    pub lookback_days: usize,
}

impl HistoricalMoveQuery {
    pub fn new(symbol: &str, target_move_pct: f64, direction: MoveDirection, horizon_days: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            target_move_pct,
            direction,
            horizon_days,
            lookback_days: 365,
        }
    }
}

/// Empirical probability with its Wilson 95% confidence interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbabilityEstimate {
    pub probability: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub occurrences: usize,
}

/// Sample-quality label from window count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleQuality {
    Low,
    Medium,
    High,
}

impl SampleQuality {
    pub fn from_windows(windows: usize) -> Self {
        if windows >= HIGH_CONFIDENCE_WINDOWS {
            SampleQuality::High
        } else if windows >= LOW_CONFIDENCE_WINDOWS {
            SampleQuality::Medium
        } else {
            SampleQuality::Low
        }
    }
}

/// One qualifying historical occurrence, for the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOccurrence {
    /// Window end date
    pub date: NaiveDate,
    /// Realized close-to-close move over the window, as a fraction
    pub realized_move_pct: f64,
}

/// Analyzer output for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalMoveContext {
    pub symbol: String,
    pub target_move_pct: f64,
    pub direction: MoveDirection,
    pub horizon_days: usize,
    pub lookback_days: usize,
    /// False when the window count is too small for a meaningful estimate
    pub available: bool,
    pub window_count: usize,
    /// Any-point-in-window probability; None when unavailable
    pub touch: Option<ProbabilityEstimate>,
    /// Window-end close probability; None when unavailable
    pub finish: Option<ProbabilityEstimate>,
    pub quality: SampleQuality,
    /// Most recent qualifying finishes (date + realized move)
    pub recent_occurrences: Vec<MoveOccurrence>,
}

impl HistoricalMoveContext {
    /// Unavailable result for a query that could not be served (thin history
    /// or a degraded provider). Carries the query echo for the audit trail.
    pub fn unavailable(query: &HistoricalMoveQuery, window_count: usize) -> Self {
        Self {
            symbol: query.symbol.clone(),
            target_move_pct: query.target_move_pct,
            direction: query.direction,
            horizon_days: query.horizon_days,
            lookback_days: query.lookback_days,
            available: false,
            window_count,
            touch: None,
            finish: None,
            quality: SampleQuality::Low,
            recent_occurrences: Vec::new(),
        }
    }
}

/// Wilson score interval for k successes in n trials
fn wilson_interval(successes: usize, trials: usize) -> (f64, f64) {
    if trials == 0 {
        return (0.0, 0.0);
    }
    let n = trials as f64;
    let p = successes as f64 / n;
    let z = WILSON_Z;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let half = z * ((p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt()) / denom;
    ((center - half).max(0.0), (center + half).min(1.0))
}

/// Compute empirical touch/finish probabilities for a query over daily bars.
///
/// Bars must be in ascending date order; only the trailing `lookback_days`
/// bars are considered. Windows overlap: every bar with a full horizon ahead
/// of it starts one.
pub fn analyze(query: &HistoricalMoveQuery, bars: &[OhlcBar]) -> HistoricalMoveContext {
    let start = bars.len().saturating_sub(query.lookback_days);
    let bars = &bars[start..];

    if query.horizon_days == 0 || bars.len() <= query.horizon_days {
        return HistoricalMoveContext::unavailable(query, 0);
    }

    let window_count = bars.len() - query.horizon_days;
    if window_count < MIN_WINDOWS {
        debug!(
            symbol = %query.symbol,
            window_count,
            "historical move analyzer: sample below minimum"
        );
        return HistoricalMoveContext::unavailable(query, window_count);
    }

    let mut touch_hits = 0usize;
    let mut finish_hits = 0usize;
    let mut occurrences: Vec<MoveOccurrence> = Vec::new();

    for i in 0..window_count {
        let entry = bars[i].close;
        if entry <= 0.0 {
            continue;
        }
        let window = &bars[i + 1..=i + query.horizon_days];
        let end = &bars[i + query.horizon_days];

        let touched = match query.direction {
            MoveDirection::Up => {
                let target = entry * (1.0 + query.target_move_pct);
                window.iter().any(|b| b.high >= target)
            }
            MoveDirection::Down => {
                let target = entry * (1.0 - query.target_move_pct);
                window.iter().any(|b| b.low <= target)
            }
        };
        let realized = (end.close - entry) / entry;
        let finished = match query.direction {
            MoveDirection::Up => realized >= query.target_move_pct,
            MoveDirection::Down => realized <= -query.target_move_pct,
        };

        if touched {
            touch_hits += 1;
        }
        if finished {
            finish_hits += 1;
            occurrences.push(MoveOccurrence {
                date: end.date,
                realized_move_pct: realized,
            });
        }
    }

    let estimate = |hits: usize| {
        let (lo, hi) = wilson_interval(hits, window_count);
        ProbabilityEstimate {
            probability: hits as f64 / window_count as f64,
            ci_low: lo,
            ci_high: hi,
            occurrences: hits,
        }
    };

    // Keep only the most recent qualifying finishes
    let recent = occurrences
        .into_iter()
        .rev()
        .take(MAX_RECENT_OCCURRENCES)
        .collect();

    HistoricalMoveContext {
        symbol: query.symbol.clone(),
        target_move_pct: query.target_move_pct,
        direction: query.direction,
        horizon_days: query.horizon_days,
        lookback_days: query.lookback_days,
        available: true,
        window_count,
        touch: Some(estimate(touch_hits)),
        finish: Some(estimate(finish_hits)),
        quality: SampleQuality::from_windows(window_count),
        recent_occurrences: recent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Daily bars with close drifting `daily_return` per bar
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

    #[test]
    fn test_steady_uptrend_finishes_target() {
        // 1% per day for 120 days; a 2% up move over 3 days always finishes
        let bars = drifting_bars(120, 0.01);
        let query = HistoricalMoveQuery::new("TEST", 0.02, MoveDirection::Up, 3);
        let ctx = analyze(&query, &bars);
        assert!(ctx.available);
        let finish = ctx.finish.unwrap();
        assert_eq!(finish.probability, 1.0);
        let touch = ctx.touch.unwrap();
        assert!(touch.probability >= finish.probability);
        assert_eq!(ctx.quality, SampleQuality::High);
        assert!(!ctx.recent_occurrences.is_empty());
        assert!(ctx.recent_occurrences.len() <= 5);
    }

    #[test]
    fn test_uptrend_never_finishes_down_target() {
        let bars = drifting_bars(120, 0.01);
        let query = HistoricalMoveQuery::new("TEST", 0.02, MoveDirection::Down, 3);
        let ctx = analyze(&query, &bars);
        assert!(ctx.available);
        assert_eq!(ctx.finish.unwrap().probability, 0.0);
        assert!(ctx.recent_occurrences.is_empty());
    }

    #[test]
    fn test_thin_history_unavailable() {
        let bars = drifting_bars(12, 0.01);
        let query = HistoricalMoveQuery::new("TEST", 0.02, MoveDirection::Up, 5);
        let ctx = analyze(&query, &bars);
        // 7 windows < MIN_WINDOWS
        assert!(!ctx.available);
        assert!(ctx.touch.is_none());
        assert!(ctx.finish.is_none());
    }

    #[test]
    fn test_lookback_truncates() {
        let bars = drifting_bars(500, 0.001);
        let mut query = HistoricalMoveQuery::new("TEST", 0.01, MoveDirection::Up, 5);
        query.lookback_days = 100;
        let ctx = analyze(&query, &bars);
        assert_eq!(ctx.window_count, 95);
    }

    #[test]
    fn test_wilson_interval_brackets_probability() {
        let (lo, hi) = wilson_interval(30, 100);
        assert!(lo < 0.30 && 0.30 < hi);
        assert!(lo > 0.0 && hi < 1.0);
    }

    #[test]
    fn test_wilson_interval_edge_counts() {
        let (lo, hi) = wilson_interval(0, 50);
        assert_eq!(lo, 0.0);
        assert!(hi > 0.0 && hi < 0.2);
        let (lo, hi) = wilson_interval(50, 50);
        assert!(lo > 0.8 && lo < 1.0);
        assert_eq!(hi, 1.0);
    }

    #[test]
    fn test_quality_tiers() {
        assert_eq!(SampleQuality::from_windows(10), SampleQuality::Low);
        assert_eq!(SampleQuality::from_windows(20), SampleQuality::Medium);
        assert_eq!(SampleQuality::from_windows(49), SampleQuality::Medium);
        assert_eq!(SampleQuality::from_windows(50), SampleQuality::High);
    }
}
