//! Signal Aggregator - weighted fusion of detector outputs
//!
//! Accepts an arbitrary ordered list of signals with declared weights summing
//! to 1.0 so detectors can be added without touching the algorithm. Final
//! confidence blends agreement, per-signal confidence, and a diversification
//! bonus; disagreeing signals still contribute to the score, they just drag
//! the agreement term down. The aggregator never hides disagreement behind a
//! forced direction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

use super::{SignalDirection, SignalResult};

/// Signed-score threshold beyond which the aggregate reads directional
pub const DIRECTION_THRESHOLD: f64 = 15.0;

/// Weight tolerance when validating that declared weights sum to 1.0
const WEIGHT_TOLERANCE: f64 = 1e-6;

/// A detector output with its declared aggregation weight
#[derive(Debug, Clone)]
pub struct WeightedSignal {
    pub signal: SignalResult,
    pub weight: f64,
}

/// Fused directional bias for one (underlying, evaluation timestamp)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedBias {
    pub direction: SignalDirection,
    /// Confidence in [0, 100]
    pub confidence: f64,
    /// Weighted sum of per-signal signed scores
    pub score: f64,
    /// Human-readable recommendation
    pub recommendation: String,
    /// Contributing signals, in aggregation order
    pub signals: Vec<SignalResult>,
    pub evaluated_at: DateTime<Utc>,
}

impl AggregatedBias {
    /// Neutral bias for symbols where no chain snapshot was available.
    /// Low confidence, no contributing signals.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            direction: SignalDirection::Neutral,
            confidence: 25.0,
            score: 0.0,
            recommendation: format!("NEUTRAL (signals unavailable: {})", reason),
            signals: Vec::new(),
            evaluated_at: Utc::now(),
        }
    }
}

/// Combine weighted signals into one bias.
///
/// Fails with `InvalidWeighting` when weights are negative or do not sum to
/// 1.0; this is pipeline misconfiguration and rejects the scan.
pub fn aggregate(weighted: Vec<WeightedSignal>) -> Result<AggregatedBias, EngineError> {
    if weighted.is_empty() {
        return Err(EngineError::InvalidWeighting { sum: 0.0 });
    }
    let sum: f64 = weighted.iter().map(|w| w.weight).sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE || weighted.iter().any(|w| w.weight < 0.0) {
        return Err(EngineError::InvalidWeighting { sum });
    }

    let score: f64 = weighted.iter().map(|w| w.weight * w.signal.score).sum();
    let weighted_confidence: f64 = weighted
        .iter()
        .map(|w| w.weight * w.signal.confidence)
        .sum();

    let direction = if score > DIRECTION_THRESHOLD {
        SignalDirection::Bullish
    } else if score < -DIRECTION_THRESHOLD {
        SignalDirection::Bearish
    } else {
        SignalDirection::Neutral
    };

    // Agreement: fraction of signals sharing the aggregate's direction
    let agreeing = weighted
        .iter()
        .filter(|w| w.signal.direction == direction)
        .count();
    let agreement = agreeing as f64 / weighted.len() as f64 * 100.0;

    // Diversification bonus when at least two independent families
    // contributed non-neutral readings
    let active_families: std::collections::HashSet<_> = weighted
        .iter()
        .filter(|w| w.signal.direction != SignalDirection::Neutral)
        .map(|w| w.signal.kind)
        .collect();
    let diversification = if active_families.len() >= 2 { 100.0 } else { 0.0 };

    let confidence =
        (0.4 * agreement + 0.5 * weighted_confidence + 0.1 * diversification).clamp(0.0, 100.0);

    let recommendation = match direction {
        SignalDirection::Bullish => format!(
            "BULLISH bias (score {:+.0}, {:.0}% confidence) - favor calls / upside exposure",
            score, confidence
        ),
        SignalDirection::Bearish => format!(
            "BEARISH bias (score {:+.0}, {:.0}% confidence) - favor puts / downside exposure",
            score, confidence
        ),
        SignalDirection::Neutral => format!(
            "NEUTRAL bias (score {:+.0}, {:.0}% confidence) - no directional edge",
            score, confidence
        ),
    };

    Ok(AggregatedBias {
        direction,
        confidence,
        score,
        recommendation,
        signals: weighted.into_iter().map(|w| w.signal).collect(),
        evaluated_at: Utc::now(),
    })
}
