//! Directional Signal Framework
//!
//! State-free functional pipeline: two independent detectors (IV skew and
//! option flow) feed a weighted aggregator. Each detector emits a
//! `SignalResult`; the aggregator fuses them into one `AggregatedBias` per
//! (underlying, evaluation timestamp). Detectors never see each other's
//! output and disagreement is surfaced as reduced confidence, never hidden
//! behind a forced direction.

pub mod aggregator;
pub mod flow;
pub mod skew;

pub use aggregator::{aggregate, AggregatedBias, WeightedSignal};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::SignalConfig;
use crate::error::EngineError;
use crate::types::{MarketContext, OptionContract};
use chrono::{DateTime, Utc};

/// Direction reading of a signal or aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Bullish => write!(f, "BULLISH"),
            SignalDirection::Bearish => write!(f, "BEARISH"),
            SignalDirection::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Signal family identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    IvSkew,
    OptionFlow,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::IvSkew => write!(f, "iv_skew"),
            SignalKind::OptionFlow => write!(f, "option_flow"),
        }
    }
}

/// Closed, versioned detail record per signal family.
///
/// The `extra` map on `SignalResult` is the forward-compatibility escape
/// hatch; these variants carry the fields each detector is known to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalDetails {
    Skew {
        /// Average IV of OTM puts in the delta band
        put_iv: f64,
        /// Average IV of OTM calls in the delta band
        call_iv: f64,
        /// put_iv - call_iv
        skew: f64,
        /// 25-delta put IV minus 25-delta call IV (nearest strikes)
        risk_reversal: f64,
        /// Strikes available in the band, puts + calls
        strikes_used: usize,
        /// Whether the risk reversal agreed in sign with the band skew
        risk_reversal_agrees: bool,
    },
    Flow {
        call_volume: u64,
        put_volume: u64,
        /// call volume / put volume (f64::INFINITY when puts are zero)
        call_put_ratio: f64,
        /// current underlying volume / trailing average
        unusual_volume_ratio: f64,
        /// Contracts whose session volume is large relative to open interest
        block_trades: usize,
        /// Fraction of dominant-side volume trading at or above the mid
        buy_side_aggression: f64,
        /// Whether recent price action confirmed the flow direction
        price_confirms: bool,
        /// Mean sentiment of recent headlines, 0 when there are none
        news_sentiment: f64,
    },
    /// Detector abstained before producing details
    None,
}

/// Output of one signal detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub kind: SignalKind,
    pub direction: SignalDirection,
    /// Signed strength: bullish positive, bearish negative, magnitude 0-100
    pub score: f64,
    /// Confidence in [0, 100]
    pub confidence: f64,
    /// Free-text rationale for audit trails
    pub rationale: String,
    /// Raw contributing details
    pub details: SignalDetails,
    /// Extension map reserved for forward compatibility
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

impl SignalResult {
    /// Neutral abstention with a floor confidence and a reason
    pub fn abstain(kind: SignalKind, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            direction: SignalDirection::Neutral,
            score: 0.0,
            confidence,
            rationale: rationale.into(),
            details: SignalDetails::None,
            extra: BTreeMap::new(),
        }
    }
}

/// Run both detectors over a chain snapshot and aggregate with the configured
/// weights. The single entry point the pipeline uses per underlying.
pub fn evaluate_bias(
    chain: &[OptionContract],
    context: &MarketContext,
    config: &SignalConfig,
    now: DateTime<Utc>,
) -> Result<AggregatedBias, EngineError> {
    let skew = skew::detect(chain, &config.skew, config.risk_free_rate, now);
    let flow = flow::detect(chain, context, &config.flow);
    aggregate(vec![
        WeightedSignal {
            signal: skew,
            weight: config.skew_weight,
        },
        WeightedSignal {
            signal: flow,
            weight: config.flow_weight,
        },
    ])
}
