//! IV Skew Signal - out-of-the-money put vs call implied volatility
//!
//! Compares average IV of OTM puts against OTM calls inside a fixed delta
//! band (~25-delta). Put-skew excess above the materiality threshold reads
//! bearish, call-skew excess bullish. A 25-delta risk-reversal metric must
//! agree in sign with the band skew for full confidence; disagreement lowers
//! confidence without flipping direction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pricing::{self, normalize_volatility};
use crate::types::{OptionContract, OptionType};

use super::{SignalDetails, SignalDirection, SignalKind, SignalResult};

/// Skew detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewConfig {
    /// Absolute delta band defining the OTM wings (lower, upper)
    pub delta_band: (f64, f64),
    /// Minimum put-call IV gap (decimal) before the signal reads directional
    pub materiality_threshold: f64,
    /// Minimum strikes per side; below this the detector abstains rather
    /// than extrapolate from a thin wing
    pub min_strikes_per_side: usize,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            delta_band: (0.15, 0.35),
            materiality_threshold: 0.02, // 2 IV points
            min_strikes_per_side: 3,
        }
    }
}

struct WingQuote {
    iv: f64,
    abs_delta: f64,
}

/// Detect directional bias from the volatility skew of a chain snapshot
pub fn detect(
    chain: &[OptionContract],
    config: &SkewConfig,
    risk_free_rate: f64,
    now: DateTime<Utc>,
) -> SignalResult {
    let (lo, hi) = config.delta_band;
    let mut puts: Vec<WingQuote> = Vec::new();
    let mut calls: Vec<WingQuote> = Vec::new();

    for contract in chain {
        // Expired or unpriceable strikes are simply not part of the wing
        let Ok(out) = pricing::greeks_for_contract(contract, now, risk_free_rate) else {
            continue;
        };
        let abs_delta = out.greeks.delta.abs();
        if abs_delta < lo || abs_delta > hi {
            continue;
        }
        let (iv, _) = normalize_volatility(contract.implied_volatility);
        let quote = WingQuote { iv, abs_delta };
        match contract.option_type {
            OptionType::Put => puts.push(quote),
            OptionType::Call => calls.push(quote),
        }
    }

    if puts.len() < config.min_strikes_per_side || calls.len() < config.min_strikes_per_side {
        debug!(
            puts = puts.len(),
            calls = calls.len(),
            "skew signal abstaining: thin wings"
        );
        return SignalResult::abstain(
            SignalKind::IvSkew,
            45.0,
            format!(
                "insufficient strikes in delta band ({} puts, {} calls, need {} per side)",
                puts.len(),
                calls.len(),
                config.min_strikes_per_side
            ),
        );
    }

    let put_iv = puts.iter().map(|q| q.iv).sum::<f64>() / puts.len() as f64;
    let call_iv = calls.iter().map(|q| q.iv).sum::<f64>() / calls.len() as f64;
    let skew = put_iv - call_iv;

    // Risk reversal from the strikes nearest 25-delta on each side
    let nearest = |quotes: &[WingQuote]| {
        quotes
            .iter()
            .min_by(|a, b| {
                (a.abs_delta - 0.25)
                    .abs()
                    .total_cmp(&(b.abs_delta - 0.25).abs())
            })
            .map(|q| q.iv)
            .unwrap_or(0.0)
    };
    let risk_reversal = nearest(&puts) - nearest(&calls);
    let rr_agrees = risk_reversal * skew >= 0.0;

    let strikes_used = puts.len() + calls.len();
    let details = SignalDetails::Skew {
        put_iv,
        call_iv,
        skew,
        risk_reversal,
        strikes_used,
        risk_reversal_agrees: rr_agrees,
    };

    if skew.abs() < config.materiality_threshold {
        return SignalResult {
            kind: SignalKind::IvSkew,
            direction: SignalDirection::Neutral,
            score: 0.0,
            confidence: 50.0,
            rationale: format!(
                "skew {:.1} IV pts below materiality threshold {:.1}",
                skew * 100.0,
                config.materiality_threshold * 100.0
            ),
            details,
            extra: Default::default(),
        };
    }

    // Put skew (puts richer than calls) = downside protection bid = bearish
    let direction = if skew > 0.0 {
        SignalDirection::Bearish
    } else {
        SignalDirection::Bullish
    };
    let magnitude = (skew.abs() / config.materiality_threshold * 25.0).min(100.0);
    let score = match direction {
        SignalDirection::Bullish => magnitude,
        _ => -magnitude,
    };

    // Confidence 45-85: scaled by skew magnitude and wing depth,
    // penalized when the risk reversal disagrees in sign
    let excess = ((skew.abs() - config.materiality_threshold) / config.materiality_threshold)
        .min(3.0)
        / 3.0;
    let depth_bonus = ((strikes_used as f64 / 12.0).min(1.0)) * 15.0;
    let rr_penalty = if rr_agrees { 0.0 } else { 10.0 };
    let confidence = (45.0 + 25.0 * excess + depth_bonus - rr_penalty).clamp(45.0, 85.0);

    let rationale = format!(
        "{} IV skew {:.1} pts ({} wing richer), risk reversal {:.1} pts {}, {} strikes in band",
        direction,
        skew.abs() * 100.0,
        if skew > 0.0 { "put" } else { "call" },
        risk_reversal * 100.0,
        if rr_agrees { "confirms" } else { "conflicts" },
        strikes_used
    );

    SignalResult {
        kind: SignalKind::IvSkew,
        direction,
        score,
        confidence,
        rationale,
        details,
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn wing_contract(option_type: OptionType, strike: f64, iv: f64) -> OptionContract {
        OptionContract {
            symbol: "TEST".to_string(),
            strike,
            expiration: far_expiry(),
            option_type,
            last_price: 1.0,
            bid: 0.95,
            ask: 1.05,
            volume: 100,
            open_interest: 500,
            implied_volatility: iv,
            underlying_price: 100.0,
            greeks: None,
        }
    }

    fn far_expiry() -> NaiveDate {
        (Utc::now() + chrono::Duration::days(60)).date_naive()
    }

    /// Build a chain whose OTM puts carry `put_iv` and OTM calls `call_iv`.
    /// Strikes chosen so ~25-delta falls inside the band at 60 DTE.
    fn chain(put_iv: f64, call_iv: f64) -> Vec<OptionContract> {
        let mut c = Vec::new();
        for strike in [88.0, 90.0, 92.0, 94.0] {
            c.push(wing_contract(OptionType::Put, strike, put_iv));
        }
        for strike in [106.0, 108.0, 110.0, 112.0] {
            c.push(wing_contract(OptionType::Call, strike, call_iv));
        }
        c
    }

    #[test]
    fn test_put_skew_reads_bearish() {
        let result = detect(&chain(0.35, 0.25), &SkewConfig::default(), 0.02, Utc::now());
        assert_eq!(result.direction, SignalDirection::Bearish);
        assert!(result.score < 0.0);
        assert!(result.confidence >= 45.0 && result.confidence <= 85.0);
    }

    #[test]
    fn test_call_skew_reads_bullish() {
        let result = detect(&chain(0.25, 0.35), &SkewConfig::default(), 0.02, Utc::now());
        assert_eq!(result.direction, SignalDirection::Bullish);
        assert!(result.score > 0.0);
    }

    #[test]
    fn test_flat_skew_is_neutral() {
        let result = detect(&chain(0.30, 0.30), &SkewConfig::default(), 0.02, Utc::now());
        assert_eq!(result.direction, SignalDirection::Neutral);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_thin_wing_abstains() {
        // Only one put strike: below min_strikes_per_side
        let mut thin = chain(0.35, 0.25);
        thin.retain(|c| c.option_type == OptionType::Call || c.strike == 90.0);
        let result = detect(&thin, &SkewConfig::default(), 0.02, Utc::now());
        assert_eq!(result.direction, SignalDirection::Neutral);
        assert_eq!(result.confidence, 45.0);
        assert!(result.rationale.contains("insufficient strikes"));
    }

    #[test]
    fn test_larger_skew_scores_higher() {
        let mild = detect(&chain(0.28, 0.25), &SkewConfig::default(), 0.02, Utc::now());
        let steep = detect(&chain(0.40, 0.25), &SkewConfig::default(), 0.02, Utc::now());
        assert!(steep.score.abs() > mild.score.abs());
        assert!(steep.confidence >= mild.confidence);
    }
}
