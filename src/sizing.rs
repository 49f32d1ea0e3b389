//! Position Sizing Engine - Kelly criterion with tiered fractions
//!
//! Computes `f* = p - (1-p)/b` and derives conservative / recommended /
//! aggressive allocations. A negative edge clamps the allocation to zero
//! with an explicit marker, and every tier is clamped against the hard
//! per-trade ceiling. The ceiling is a risk-management invariant; the Kelly
//! math never overrides it.

use serde::{Deserialize, Serialize};

use crate::types::RiskLevel;

/// Sizing configuration (tier multipliers and the per-trade ceiling)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyConfig {
    /// Conservative tier multiplier on the raw Kelly fraction (half-Kelly)
    pub conservative_multiplier: f64,
    /// Aggressive tier multiplier on the raw Kelly fraction
    pub aggressive_multiplier: f64,
    /// Hard ceiling on any tier, as a fraction of portfolio
    pub max_per_trade: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            conservative_multiplier: 0.5,
            aggressive_multiplier: 1.5,
            max_per_trade: 0.10,
        }
    }
}

/// Sizing recommendation for one candidate trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizingRecommendation {
    /// Raw Kelly fraction `f* = p - (1-p)/b`; negative when the edge is
    /// negative, kept for audit even though allocations clamp to zero
    pub kelly_fraction: f64,
    /// Half-Kelly tier, clamped to [0, max_per_trade]
    pub conservative_fraction: f64,
    /// Tier selected by the declared risk tolerance, clamped
    pub recommended_fraction: f64,
    /// 1.5x-Kelly tier, clamped
    pub aggressive_fraction: f64,
    /// Expected value per unit staked: `p*b - (1-p)`
    pub expected_edge: f64,
    /// Set iff the raw Kelly fraction is negative
    pub negative_edge: bool,
    pub risk_tier: RiskLevel,
    /// Which inputs drove the decision, for auditability
    pub rationale: Vec<String>,
    /// The ceiling the fractions were clamped against
    pub max_per_trade: f64,
}

/// Compute the tiered Kelly recommendation.
///
/// `win_probability` in [0,1]; `payoff_ratio` is average win / average loss.
/// A non-positive payoff ratio is treated as a negative edge.
pub fn recommend(
    win_probability: f64,
    payoff_ratio: f64,
    risk_tier: RiskLevel,
    config: &KellyConfig,
) -> PositionSizingRecommendation {
    let p = win_probability.clamp(0.0, 1.0);
    let b = payoff_ratio;

    let (kelly, edge) = if b > 0.0 {
        (p - (1.0 - p) / b, p * b - (1.0 - p))
    } else {
        (-1.0, -1.0)
    };
    let negative_edge = kelly < 0.0;

    let cap = config.max_per_trade.max(0.0);
    let clamp = |fraction: f64| fraction.max(0.0).min(cap);

    let conservative = clamp(kelly * config.conservative_multiplier);
    let full = clamp(kelly);
    let aggressive = clamp(kelly * config.aggressive_multiplier);

    let recommended = match risk_tier {
        RiskLevel::CapitalPreservation => clamp(kelly * config.conservative_multiplier * 0.5),
        RiskLevel::Conservative => conservative,
        RiskLevel::Balanced => full,
        RiskLevel::Aggressive => aggressive,
    };

    let mut rationale = vec![
        format!("win probability {:.1}%", p * 100.0),
        format!("payoff ratio {:.2}", b),
        format!("raw Kelly fraction {:.3}", kelly),
        format!("risk tier {}", risk_tier),
    ];
    if negative_edge {
        rationale.push("negative expected edge: allocation clamped to zero".to_string());
    }
    if kelly > cap {
        rationale.push(format!(
            "raw Kelly {:.3} exceeds per-trade ceiling {:.2}; clamped",
            kelly, cap
        ));
    }

    PositionSizingRecommendation {
        kelly_fraction: kelly,
        conservative_fraction: conservative,
        recommended_fraction: recommended,
        aggressive_fraction: aggressive,
        expected_edge: edge,
        negative_edge,
        risk_tier,
        rationale,
        max_per_trade: cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_positive_edge_kelly() {
        // p=0.55, b=1.8 -> f* = 0.55 - 0.45/1.8 = 0.30
        let rec = recommend(0.55, 1.8, RiskLevel::Balanced, &KellyConfig::default());
        assert_relative_eq!(rec.kelly_fraction, 0.30, epsilon = 1e-12);
        assert!(!rec.negative_edge);
        // Recommended clamps to the 10% ceiling
        assert_relative_eq!(rec.recommended_fraction, 0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_edge_clamps_to_zero() {
        let rec = recommend(0.30, 1.0, RiskLevel::Balanced, &KellyConfig::default());
        assert!(rec.kelly_fraction < 0.0);
        assert!(rec.negative_edge);
        assert_eq!(rec.recommended_fraction, 0.0);
        assert_eq!(rec.conservative_fraction, 0.0);
        assert_eq!(rec.aggressive_fraction, 0.0);
    }

    #[test]
    fn test_marker_set_iff_raw_negative() {
        let positive = recommend(0.60, 2.0, RiskLevel::Balanced, &KellyConfig::default());
        assert!(!positive.negative_edge);
        let negative = recommend(0.40, 1.0, RiskLevel::Balanced, &KellyConfig::default());
        assert!(negative.negative_edge);
        // Boundary: f* exactly zero is not negative edge
        let flat = recommend(0.50, 1.0, RiskLevel::Balanced, &KellyConfig::default());
        assert_relative_eq!(flat.kelly_fraction, 0.0, epsilon = 1e-12);
        assert!(!flat.negative_edge);
    }

    #[test]
    fn test_ceiling_never_exceeded() {
        let config = KellyConfig::default();
        for p in [0.1, 0.3, 0.5, 0.7, 0.9, 0.99] {
            for b in [0.5, 1.0, 2.0, 5.0, 20.0] {
                for tier in [
                    RiskLevel::CapitalPreservation,
                    RiskLevel::Conservative,
                    RiskLevel::Balanced,
                    RiskLevel::Aggressive,
                ] {
                    let rec = recommend(p, b, tier, &config);
                    assert!(rec.recommended_fraction <= config.max_per_trade + 1e-12);
                    assert!(rec.recommended_fraction >= 0.0);
                    assert!(rec.aggressive_fraction <= config.max_per_trade + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_tier_ordering_below_ceiling() {
        // Small edge so nothing hits the ceiling: p=0.52, b=1.2
        // f* = 0.52 - 0.48/1.2 = 0.12 -> use a wide ceiling to see ordering
        let config = KellyConfig {
            max_per_trade: 1.0,
            ..Default::default()
        };
        let rec = recommend(0.52, 1.2, RiskLevel::Balanced, &config);
        assert!(rec.conservative_fraction < rec.recommended_fraction);
        assert!(rec.recommended_fraction < rec.aggressive_fraction);
    }

    #[test]
    fn test_zero_payoff_ratio_is_negative_edge() {
        let rec = recommend(0.90, 0.0, RiskLevel::Aggressive, &KellyConfig::default());
        assert!(rec.negative_edge);
        assert_eq!(rec.recommended_fraction, 0.0);
    }

    #[test]
    fn test_rationale_enumerates_inputs() {
        let rec = recommend(0.55, 1.8, RiskLevel::Conservative, &KellyConfig::default());
        let joined = rec.rationale.join("; ");
        assert!(joined.contains("win probability"));
        assert!(joined.contains("payoff ratio"));
        assert!(joined.contains("risk tier"));
        assert!(joined.contains("ceiling"));
    }
}
