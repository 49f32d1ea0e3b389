//! Pricing Model - Black-Scholes-Merton Greeks and probability of profit
//!
//! Closed-form European pricing for single-leg contracts:
//! - First-order Greeks: delta, gamma, theta (per calendar day), vega (per 1% IV)
//! - Theoretical price (used by the backtest validator to simulate premiums)
//! - Risk-neutral probability-of-profit estimate
//!
//! The probability-of-profit figure is the risk-neutral probability that the
//! underlying finishes beyond breakeven at expiration, computed from the same
//! d1/d2 terms as the Greeks. It ignores early exercise and actual drift, so
//! it is an approximation for American-style contracts; it is reported as-is
//! rather than drift-adjusted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use tracing::warn;

use crate::error::EngineError;
use crate::types::{Greeks, OptionContract, OptionType};

/// Floor applied to non-positive volatility after normalization.
///
/// Keeps the formula numerically defined for degenerate quotes instead of
/// failing the contract; the floor is surfaced as a diagnostic upstream.
pub const MIN_VOLATILITY: f64 = 1e-6;

/// Calendar days per year for time-to-expiration conversion
pub const DAYS_PER_YEAR: f64 = 365.0;

fn std_normal() -> Normal {
    Normal::new(0.0, 1.0).unwrap()
}

/// Standard normal CDF Φ(x)
fn norm_cdf(x: f64) -> f64 {
    std_normal().cdf(x)
}

/// Standard normal PDF φ(x)
fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Inputs to the pricing model, with volatility already normalized
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingInputs {
    pub option_type: OptionType,
    /// Spot price of the underlying
    pub spot: f64,
    /// Strike price
    pub strike: f64,
    /// Annualized implied volatility, decimal fraction
    pub volatility: f64,
    /// Time to expiration in years
    pub time_to_expiry: f64,
    /// Annualized risk-free rate, decimal fraction
    pub risk_free_rate: f64,
}

/// Output of a Greeks computation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GreeksComputation {
    pub greeks: Greeks,
    /// Theoretical BSM price
    pub price: f64,
    /// True when the input volatility was non-positive and floored
    pub volatility_floored: bool,
}

/// Normalize a quoted implied volatility to a decimal fraction.
///
/// Data sources quote IV either as a decimal (0.25) or a percentage (25.0);
/// any value greater than 1 is interpreted as a percentage and divided by 100.
/// Exactly 1.0 is ambiguous (100% as decimal vs 1% as percentage) and is
/// treated as 100%; the >1 rule deliberately does not fire there.
///
/// Returns the normalized value and whether the minimum floor was applied.
pub fn normalize_volatility(raw: f64) -> (f64, bool) {
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    if scaled <= 0.0 {
        warn!(raw_iv = raw, "non-positive volatility floored to minimum");
        (MIN_VOLATILITY, true)
    } else {
        (scaled, false)
    }
}

/// Time to expiration in years from wall-clock now. May be non-positive for
/// expired or same-day contracts; callers decide how to fail.
pub fn time_to_expiry_years(expiration: NaiveDate, now: DateTime<Utc>) -> f64 {
    let days = (expiration - now.date_naive()).num_days();
    days as f64 / DAYS_PER_YEAR
}

fn d1_d2(spot: f64, strike: f64, vol: f64, t: f64, rate: f64) -> (f64, f64) {
    let sqrt_t = t.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * vol * vol) * t) / (vol * sqrt_t);
    (d1, d1 - vol * sqrt_t)
}

/// Compute Greeks and theoretical price from normalized inputs.
///
/// Fails with `ExpiredContract` semantics via the caller when
/// `time_to_expiry <= 0`; this function itself requires a positive horizon.
pub fn compute_greeks(inputs: &PricingInputs) -> Result<GreeksComputation, EngineError> {
    if inputs.time_to_expiry <= 0.0 {
        return Err(EngineError::NumericDegenerate(format!(
            "non-positive time to expiry {:.6}",
            inputs.time_to_expiry
        )));
    }
    if inputs.spot <= 0.0 || inputs.strike <= 0.0 {
        return Err(EngineError::NumericDegenerate(format!(
            "non-positive spot/strike: spot={} strike={}",
            inputs.spot, inputs.strike
        )));
    }

    let (vol, floored) = normalize_volatility(inputs.volatility);
    let s = inputs.spot;
    let k = inputs.strike;
    let t = inputs.time_to_expiry;
    let r = inputs.risk_free_rate;
    let sqrt_t = t.sqrt();

    let (d1, d2) = d1_d2(s, k, vol, t, r);
    let nd1 = norm_cdf(d1);
    let nd2 = norm_cdf(d2);
    let pdf_d1 = norm_pdf(d1);
    let disc = (-r * t).exp();

    let price = match inputs.option_type {
        OptionType::Call => s * nd1 - k * disc * nd2,
        OptionType::Put => k * disc * norm_cdf(-d2) - s * norm_cdf(-d1),
    };

    let delta = match inputs.option_type {
        OptionType::Call => nd1,
        OptionType::Put => nd1 - 1.0,
    };

    let gamma = pdf_d1 / (s * vol * sqrt_t);

    let theta_annual = match inputs.option_type {
        OptionType::Call => -s * pdf_d1 * vol / (2.0 * sqrt_t) - r * k * disc * nd2,
        OptionType::Put => -s * pdf_d1 * vol / (2.0 * sqrt_t) + r * k * disc * norm_cdf(-d2),
    };
    // Per calendar day; downstream consumers assume this unit
    let theta = theta_annual / DAYS_PER_YEAR;

    // Per one percentage point of IV; downstream consumers assume this unit
    let vega = s * pdf_d1 * sqrt_t / 100.0;

    Ok(GreeksComputation {
        greeks: Greeks {
            delta,
            gamma,
            theta,
            vega,
        },
        price,
        volatility_floored: floored,
    })
}

/// Compute Greeks for a contract snapshot at wall-clock `now`.
///
/// Returns `ExpiredContract` for non-positive time-to-expiration rather than
/// dividing by zero.
pub fn greeks_for_contract(
    contract: &OptionContract,
    now: DateTime<Utc>,
    risk_free_rate: f64,
) -> Result<GreeksComputation, EngineError> {
    let t = time_to_expiry_years(contract.expiration, now);
    if t <= 0.0 {
        return Err(EngineError::ExpiredContract {
            symbol: contract.symbol.clone(),
            strike: contract.strike,
            days_to_expiration: contract.days_to_expiration(now),
        });
    }
    compute_greeks(&PricingInputs {
        option_type: contract.option_type,
        spot: contract.underlying_price,
        strike: contract.strike,
        volatility: contract.implied_volatility,
        time_to_expiry: t,
        risk_free_rate,
    })
}

/// Risk-neutral probability that a long position finishes profitable.
///
/// Derived from the probability of the underlying finishing beyond the
/// breakeven price (strike + premium for calls, strike - premium for puts)
/// using the same d2 term as the Greeks, with the strike replaced by the
/// breakeven level. Returns the probability and whether clamping to [0,1]
/// was required (degenerate inputs only).
pub fn probability_of_profit(
    option_type: OptionType,
    spot: f64,
    strike: f64,
    premium: f64,
    volatility: f64,
    time_to_expiry: f64,
    risk_free_rate: f64,
) -> (f64, bool) {
    let (vol, _) = normalize_volatility(volatility);
    let breakeven = match option_type {
        OptionType::Call => strike + premium.max(0.0),
        OptionType::Put => (strike - premium.max(0.0)).max(f64::EPSILON),
    };
    if spot <= 0.0 || time_to_expiry <= 0.0 {
        return (0.0, true);
    }

    let (_, d2) = d1_d2(spot, breakeven, vol, time_to_expiry, risk_free_rate);
    let raw = match option_type {
        OptionType::Call => norm_cdf(d2),
        OptionType::Put => norm_cdf(-d2),
    };

    if !raw.is_finite() || !(0.0..=1.0).contains(&raw) {
        let clamped = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        };
        warn!(
            raw_probability = raw,
            clamped_probability = clamped,
            "probability of profit clamped to [0,1]"
        );
        (clamped, true)
    } else {
        (raw, false)
    }
}

/// Terminal intrinsic value of a long contract at expiration
pub fn terminal_payoff(option_type: OptionType, strike: f64, terminal_spot: f64) -> f64 {
    match option_type {
        OptionType::Call => (terminal_spot - strike).max(0.0),
        OptionType::Put => (strike - terminal_spot).max(0.0),
    }
}

/// Merge externally supplied Greeks with model-computed ones.
///
/// Fallback policy: a supplied field that is missing or exactly zero is taken
/// from the model; genuine non-zero supplied values are never overwritten.
/// Returns the merged Greeks and whether any field was recomputed.
pub fn merge_greeks(supplied: Option<&Greeks>, computed: &Greeks) -> (Greeks, bool) {
    let supplied = match supplied {
        Some(g) => g,
        None => return (*computed, true),
    };
    let pick = |field: f64, fallback: f64| if field != 0.0 { field } else { fallback };
    let merged = Greeks {
        delta: pick(supplied.delta, computed.delta),
        gamma: pick(supplied.gamma, computed.gamma),
        theta: pick(supplied.theta, computed.theta),
        vega: pick(supplied.vega, computed.vega),
    };
    let recomputed = supplied.delta == 0.0
        || supplied.gamma == 0.0
        || supplied.theta == 0.0
        || supplied.vega == 0.0;
    (merged, recomputed)
}
