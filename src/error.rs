//! Engine error taxonomy
//!
//! Per-contract and per-symbol failures are isolated and reported alongside
//! successful results; only pipeline-level misconfiguration aborts a scan
//! before any work begins.

use thiserror::Error;

/// Errors produced by the scoring engine.
///
/// `InsufficientSample` conditions are deliberately absent: a thin historical
/// or backtest sample is not a failure and is carried as a structured
/// low-confidence result instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Non-positive time-to-expiration; the contract cannot be priced
    #[error("contract expired: {days_to_expiration} days to expiration for {symbol} {strike}")]
    ExpiredContract {
        symbol: String,
        strike: f64,
        days_to_expiration: i64,
    },

    /// Aggregator misconfiguration: declared weights do not sum to 1.0
    #[error("invalid signal weighting: weights sum to {sum:.6}, expected 1.0")]
    InvalidWeighting { sum: f64 },

    /// An external collaborator could not supply required input for a symbol
    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// A numeric edge case that could not be recovered by flooring/clamping
    #[error("numeric degenerate input: {0}")]
    NumericDegenerate(String),

    /// Malformed scan configuration; fatal, rejects the whole scan
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Whether this error aborts the entire scan (as opposed to a single
    /// symbol or contract).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_) | EngineError::InvalidWeighting { .. }
        )
    }
}
