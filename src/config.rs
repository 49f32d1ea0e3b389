//! Configuration for the opportunity scanner
//!
//! Loads from YAML files + environment variables via .env. Every knob has a
//! production default; files and `OPTSCREEN__*` variables override.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::backtest::SimilarityBands;
use crate::error::EngineError;
use crate::signals::flow::FlowConfig;
use crate::signals::skew::SkewConfig;
use crate::sizing::KellyConfig;
use crate::types::RiskLevel;

/// Main scanner configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    pub signals: SignalConfig,
    pub liquidity: LiquidityConfig,
    pub institutional: InstitutionalConfig,
    pub score: ScoreWeights,
    pub kelly: KellyConfig,
    pub backtest: SimilarityBands,
    pub fallback: FallbackConfig,
    /// Price-history lookback in trading days
    pub lookback_days: usize,
    /// Per-provider call timeout in milliseconds
    pub provider_timeout_ms: u64,
    /// Risk tier driving the recommended Kelly fraction
    pub default_risk_tier: RiskLevel,
}

/// Signal framework configuration: detector knobs plus aggregation weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub skew: SkewConfig,
    pub flow: FlowConfig,
    /// Aggregation weight of the IV skew detector
    pub skew_weight: f64,
    /// Aggregation weight of the option flow detector
    pub flow_weight: f64,
    /// Annualized risk-free rate used for delta banding and pricing
    pub risk_free_rate: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            skew: SkewConfig::default(),
            flow: FlowConfig::default(),
            skew_weight: 0.55,
            flow_weight: 0.45,
            risk_free_rate: 0.04,
        }
    }
}

/// Hard liquidity gate; contracts failing any bound are rejected outright
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityConfig {
    /// Minimum session volume (contracts)
    pub min_volume: u64,
    /// Minimum open interest (contracts)
    pub min_open_interest: u64,
    /// Minimum mid price in dollars
    pub min_price: f64,
    /// Maximum bid/ask spread as a fraction of mid
    pub max_spread_pct: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            min_volume: 50,
            min_open_interest: 100,
            min_price: 0.10,
            max_spread_pct: 0.15,
        }
    }
}

/// One row of the strong-backtest override table: a candidate whose backtest
/// meets any row is admitted even when below the strict quality thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BacktestOverride {
    pub min_trades: usize,
    pub min_win_rate: f64,
}

fn default_overrides() -> Vec<BacktestOverride> {
    vec![
        BacktestOverride {
            min_trades: 50,
            min_win_rate: 0.70,
        },
        BacktestOverride {
            min_trades: 20,
            min_win_rate: 0.80,
        },
    ]
}

/// Institutional-quality thresholds applied after scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionalConfig {
    /// Minimum probability of profit, [0,1]
    pub min_probability_of_profit: f64,
    /// Minimum composite score, 0-100
    pub min_composite_score: f64,
    /// Minimum |delta|
    pub min_delta_magnitude: f64,
    /// Ordered override rows; strongest (most trades) first
    #[serde(default = "default_overrides")]
    pub overrides: Vec<BacktestOverride>,
}

impl Default for InstitutionalConfig {
    fn default() -> Self {
        Self {
            min_probability_of_profit: 0.40,
            min_composite_score: 55.0,
            min_delta_magnitude: 0.25,
            overrides: default_overrides(),
        }
    }
}

/// Composite score weights; must sum to 1.0
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub backtest: f64,
    pub bias: f64,
    pub probability: f64,
    pub risk_adjusted: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            backtest: 0.35,
            bias: 0.25,
            probability: 0.25,
            risk_adjusted: 0.15,
        }
    }
}

/// Fallback guarantee: minimum result count and per-symbol diversification cap
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Minimum opportunities a scan returns when enough scored candidates exist
    pub min_results: usize,
    /// Maximum opportunities per underlying in the final list
    pub per_symbol_cap: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_results: 10,
            per_symbol_cap: 5,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            signals: SignalConfig::default(),
            liquidity: LiquidityConfig::default(),
            institutional: InstitutionalConfig::default(),
            score: ScoreWeights::default(),
            kelly: KellyConfig::default(),
            backtest: SimilarityBands::default(),
            fallback: FallbackConfig::default(),
            lookback_days: 365,
            provider_timeout_ms: 5_000,
            default_risk_tier: RiskLevel::Balanced,
        }
    }
}

impl ScanConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Signal defaults
            .set_default("signals.skew.delta_band", vec![0.15, 0.35])?
            .set_default("signals.skew.materiality_threshold", 0.02)?
            .set_default("signals.skew.min_strikes_per_side", 3)?
            .set_default("signals.flow.unusual_volume_ratio", 2.0)?
            .set_default("signals.flow.block_oi_ratio", 0.5)?
            .set_default("signals.flow.dominance_ratio", 1.5)?
            .set_default("signals.flow.min_total_volume", 100)?
            .set_default("signals.skew_weight", 0.55)?
            .set_default("signals.flow_weight", 0.45)?
            .set_default("signals.risk_free_rate", 0.04)?
            // Liquidity gate defaults
            .set_default("liquidity.min_volume", 50)?
            .set_default("liquidity.min_open_interest", 100)?
            .set_default("liquidity.min_price", 0.10)?
            .set_default("liquidity.max_spread_pct", 0.15)?
            // Institutional filter defaults
            .set_default("institutional.min_probability_of_profit", 0.40)?
            .set_default("institutional.min_composite_score", 55.0)?
            .set_default("institutional.min_delta_magnitude", 0.25)?
            // Composite score weight defaults
            .set_default("score.backtest", 0.35)?
            .set_default("score.bias", 0.25)?
            .set_default("score.probability", 0.25)?
            .set_default("score.risk_adjusted", 0.15)?
            // Kelly defaults
            .set_default("kelly.conservative_multiplier", 0.5)?
            .set_default("kelly.aggressive_multiplier", 1.5)?
            .set_default("kelly.max_per_trade", 0.10)?
            // Backtest similarity band defaults
            .set_default("backtest.moneyness_band", 0.05)?
            .set_default("backtest.dte_band_days", 5)?
            .set_default("backtest.entry_stride_days", 5)?
            // Fallback guarantee defaults
            .set_default("fallback.min_results", 10)?
            .set_default("fallback.per_symbol_cap", 5)?
            // Scanner defaults
            .set_default("lookback_days", 365)?
            .set_default("provider_timeout_ms", 5000)?
            .set_default("default_risk_tier", "Balanced")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (OPTSCREEN_*)
            .add_source(Environment::with_prefix("OPTSCREEN").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let scan_config: ScanConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(scan_config)
    }

    /// Reject misconfigurations before any scan work starts.
    ///
    /// Weight errors surface as `InvalidWeighting`, everything else as
    /// `InvalidConfig`; both are fatal and reject the whole scan.
    pub fn validate(&self) -> Result<(), EngineError> {
        let signal_sum = self.signals.skew_weight + self.signals.flow_weight;
        if (signal_sum - 1.0).abs() > 1e-6
            || self.signals.skew_weight < 0.0
            || self.signals.flow_weight < 0.0
        {
            return Err(EngineError::InvalidWeighting { sum: signal_sum });
        }

        let score_sum =
            self.score.backtest + self.score.bias + self.score.probability + self.score.risk_adjusted;
        if (score_sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::InvalidWeighting { sum: score_sum });
        }
        for (name, w) in [
            ("score.backtest", self.score.backtest),
            ("score.bias", self.score.bias),
            ("score.probability", self.score.probability),
            ("score.risk_adjusted", self.score.risk_adjusted),
        ] {
            if w < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be non-negative, got {}",
                    name, w
                )));
            }
        }

        if self.liquidity.max_spread_pct <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "liquidity.max_spread_pct must be positive, got {}",
                self.liquidity.max_spread_pct
            )));
        }
        if self.liquidity.min_price < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "liquidity.min_price must be non-negative, got {}",
                self.liquidity.min_price
            )));
        }

        if !(0.0..=1.0).contains(&self.institutional.min_probability_of_profit) {
            return Err(EngineError::InvalidConfig(format!(
                "institutional.min_probability_of_profit must be in [0,1], got {}",
                self.institutional.min_probability_of_profit
            )));
        }
        if !(0.0..=100.0).contains(&self.institutional.min_composite_score) {
            return Err(EngineError::InvalidConfig(format!(
                "institutional.min_composite_score must be in [0,100], got {}",
                self.institutional.min_composite_score
            )));
        }
        if !(0.0..=1.0).contains(&self.institutional.min_delta_magnitude) {
            return Err(EngineError::InvalidConfig(format!(
                "institutional.min_delta_magnitude must be in [0,1], got {}",
                self.institutional.min_delta_magnitude
            )));
        }
        for row in &self.institutional.overrides {
            if !(0.0..=1.0).contains(&row.min_win_rate) {
                return Err(EngineError::InvalidConfig(format!(
                    "institutional override win rate must be in [0,1], got {}",
                    row.min_win_rate
                )));
            }
        }

        if self.kelly.max_per_trade <= 0.0 || self.kelly.max_per_trade > 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "kelly.max_per_trade must be in (0,1], got {}",
                self.kelly.max_per_trade
            )));
        }
        if self.kelly.conservative_multiplier <= 0.0 || self.kelly.aggressive_multiplier <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "kelly tier multipliers must be positive".to_string(),
            ));
        }

        if self.backtest.moneyness_band <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "backtest.moneyness_band must be positive, got {}",
                self.backtest.moneyness_band
            )));
        }
        if self.backtest.entry_stride_days == 0 {
            return Err(EngineError::InvalidConfig(
                "backtest.entry_stride_days must be at least 1".to_string(),
            ));
        }

        if self.fallback.min_results == 0 || self.fallback.per_symbol_cap == 0 {
            return Err(EngineError::InvalidConfig(
                "fallback.min_results and fallback.per_symbol_cap must be at least 1".to_string(),
            ));
        }
        if self.lookback_days == 0 {
            return Err(EngineError::InvalidConfig(
                "lookback_days must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "weights=skew:{:.2}/flow:{:.2} min_pop={:.2} min_score={:.0} min_results={} cap={} tier={}",
            self.signals.skew_weight,
            self.signals.flow_weight,
            self.institutional.min_probability_of_profit,
            self.institutional.min_composite_score,
            self.fallback.min_results,
            self.fallback.per_symbol_cap,
            self.default_risk_tier
        )
    }
}

impl std::fmt::Display for ScanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
