//! Option opportunity scoring engine
//!
//! Scans batches of option contracts for asymmetric opportunities: prices
//! Greeks and probability of profit, reads directional bias from the chain,
//! validates setups against historical outcomes, sizes positions with the
//! Kelly criterion, and filters through a tiered pipeline with a guaranteed
//! minimum result count.

pub mod backtest;
pub mod config;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod pricing;
pub mod providers;
pub mod signals;
pub mod sizing;
pub mod types;

pub use config::ScanConfig;
pub use error::EngineError;
pub use pipeline::{OpportunityEngine, ScanOutcome, ScanSummary};
pub use types::{OptionContract, OptionType, ScoredOpportunity};
