//! Flow Signal - unusual volume, block trades, and bid/ask aggression
//!
//! Reads the chain snapshot for where the volume is going: the call/put
//! volume ratio gives direction, price action gives confirmation, and
//! block-size prints plus spread-crossing aggression scale the strength.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{MarketContext, OptionContract, OptionType, TrendBias};

use super::{SignalDetails, SignalDirection, SignalKind, SignalResult};

/// Flow detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Current/trailing-average volume ratio that counts as unusual
    pub unusual_volume_ratio: f64,
    /// Session volume relative to open interest that counts as a block print
    pub block_oi_ratio: f64,
    /// Call/put (or put/call) volume ratio required for directional dominance
    pub dominance_ratio: f64,
    /// Minimum total option volume; below this the detector abstains
    pub min_total_volume: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            unusual_volume_ratio: 2.0,
            block_oi_ratio: 0.5,
            dominance_ratio: 1.5,
            min_total_volume: 100,
        }
    }
}

/// Detect directional bias from option flow in a chain snapshot
pub fn detect(
    chain: &[OptionContract],
    context: &MarketContext,
    config: &FlowConfig,
) -> SignalResult {
    let call_volume: u64 = chain
        .iter()
        .filter(|c| c.option_type == OptionType::Call)
        .map(|c| c.volume)
        .sum();
    let put_volume: u64 = chain
        .iter()
        .filter(|c| c.option_type == OptionType::Put)
        .map(|c| c.volume)
        .sum();
    let total_volume = call_volume + put_volume;

    if total_volume < config.min_total_volume {
        debug!(total_volume, "flow signal abstaining: no meaningful volume");
        return SignalResult::abstain(
            SignalKind::OptionFlow,
            50.0,
            format!(
                "option volume {} below minimum {}",
                total_volume, config.min_total_volume
            ),
        );
    }

    let call_put_ratio = if put_volume > 0 {
        call_volume as f64 / put_volume as f64
    } else {
        f64::INFINITY
    };

    let unusual_volume_ratio = if context.avg_volume > 0 {
        context.volume as f64 / context.avg_volume as f64
    } else {
        1.0
    };

    // Block prints: session volume large relative to standing open interest
    let block_trades = chain
        .iter()
        .filter(|c| c.open_interest > 0 && c.volume as f64 > config.block_oi_ratio * c.open_interest as f64)
        .count();

    // Proxy for spread-crossing: the dominant side trading at or above mid
    // suggests buyers lifting offers rather than sellers hitting bids
    let dominant_side = if call_put_ratio >= 1.0 {
        OptionType::Call
    } else {
        OptionType::Put
    };
    let (aggressive, dominant_count) = chain
        .iter()
        .filter(|c| c.option_type == dominant_side && c.volume > 0)
        .fold((0usize, 0usize), |(agg, n), c| {
            let crossed = c.last_price >= c.mid_price();
            (agg + usize::from(crossed), n + 1)
        });
    let buy_side_aggression = if dominant_count > 0 {
        aggressive as f64 / dominant_count as f64
    } else {
        0.0
    };

    let direction = if call_put_ratio >= config.dominance_ratio {
        SignalDirection::Bullish
    } else if call_put_ratio <= 1.0 / config.dominance_ratio {
        SignalDirection::Bearish
    } else {
        SignalDirection::Neutral
    };

    let price_confirms = match direction {
        SignalDirection::Bullish => {
            context.recent_price_change_pct > 0.0 || context.trend == TrendBias::Bullish
        }
        SignalDirection::Bearish => {
            context.recent_price_change_pct < 0.0 || context.trend == TrendBias::Bearish
        }
        SignalDirection::Neutral => false,
    };

    let news_sentiment = context.avg_sentiment();

    let details = SignalDetails::Flow {
        call_volume,
        put_volume,
        call_put_ratio,
        unusual_volume_ratio,
        block_trades,
        buy_side_aggression,
        price_confirms,
        news_sentiment,
    };

    if direction == SignalDirection::Neutral {
        return SignalResult {
            kind: SignalKind::OptionFlow,
            direction,
            score: 0.0,
            confidence: 50.0,
            rationale: format!(
                "balanced flow: call/put ratio {:.2} inside dominance band",
                call_put_ratio
            ),
            details,
            extra: Default::default(),
        };
    }

    // Strength from dominance, scaled up by unusual volume and block prints
    let dominance = if direction == SignalDirection::Bullish {
        call_put_ratio
    } else {
        1.0 / call_put_ratio
    };
    let mut magnitude = ((dominance / config.dominance_ratio) * 30.0).min(70.0);
    if unusual_volume_ratio >= config.unusual_volume_ratio {
        magnitude += 15.0;
    }
    if block_trades > 0 {
        magnitude += 10.0;
    }
    let magnitude = magnitude.min(100.0);
    let score = if direction == SignalDirection::Bullish {
        magnitude
    } else {
        -magnitude
    };

    // Confidence 50-90: price confirmation pushes up, conflict pulls down,
    // headline sentiment leans the same way with a smaller hand
    let mut confidence = 55.0 + (magnitude / 100.0) * 20.0;
    if price_confirms {
        confidence += 15.0;
    } else {
        confidence -= 10.0;
    }
    confidence += (buy_side_aggression - 0.5) * 10.0;
    let sentiment_lean = if direction == SignalDirection::Bullish {
        news_sentiment
    } else {
        -news_sentiment
    };
    confidence += sentiment_lean * 8.0;
    let confidence = confidence.clamp(50.0, 90.0);

    let mut rationale = format!(
        "{} flow: call/put ratio {:.2}, volume {:.1}x average, {} block prints, price {}",
        direction,
        call_put_ratio,
        unusual_volume_ratio,
        block_trades,
        if price_confirms { "confirms" } else { "conflicts" }
    );
    if !context.news.is_empty() {
        rationale.push_str(&format!(", news sentiment {:+.2}", news_sentiment));
    }

    SignalResult {
        kind: SignalKind::OptionFlow,
        direction,
        score,
        confidence,
        rationale,
        details,
        extra: Default::default(),
    }
}
