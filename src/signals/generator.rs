// =============================================================================
// Signal Generator — weighted multi-component scoring
// =============================================================================
//
// Five weighted components combine into a single score in roughly `[-1, 1]`:
// trend 0.30, momentum 0.25, mean-reversion 0.20, order-flow 0.15,
// volume-confirmation 0.10. A signal fires only once every indicator has
// cleared warm-up, the magnitude clears `min_signal_strength`, and the
// symbol's cooldown has elapsed.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::cooldown::Cooldown;
use crate::indicators::IndicatorSnapshot;
use crate::types::Side;

pub const WEIGHT_TREND: f64 = 0.30;
pub const WEIGHT_MOMENTUM: f64 = 0.25;
pub const WEIGHT_MEAN_REVERSION: f64 = 0.20;
pub const WEIGHT_ORDER_FLOW: f64 = 0.15;
pub const WEIGHT_VOLUME_CONFIRMATION: f64 = 0.10;

/// Volume-confirmation magnitude reduction applied when the volume ratio
/// falls strictly below 1.0.
const VOLUME_PENALTY_FACTOR: f64 = 0.30;

/// The five weighted components that make up a signal's score, each roughly
/// in `[-1, 1]` before weighting — exposed for diagnostics and testing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalComponents {
    pub trend: f64,
    pub momentum: f64,
    pub mean_reversion: f64,
    pub order_flow: f64,
    pub volume_confirmation: f64,
}

impl SignalComponents {
    /// Weighted sum — the raw score before side/strength are derived.
    pub fn score(&self) -> f64 {
        WEIGHT_TREND * self.trend
            + WEIGHT_MOMENTUM * self.momentum
            + WEIGHT_ORDER_FLOW * self.order_flow
            + WEIGHT_MEAN_REVERSION * self.mean_reversion
            + self.volume_confirmation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub strength: f64,
    pub timestamp_ns: u64,
    pub components: SignalComponents,
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Derive the five weighted components from one symbol's indicator snapshot,
/// its latest price, and its current volume ratio (tick volume / rolling
/// average volume).
fn derive_components(
    snapshot: &IndicatorSnapshot,
    price: f64,
    volume_ratio: f64,
    momentum_threshold: f64,
    volume_threshold: f64,
) -> Option<SignalComponents> {
    // SMA5 > SMA10 > SMA20 is bullish, the reverse is bearish; anything else
    // contributes nothing.
    let trend = snapshot.trend_signal?;

    let momentum = clamp_unit(snapshot.momentum? / momentum_threshold);

    // Bollinger band breach or RSI>70/RSI<30 signals an overextended move
    // due to revert: a breach above (or RSI>70) favours a short bias, a
    // breach below (or RSI<30) favours a long bias. A tick that breaches
    // both sides at once (bands mixed with a contradicting RSI) is treated
    // as no signal rather than guessed.
    let rsi = snapshot.rsi?;
    let bands = snapshot.bollinger?;
    let overbought = price > bands.upper || rsi > 70.0;
    let oversold = price < bands.lower || rsi < 30.0;
    let mean_reversion = match (oversold, overbought) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    };

    let order_flow = clamp_unit(snapshot.order_flow_imbalance?);

    let provisional = WEIGHT_TREND * trend
        + WEIGHT_MOMENTUM * momentum
        + WEIGHT_MEAN_REVERSION * mean_reversion
        + WEIGHT_ORDER_FLOW * order_flow;

    // Volume confirmation only amplifies or dampens the provisional
    // direction — it never introduces a direction of its own.
    let volume_confirmation = if volume_ratio >= volume_threshold {
        WEIGHT_VOLUME_CONFIRMATION * provisional.signum()
    } else if volume_ratio < 1.0 {
        -VOLUME_PENALTY_FACTOR * provisional
    } else {
        0.0
    };

    Some(SignalComponents {
        trend,
        momentum,
        mean_reversion,
        order_flow,
        volume_confirmation,
    })
}

/// Stateful signal generator: owns the per-symbol cooldown tracker across
/// calls to `generate`.
#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    cooldown: Cooldown,
}

impl SignalGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one symbol's latest indicator snapshot, price, and volume
    /// ratio, emitting a `Signal` when:
    /// 1. every component indicator has cleared warm-up,
    /// 2. the weighted score's magnitude clears `min_signal_strength`,
    /// 3. the symbol's cooldown has elapsed.
    ///
    /// Does not check whether the symbol already has an open position —
    /// that is the Risk Gate's responsibility.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &mut self,
        symbol: &str,
        snapshot: &IndicatorSnapshot,
        price: f64,
        volume_ratio: f64,
        now_ns: u64,
        min_signal_strength: f64,
        min_signal_interval_ns: u64,
        momentum_threshold: f64,
        volume_threshold: f64,
    ) -> Option<Signal> {
        let components = derive_components(
            snapshot,
            price,
            volume_ratio,
            momentum_threshold,
            volume_threshold,
        )?;
        let score = components.score();

        if score.abs() < min_signal_strength {
            return None;
        }
        if !self.cooldown.is_ready(symbol, now_ns, min_signal_interval_ns) {
            return None;
        }

        self.cooldown.record(symbol, now_ns);

        Some(Signal {
            symbol: symbol.to_string(),
            side: if score > 0.0 { Side::Long } else { Side::Short },
            strength: score.abs(),
            timestamp_ns: now_ns,
            components,
        })
    }
}
