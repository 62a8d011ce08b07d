// =============================================================================
// Incremental Indicator Set
// =============================================================================
//
// Every indicator updates in O(1) per tick from a fixed-capacity ring buffer
// (capacity 200, `ring::DEFAULT_CAPACITY`) rather than rescanning price
// history. `IndicatorSet` bundles one instance of each indicator per symbol
// and publishes `None` ("not ready") until its own warm-up period has
// elapsed.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod momentum;
pub mod ofi;
pub mod ring;
pub mod rsi;
pub mod sma;
pub mod volatility;

use atr::Atr;
use bollinger::{Bollinger, BollingerBands};
use macd::{Macd, MacdValue};
use momentum::Momentum;
use ofi::OrderFlowImbalance;
use rsi::Rsi;
use sma::SmaStack;
use volatility::Volatility;

use crate::types::Tick;

/// A read of every indicator's current state, with `None` for any still
/// warming up.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorSnapshot {
    pub trend_signal: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger: Option<BollingerBands>,
    pub atr_pct: Option<f64>,
    pub volatility: Option<f64>,
    pub momentum: Option<f64>,
    pub order_flow_imbalance: Option<f64>,
}

impl IndicatorSnapshot {
    /// `true` once every component indicator has cleared its warm-up period.
    pub fn is_ready(&self) -> bool {
        self.trend_signal.is_some()
            && self.rsi.is_some()
            && self.macd.is_some()
            && self.bollinger.is_some()
            && self.atr_pct.is_some()
            && self.volatility.is_some()
            && self.momentum.is_some()
            && self.order_flow_imbalance.is_some()
    }
}

/// Per-symbol bundle of every incremental indicator the Signal Generator
/// consumes.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    trend_stack: SmaStack,
    rsi: Rsi,
    macd: Macd,
    bollinger: Bollinger,
    atr: Atr,
    volatility: Volatility,
    momentum: Momentum,
    ofi: OrderFlowImbalance,
}

impl IndicatorSet {
    pub fn new() -> Self {
        Self {
            trend_stack: SmaStack::new(),
            rsi: Rsi::new(14),
            macd: Macd::standard(),
            bollinger: Bollinger::new(20, 2.0),
            atr: Atr::new(14),
            volatility: Volatility::new(30),
            momentum: Momentum::new(10),
            ofi: OrderFlowImbalance::new(50),
        }
    }

    /// Feed one tick through every indicator, returning a snapshot of each
    /// indicator's current value.
    pub fn update(&mut self, tick: &Tick) -> IndicatorSnapshot {
        self.trend_stack.update(tick.price);
        self.rsi.update(tick.price);
        self.macd.update(tick.price);
        self.bollinger.update(tick.price);
        self.atr.update(tick.price);
        self.volatility.update(tick.price);
        self.momentum.update(tick.price);
        self.ofi.update(tick);

        IndicatorSnapshot {
            trend_signal: self.trend_stack.trend_signal(),
            rsi: self.rsi.value(),
            macd: self.macd.value(),
            bollinger: self.bollinger.value(),
            atr_pct: self.atr.as_pct(tick.price),
            volatility: self.volatility.value(),
            momentum: self.momentum.value(),
            order_flow_imbalance: self.ofi.value(),
        }
    }
}

impl Default for IndicatorSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, ts: u64) -> Tick {
        Tick {
            price,
            volume: 1.0,
            bid: Some(price - 0.5),
            ask: Some(price + 0.5),
            timestamp_ns: ts,
            taker_sold: Some(ts % 2 == 0),
        }
    }

    #[test]
    fn not_ready_before_slowest_indicator_warms_up() {
        let mut set = IndicatorSet::new();
        let snap = set.update(&tick(100.0, 0));
        assert!(!snap.is_ready());
    }

    #[test]
    fn becomes_ready_after_enough_ticks() {
        let mut set = IndicatorSet::new();
        let mut snap = IndicatorSnapshot::default();
        for i in 0..100u64 {
            snap = set.update(&tick(100.0 + (i % 7) as f64, i));
        }
        assert!(snap.is_ready());
    }
}
