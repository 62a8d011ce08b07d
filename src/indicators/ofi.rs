// =============================================================================
// Order-Flow Imbalance (OFI) — incremental O(1) update
// =============================================================================
//
// Ratio of net signed volume to gross volume over a rolling window of ticks,
// in `[-1.0, 1.0]`: +1.0 is all-buy pressure, -1.0 all-sell, 0.0 balanced or
// no aggressor information.
// =============================================================================

use super::ring::Ring;
use crate::types::Tick;

#[derive(Debug, Clone)]
pub struct OrderFlowImbalance {
    signed: Ring,
    gross: Ring,
    signed_sum: f64,
    gross_sum: f64,
    min_samples: usize,
}

impl OrderFlowImbalance {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "OFI period must be positive");
        Self {
            signed: Ring::new(period),
            gross: Ring::new(period),
            signed_sum: 0.0,
            gross_sum: 0.0,
            min_samples: period,
        }
    }

    pub fn update(&mut self, tick: &Tick) -> Option<f64> {
        let signed = tick.signed_volume();
        let gross = tick.volume.abs();

        if let Some(evicted) = self.signed.push(signed) {
            self.signed_sum -= evicted;
        }
        self.signed_sum += signed;

        if let Some(evicted) = self.gross.push(gross) {
            self.gross_sum -= evicted;
        }
        self.gross_sum += gross;

        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.signed.len() < self.min_samples {
            return None;
        }
        if self.gross_sum == 0.0 {
            return Some(0.0);
        }
        Some((self.signed_sum / self.gross_sum).clamp(-1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(volume: f64, taker_sold: Option<bool>) -> Tick {
        Tick {
            price: 100.0,
            volume,
            bid: None,
            ask: None,
            timestamp_ns: 0,
            taker_sold,
        }
    }

    #[test]
    fn not_ready_until_period_ticks() {
        let mut ofi = OrderFlowImbalance::new(3);
        assert!(ofi.update(&tick(1.0, Some(false))).is_none());
        assert!(ofi.update(&tick(1.0, Some(false))).is_none());
        assert!(ofi.update(&tick(1.0, Some(false))).is_some());
    }

    #[test]
    fn all_buys_yield_positive_one() {
        let mut ofi = OrderFlowImbalance::new(3);
        let mut last = None;
        for _ in 0..3 {
            last = ofi.update(&tick(1.0, Some(false)));
        }
        assert_eq!(last, Some(1.0));
    }

    #[test]
    fn all_sells_yield_negative_one() {
        let mut ofi = OrderFlowImbalance::new(3);
        let mut last = None;
        for _ in 0..3 {
            last = ofi.update(&tick(1.0, Some(true)));
        }
        assert_eq!(last, Some(-1.0));
    }

    #[test]
    fn balanced_flow_is_near_zero() {
        let mut ofi = OrderFlowImbalance::new(4);
        ofi.update(&tick(1.0, Some(false)));
        ofi.update(&tick(1.0, Some(true)));
        ofi.update(&tick(1.0, Some(false)));
        let last = ofi.update(&tick(1.0, Some(true)));
        assert_eq!(last, Some(0.0));
    }

    #[test]
    fn unknown_aggressor_contributes_zero_signed_volume() {
        let mut ofi = OrderFlowImbalance::new(2);
        ofi.update(&tick(1.0, None));
        let last = ofi.update(&tick(1.0, None));
        assert_eq!(last, Some(0.0));
    }
}
