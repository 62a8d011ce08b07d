// =============================================================================
// Momentum (rate of change) — incremental O(1) update
// =============================================================================
//
// Momentum over `period` samples: (price_t - price_{t-n}) / price_{t-n}.
// Maintained via a ring buffer of the last `period + 1` prices so the
// reference price is a fixed lookup rather than a rescan.
// =============================================================================

use super::ring::Ring;

#[derive(Debug, Clone)]
pub struct Momentum {
    ring: Ring,
    period: usize,
}

impl Momentum {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "momentum period must be positive");
        Self {
            ring: Ring::new(period + 1),
            period,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        self.ring.push(price);
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.ring.len() <= self.period {
            return None;
        }
        let mut iter = self.ring.iter();
        let reference = iter.next()?;
        let current = self.ring.last()?;
        if reference == 0.0 {
            return None;
        }
        let roc = (current - reference) / reference;
        roc.is_finite().then_some(roc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_period_plus_one_samples() {
        let mut m = Momentum::new(5);
        for i in 1..=5 {
            assert!(m.update(i as f64).is_none());
        }
        assert!(m.update(6.0).is_some());
    }

    #[test]
    fn computes_rate_of_change_over_window() {
        let mut m = Momentum::new(3);
        m.update(100.0);
        m.update(110.0);
        m.update(120.0);
        let roc = m.update(130.0).unwrap();
        assert!((roc - 0.30).abs() < 1e-9);
    }

    #[test]
    fn negative_momentum_on_falling_prices() {
        let mut m = Momentum::new(2);
        m.update(100.0);
        m.update(90.0);
        let roc = m.update(80.0).unwrap();
        assert!(roc < 0.0);
    }

    #[test]
    fn flat_series_has_zero_momentum() {
        let mut m = Momentum::new(3);
        for _ in 0..4 {
            m.update(100.0);
        }
        assert_eq!(m.value(), Some(0.0));
    }
}
