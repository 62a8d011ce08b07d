// =============================================================================
// Rolling volatility — population std-dev of log returns, incremental O(1)
// =============================================================================

use super::ring::Ring;

#[derive(Debug, Clone)]
pub struct Volatility {
    ring: Ring,
    sum: f64,
    sum_sq: f64,
    prev_price: Option<f64>,
    period: usize,
}

impl Volatility {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "volatility period must be positive");
        Self {
            ring: Ring::new(period),
            sum: 0.0,
            sum_sq: 0.0,
            prev_price: None,
            period,
        }
    }

    /// Push one price; returns the standard deviation of log returns over
    /// the trailing window, or `None` until enough returns are buffered.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        let prev = match self.prev_price.replace(price) {
            Some(p) if p > 0.0 && price > 0.0 => p,
            _ => return None,
        };

        let log_return = (price / prev).ln();
        if !log_return.is_finite() {
            return None;
        }

        if let Some(evicted) = self.ring.push(log_return) {
            self.sum -= evicted;
            self.sum_sq -= evicted * evicted;
        }
        self.sum += log_return;
        self.sum_sq += log_return * log_return;
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.ring.len() < self.period {
            return None;
        }
        let n = self.ring.len() as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        Some(variance.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_period_returns_buffered() {
        let mut v = Volatility::new(5);
        for p in [100.0, 101.0, 100.5, 101.2, 100.8] {
            assert!(v.update(p).is_none());
        }
        assert!(v.update(101.5).is_some());
    }

    #[test]
    fn constant_price_has_zero_volatility() {
        let mut v = Volatility::new(5);
        let mut last = None;
        for _ in 0..10 {
            last = v.update(100.0);
        }
        assert!(last.unwrap().abs() < 1e-12);
    }

    #[test]
    fn choppy_series_has_positive_volatility() {
        let mut v = Volatility::new(5);
        let mut last = None;
        for p in [100.0, 105.0, 98.0, 103.0, 96.0, 107.0] {
            last = v.update(p);
        }
        assert!(last.unwrap() > 0.0);
    }

    #[test]
    fn nonpositive_price_is_skipped_without_panicking() {
        let mut v = Volatility::new(3);
        assert!(v.update(100.0).is_none());
        assert!(v.update(-1.0).is_none());
        assert!(v.update(100.0).is_none());
    }
}
