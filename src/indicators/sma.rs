// =============================================================================
// Simple Moving Average — incremental O(1) update
// =============================================================================

use super::ring::Ring;

#[derive(Debug, Clone)]
pub struct Sma {
    ring: Ring,
    sum: f64,
    min_samples: usize,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            ring: Ring::new(period),
            sum: 0.0,
            min_samples: period,
        }
    }

    /// Push one price and return the current average, or `None` until
    /// `period` samples have been observed.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(evicted) = self.ring.push(price) {
            self.sum -= evicted;
        }
        self.sum += price;
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.ring.len() < self.min_samples {
            return None;
        }
        Some(self.sum / self.ring.len() as f64)
    }
}

/// SMA-5/10/20 stack used by the Signal Generator's trend component.
#[derive(Debug, Clone)]
pub struct SmaStack {
    pub fast: Sma,
    pub mid: Sma,
    pub slow: Sma,
}

impl SmaStack {
    pub fn new() -> Self {
        Self {
            fast: Sma::new(5),
            mid: Sma::new(10),
            slow: Sma::new(20),
        }
    }

    pub fn update(&mut self, price: f64) {
        self.fast.update(price);
        self.mid.update(price);
        self.slow.update(price);
    }

    /// `Some(1.0)` when SMA5 > SMA10 > SMA20 (bullish stack), `Some(-1.0)`
    /// when the order is fully reversed (bearish stack), `Some(0.0)` for any
    /// other ordering, once all three are seeded; `None` while warming up.
    pub fn trend_signal(&self) -> Option<f64> {
        let fast = self.fast.value()?;
        let mid = self.mid.value()?;
        let slow = self.slow.value()?;

        if fast > mid && mid > slow {
            Some(1.0)
        } else if fast < mid && mid < slow {
            Some(-1.0)
        } else {
            Some(0.0)
        }
    }
}

impl Default for SmaStack {
    fn default() -> Self {
        Self::new()
    }
}
