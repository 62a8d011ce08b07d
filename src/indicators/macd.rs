// =============================================================================
// MACD (Moving Average Convergence Divergence) — incremental O(1) update
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow); signal line = EMA(macd_line, signal_period);
// histogram = macd - signal. Standard periods 12/26/9.
// =============================================================================

use super::ema::Ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    value: Option<MacdValue>,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
            signal: Ema::new(signal_period),
            value: None,
        }
    }

    pub fn standard() -> Self {
        Self::new(12, 26, 9)
    }

    pub fn update(&mut self, price: f64) -> Option<MacdValue> {
        let fast = self.fast.update(price);
        let slow = self.slow.update(price);

        let (fast, slow) = match (fast, slow) {
            (Some(f), Some(s)) => (f, s),
            _ => return None,
        };

        let macd_line = fast - slow;
        let signal = self.signal.update(macd_line)?;
        let value = MacdValue {
            macd: macd_line,
            signal,
            histogram: macd_line - signal,
        };
        self.value = Some(value);
        Some(value)
    }

    pub fn value(&self) -> Option<MacdValue> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_slow_and_signal_seeded() {
        let mut macd = Macd::new(3, 5, 2);
        for i in 1..5 {
            assert!(macd.update(i as f64).is_none());
        }
    }

    #[test]
    fn produces_value_once_warmed_up() {
        let mut macd = Macd::new(3, 5, 2);
        let mut last = None;
        for i in 1..=20 {
            last = macd.update(i as f64);
        }
        assert!(last.is_some());
        let v = last.unwrap();
        assert!((v.histogram - (v.macd - v.signal)).abs() < 1e-9);
    }

    #[test]
    fn ascending_series_has_positive_macd() {
        let mut macd = Macd::standard();
        let mut last = None;
        for i in 1..=80 {
            last = macd.update(i as f64);
        }
        assert!(last.unwrap().macd > 0.0);
    }

    #[test]
    fn flat_series_macd_converges_to_zero() {
        let mut macd = Macd::new(3, 5, 2);
        let mut last = None;
        for _ in 0..50 {
            last = macd.update(100.0);
        }
        assert!(last.unwrap().macd.abs() < 1e-6);
    }
}
