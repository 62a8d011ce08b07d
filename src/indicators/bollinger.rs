// =============================================================================
// Bollinger Bands — incremental O(1) update
// =============================================================================
//
// Middle band = SMA(period); upper/lower = middle +/- num_std * population
// standard deviation. Width is the normalised distance
// `(upper - lower) / middle * 100`.
//
// Running sum and sum-of-squares are maintained alongside the ring so each
// update is O(1) rather than rescanning the window.
// =============================================================================

use super::ring::Ring;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    ring: Ring,
    sum: f64,
    sum_sq: f64,
    period: usize,
    num_std: f64,
}

impl Bollinger {
    pub fn new(period: usize, num_std: f64) -> Self {
        assert!(period > 0, "bollinger period must be positive");
        Self {
            ring: Ring::new(period),
            sum: 0.0,
            sum_sq: 0.0,
            period,
            num_std,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<BollingerBands> {
        if let Some(evicted) = self.ring.push(price) {
            self.sum -= evicted;
            self.sum_sq -= evicted * evicted;
        }
        self.sum += price;
        self.sum_sq += price * price;
        self.value()
    }

    pub fn value(&self) -> Option<BollingerBands> {
        if self.ring.len() < self.period {
            return None;
        }
        let n = self.period as f64;
        let middle = self.sum / n;
        if middle == 0.0 {
            return None;
        }
        // Population variance; clamp at 0 to absorb floating-point drift.
        let variance = (self.sum_sq / n - middle * middle).max(0.0);
        let std_dev = variance.sqrt();

        let upper = middle + self.num_std * std_dev;
        let lower = middle - self.num_std * std_dev;
        let width = (upper - lower) / middle * 100.0;

        width.is_finite().then_some(BollingerBands {
            upper,
            middle,
            lower,
            width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_period_samples() {
        let mut bb = Bollinger::new(20, 2.0);
        for i in 1..20 {
            assert!(bb.update(i as f64).is_none());
        }
        assert!(bb.update(20.0).is_some());
    }

    #[test]
    fn bands_straddle_middle() {
        let mut bb = Bollinger::new(20, 2.0);
        let mut last = None;
        for i in 1..=20 {
            last = bb.update(i as f64);
        }
        let bands = last.unwrap();
        assert!(bands.upper > bands.middle);
        assert!(bands.lower < bands.middle);
        assert!(bands.width > 0.0);
    }

    #[test]
    fn flat_series_has_zero_width() {
        let mut bb = Bollinger::new(20, 2.0);
        let mut last = None;
        for _ in 0..20 {
            last = bb.update(100.0);
        }
        assert!((last.unwrap().width).abs() < 1e-9);
    }

    #[test]
    fn matches_closed_form_on_known_window() {
        let mut bb = Bollinger::new(5, 2.0);
        let prices = [10.0, 12.0, 11.0, 13.0, 9.0];
        let mut last = None;
        for &p in &prices {
            last = bb.update(p);
        }
        let middle = prices.iter().sum::<f64>() / 5.0;
        let variance = prices.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / 5.0;
        let expected_upper = middle + 2.0 * variance.sqrt();
        assert!((last.unwrap().middle - middle).abs() < 1e-9);
        assert!((last.unwrap().upper - expected_upper).abs() < 1e-9);
    }
}
