// =============================================================================
// Relative Strength Index (RSI) — Wilder's smoothing, incremental O(1) update
// =============================================================================
//
// Step 1 — track price deltas from consecutive prices.
// Step 2 — seed average gain / average loss with the mean of the first
//          `period` deltas.
// Step 3 — apply Wilder's exponential smoothing thereafter:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RS = avg_gain / avg_loss; RSI = 100 - 100 / (1 + RS)
//
// Thresholds: RSI > 70 => overbought, RSI < 30 => oversold.
// =============================================================================

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_price: Option<f64>,
    seed_gain_sum: f64,
    seed_loss_sum: f64,
    seed_count: usize,
    avg_gain: f64,
    avg_loss: f64,
    value: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "RSI period must be positive");
        Self {
            period,
            prev_price: None,
            seed_gain_sum: 0.0,
            seed_loss_sum: 0.0,
            seed_count: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            value: None,
        }
    }

    /// Push one price and return the current RSI, or `None` until `period`
    /// deltas have seeded the averages.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        let prev = match self.prev_price.replace(price) {
            Some(p) => p,
            None => return None,
        };
        let delta = price - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if self.value.is_none() {
            self.seed_gain_sum += gain;
            self.seed_loss_sum += loss;
            self.seed_count += 1;
            if self.seed_count == self.period {
                self.avg_gain = self.seed_gain_sum / self.period as f64;
                self.avg_loss = self.seed_loss_sum / self.period as f64;
                self.value = rsi_from_averages(self.avg_gain, self.avg_loss);
            }
            return self.value;
        }

        let p = self.period as f64;
        self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
        self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
        self.value = rsi_from_averages(self.avg_gain, self.avg_loss);
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// `(value, label)` with `OVERBOUGHT`/`OVERSOLD`/`NEUTRAL` classification.
    pub fn labelled(&self) -> Option<(f64, &'static str)> {
        let v = self.value?;
        let label = if v >= 70.0 {
            "OVERBOUGHT"
        } else if v <= 30.0 {
            "OVERSOLD"
        } else {
            "NEUTRAL"
        };
        Some((v, label))
    }
}

/// Convert average gain / average loss into an RSI value in `[0, 100]`.
///
/// Both zero => 50.0 (no movement). Loss zero with nonzero gain => 100.0.
/// Returns `None` for a non-finite result.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };
    rsi.is_finite().then_some(rsi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(rsi: &mut Rsi, prices: &[f64]) -> Option<f64> {
        let mut last = None;
        for &p in prices {
            last = rsi.update(p);
        }
        last
    }

    #[test]
    fn not_ready_until_period_deltas_seeded() {
        let mut rsi = Rsi::new(14);
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(feed(&mut rsi, &closes).is_none());
    }

    #[test]
    fn all_gains_saturates_to_100() {
        let mut rsi = Rsi::new(14);
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let last = feed(&mut rsi, &closes).unwrap();
        assert!((last - 100.0).abs() < 1e-9);
    }

    #[test]
    fn all_losses_saturates_to_0() {
        let mut rsi = Rsi::new(14);
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let last = feed(&mut rsi, &closes).unwrap();
        assert!(last.abs() < 1e-9);
    }

    #[test]
    fn flat_market_is_neutral_50() {
        let mut rsi = Rsi::new(14);
        let closes = vec![100.0; 30];
        let last = feed(&mut rsi, &closes).unwrap();
        assert!((last - 50.0).abs() < 1e-9);
    }

    #[test]
    fn stays_within_0_to_100() {
        let mut rsi = Rsi::new(14);
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for &c in &closes {
            if let Some(v) = rsi.update(c) {
                assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
            }
        }
    }

    #[test]
    fn labelled_matches_thresholds() {
        let mut rsi = Rsi::new(14);
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        feed(&mut rsi, &closes);
        let (val, label) = rsi.labelled().unwrap();
        assert!((val - 100.0).abs() < 1e-9);
        assert_eq!(label, "OVERBOUGHT");
    }

    #[test]
    fn labelled_none_before_warm_up() {
        let rsi = Rsi::new(14);
        assert!(rsi.labelled().is_none());
    }
}
