// =============================================================================
// Average True Range (ATR) — Wilder's smoothing, incremental O(1) update
// =============================================================================
//
// The engine observes a tick stream rather than OHLC bars, so true range here
// is the absolute price change between consecutive ticks:
//   TR_t = |price_t - price_{t-1}|
// ATR is Wilder's smoothed average of TR, seeded with the SMA of the first
// `period` TR values:
//   ATR_0 = mean(TR_1..TR_period)
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_price: Option<f64>,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "ATR period must be positive");
        Self {
            period,
            prev_price: None,
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        let prev = match self.prev_price.replace(price) {
            Some(p) => p,
            None => return None,
        };
        let tr = (price - prev).abs();

        if let Some(prev_atr) = self.value {
            let p = self.period as f64;
            self.value = Some((prev_atr * (p - 1.0) + tr) / p);
        } else {
            self.seed_sum += tr;
            self.seed_count += 1;
            if self.seed_count == self.period {
                self.value = Some(self.seed_sum / self.period as f64);
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// ATR expressed as a fraction of `reference_price`, used by the mean
    /// reversion and stop/take-distance components.
    pub fn as_pct(&self, reference_price: f64) -> Option<f64> {
        let v = self.value?;
        if reference_price == 0.0 {
            return None;
        }
        Some(v / reference_price)
    }
}
