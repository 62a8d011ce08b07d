// =============================================================================
// Precision Catalog — per-symbol exchange quantisation rules
// =============================================================================
//
// Caches lot-size, tick-size, min-notional, and quantity/price step per symbol
// from the exchange's instrument metadata. The mapping is immutable once
// built and is replaced atomically on refresh — never patched in place — so
// concurrent readers never observe a half-updated catalog.
//
// Every quantity the Order Executor sends to the exchange must first pass
// through `normalise_order`. Bypassing this is a bug.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Per-symbol exchange filter set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrecisionRule {
    pub qty_step: f64,
    pub qty_min: f64,
    pub qty_max: f64,
    pub price_step: f64,
    pub min_notional: f64,
    pub qty_precision_digits: u32,
    pub price_precision_digits: u32,
}

/// A quantity/price pair that has passed every exchange filter and is safe
/// to submit to the Order Executor.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalisedOrder {
    /// Formatted with exactly `qty_precision_digits` fractional digits; no
    /// locale separators or scientific notation.
    pub qty_str: String,
    pub qty: f64,
    pub ref_price: f64,
}

/// Why `normalise_order` rejected a candidate quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("symbol not listed in precision catalog")]
    NotListed,
    #[error("quantity below qty_min after step rounding")]
    BelowMinQty,
    #[error("quantity * reference price below min_notional")]
    BelowMinNotional,
    #[error("qty_step is zero — catalog entry is degenerate")]
    ZeroStep,
}

/// Immutable mapping `symbol -> PrecisionRule`, replaceable atomically.
pub struct PrecisionCatalog {
    rules: RwLock<Arc<HashMap<String, PrecisionRule>>>,
}

impl PrecisionCatalog {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Build (or rebuild) the catalog from a freshly fetched rule map. The
    /// old map is dropped only after the new one is installed — readers
    /// never see a partially-populated catalog.
    pub fn install(&self, rules: HashMap<String, PrecisionRule>) {
        info!(symbols = rules.len(), "precision catalog installed");
        *self.rules.write() = Arc::new(rules);
    }

    /// Look up the rule for a single symbol.
    pub fn rule(&self, symbol: &str) -> Option<PrecisionRule> {
        self.rules.read().get(symbol).copied()
    }

    /// Round `raw_qty` down to the nearest multiple of `qty_step`, clamp to
    /// `[qty_min, qty_max]` semantics described below, and verify the
    /// resulting notional clears `min_notional`.
    ///
    /// - Below `qty_min` after rounding down -> `BelowMinQty`.
    /// - Above `qty_max` -> silently reduced to `qty_max` (not rejected).
    /// - `qty * ref_price < min_notional` -> `BelowMinNotional`.
    /// - `qty_step <= 0.0` -> `ZeroStep` (degenerate catalog entry).
    pub fn normalise_order(
        &self,
        symbol: &str,
        raw_qty: f64,
        ref_price: f64,
    ) -> Result<NormalisedOrder, RejectReason> {
        let rule = self.rule(symbol).ok_or(RejectReason::NotListed)?;
        self.normalise_with_rule(&rule, raw_qty, ref_price)
    }

    fn normalise_with_rule(
        &self,
        rule: &PrecisionRule,
        raw_qty: f64,
        ref_price: f64,
    ) -> Result<NormalisedOrder, RejectReason> {
        if rule.qty_step <= 0.0 {
            return Err(RejectReason::ZeroStep);
        }

        let steps = (raw_qty / rule.qty_step).floor();
        let mut qty = steps * rule.qty_step;

        if qty > rule.qty_max {
            qty = (rule.qty_max / rule.qty_step).floor() * rule.qty_step;
        }

        if qty < rule.qty_min {
            return Err(RejectReason::BelowMinQty);
        }

        if qty * ref_price < rule.min_notional {
            return Err(RejectReason::BelowMinNotional);
        }

        let qty_str = format!("{:.*}", rule.qty_precision_digits as usize, qty);

        Ok(NormalisedOrder {
            qty_str,
            qty,
            ref_price,
        })
    }

    /// Format a price to the symbol's `price_precision_digits`, rounding to
    /// the nearest multiple of `price_step`.
    pub fn normalise_price(&self, symbol: &str, raw_price: f64) -> Option<String> {
        let rule = self.rule(symbol)?;
        if rule.price_step <= 0.0 {
            return None;
        }
        let steps = (raw_price / rule.price_step).round();
        let price = steps * rule.price_step;
        Some(format!("{:.*}", rule.price_precision_digits as usize, price))
    }
}

impl Default for PrecisionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a Binance-shaped USD-M futures `exchangeInfo` JSON body into a
/// `symbol -> PrecisionRule` map. Symbols whose filter arrays are missing a
/// required filter are skipped with a warning rather than failing the whole
/// refresh.
pub fn parse_exchange_info(body: &serde_json::Value) -> Result<HashMap<String, PrecisionRule>> {
    let symbols = body
        .get("symbols")
        .and_then(|v| v.as_array())
        .context("exchangeInfo response missing 'symbols' array")?;

    let mut out = HashMap::with_capacity(symbols.len());

    for entry in symbols {
        let symbol = match entry.get("symbol").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => continue,
        };

        let filters = match entry.get("filters").and_then(|v| v.as_array()) {
            Some(f) => f,
            None => {
                warn!(symbol, "exchangeInfo entry missing filters — skipped");
                continue;
            }
        };

        let mut qty_step = None;
        let mut qty_min = None;
        let mut qty_max = None;
        let mut price_step = None;
        let mut min_notional = 0.0_f64;

        for f in filters {
            let ftype = f.get("filterType").and_then(|v| v.as_str()).unwrap_or("");
            match ftype {
                "LOT_SIZE" | "MARKET_LOT_SIZE" if qty_step.is_none() => {
                    qty_step = parse_f64_field(f, "stepSize");
                    qty_min = parse_f64_field(f, "minQty");
                    qty_max = parse_f64_field(f, "maxQty");
                }
                "PRICE_FILTER" => {
                    price_step = parse_f64_field(f, "tickSize");
                }
                "MIN_NOTIONAL" | "NOTIONAL" => {
                    min_notional = parse_f64_field(f, "notional")
                        .or_else(|| parse_f64_field(f, "minNotional"))
                        .unwrap_or(0.0);
                }
                _ => {}
            }
        }

        let (qty_step, qty_min, qty_max, price_step) =
            match (qty_step, qty_min, qty_max, price_step) {
                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                _ => {
                    warn!(symbol, "exchangeInfo entry missing a required filter — skipped");
                    continue;
                }
            };

        let qty_precision_digits = precision_digits(qty_step);
        let price_precision_digits = precision_digits(price_step);

        debug!(symbol, qty_step, qty_min, qty_max, price_step, min_notional, "parsed precision rule");

        out.insert(
            symbol,
            PrecisionRule {
                qty_step,
                qty_min,
                qty_max,
                price_step,
                min_notional,
                qty_precision_digits,
                price_precision_digits,
            },
        );
    }

    Ok(out)
}

fn parse_f64_field(v: &serde_json::Value, field: &str) -> Option<f64> {
    v.get(field).and_then(|x| {
        x.as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| x.as_f64())
    })
}

/// Number of fractional digits implied by a step size like `0.001`.
fn precision_digits(step: f64) -> u32 {
    if step <= 0.0 || !step.is_finite() {
        return 0;
    }
    let s = format!("{step:.10}");
    match s.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}
