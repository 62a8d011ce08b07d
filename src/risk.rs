// =============================================================================
// Risk Gate — ordered pre-trade checks protecting capital
// =============================================================================
//
// Checked in order for every candidate entry, first rejection wins:
//   1. Kill-switch          — engine-wide halt, set once and only cleared by
//                             an explicit resume command.
//   2. Daily loss floor     — cumulative realised PnL for the day has
//                             breached `daily_loss_floor_usd`; trips the
//                             kill-switch itself.
//   3. Concurrency cap      — too many positions already open.
//   4. Symbol uniqueness    — the symbol already has an open position.
//   5. Staleness            — the symbol's market data is older than the
//                             freshness threshold.
//   6. Correlated exposure  — optional: too many open positions share the
//                             candidate's correlation group.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Settings;

/// Ticks older than this are considered stale for entry purposes.
pub const MAX_TICK_AGE_NS: u64 = 5_000_000_000;

/// Why the Risk Gate rejected a candidate entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum RiskRejection {
    #[error("kill-switch engaged")]
    KillSwitch,
    #[error("daily loss floor breached: pnl {pnl} <= floor {floor}")]
    DailyLossFloor { pnl: f64, floor: f64 },
    #[error("too many open positions: {open} >= {max}")]
    TooManyPositions { open: usize, max: usize },
    #[error("symbol already has an open position: {0}")]
    SymbolBusy(String),
    #[error("market data stale for {symbol}: {age_ns} ns")]
    SymbolStale { symbol: String, age_ns: u64 },
    #[error("correlated exposure limit reached for group {group}: {count}")]
    CorrelatedExposure { group: String, count: usize },
}

/// A read-only snapshot of the Risk Gate's internal state for the control
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub killed: bool,
    pub daily_pnl_usd: f64,
    pub daily_loss_floor_usd: f64,
}

/// Ordered pre-trade risk checks plus the kill-switch/daily-PnL circuit
/// breaker. One instance is shared across the whole engine.
pub struct RiskGate {
    killed: AtomicBool,
    daily_pnl_usd: RwLock<f64>,
    /// Optional symbol -> correlation-group mapping; an empty map disables
    /// the correlated-exposure check entirely.
    correlation_groups: RwLock<HashMap<String, String>>,
}

impl RiskGate {
    pub fn new() -> Self {
        Self {
            killed: AtomicBool::new(false),
            daily_pnl_usd: RwLock::new(0.0),
            correlation_groups: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_correlation_groups(&self, groups: HashMap<String, String>) {
        *self.correlation_groups.write() = groups;
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Engage the kill-switch. Idempotent.
    pub fn engage_kill_switch(&self, reason: &str) {
        if !self.killed.swap(true, Ordering::SeqCst) {
            warn!(reason, "kill-switch engaged");
        }
    }

    /// Clear the kill-switch via an explicit operator resume command. Does
    /// NOT reset the daily PnL accumulator.
    pub fn resume(&self) {
        if self.killed.swap(false, Ordering::SeqCst) {
            info!("kill-switch cleared by resume command");
        }
    }

    pub fn daily_pnl_usd(&self) -> f64 {
        *self.daily_pnl_usd.read()
    }

    /// Roll the realised PnL of a closed position into the daily accumulator,
    /// engaging the kill-switch if the configured floor is breached.
    pub fn record_realised_pnl(&self, pnl_usd: f64, settings: &Settings) {
        let mut total = self.daily_pnl_usd.write();
        *total += pnl_usd;
        let total = *total;
        if total <= settings.daily_loss_floor_usd {
            self.engage_kill_switch("daily loss floor breached");
        }
    }

    /// Reset the daily PnL accumulator (e.g. on a UTC day rollover). Does
    /// not affect the kill-switch.
    pub fn reset_daily_pnl(&self) {
        *self.daily_pnl_usd.write() = 0.0;
    }

    pub fn snapshot(&self, settings: &Settings) -> RiskSnapshot {
        RiskSnapshot {
            killed: self.is_killed(),
            daily_pnl_usd: self.daily_pnl_usd(),
            daily_loss_floor_usd: settings.daily_loss_floor_usd,
        }
    }

    /// Run every check in order for a candidate entry on `symbol`.
    ///
    /// - `open_count` — number of currently open positions across all symbols.
    /// - `symbol_already_open` — whether `symbol` itself already has a position.
    /// - `last_tick_age_ns` — age of the most recent tick for `symbol`.
    /// - `same_group_open_count` — open positions sharing `symbol`'s
    ///   correlation group (0 when the symbol has no group membership or
    ///   `settings.max_correlated == 0`).
    pub fn check_entry(
        &self,
        symbol: &str,
        settings: &Settings,
        open_count: usize,
        symbol_already_open: bool,
        last_tick_age_ns: u64,
        same_group_open_count: usize,
    ) -> Result<(), RiskRejection> {
        if self.is_killed() {
            return Err(RiskRejection::KillSwitch);
        }

        let pnl = self.daily_pnl_usd();
        if pnl <= settings.daily_loss_floor_usd {
            return Err(RiskRejection::DailyLossFloor {
                pnl,
                floor: settings.daily_loss_floor_usd,
            });
        }

        if open_count >= settings.max_concurrent {
            return Err(RiskRejection::TooManyPositions {
                open: open_count,
                max: settings.max_concurrent,
            });
        }

        if symbol_already_open {
            return Err(RiskRejection::SymbolBusy(symbol.to_string()));
        }

        if last_tick_age_ns > MAX_TICK_AGE_NS {
            return Err(RiskRejection::SymbolStale {
                symbol: symbol.to_string(),
                age_ns: last_tick_age_ns,
            });
        }

        if settings.max_correlated > 0 {
            let group = self.correlation_groups.read().get(symbol).cloned();
            if let Some(group) = group {
                if same_group_open_count >= settings.max_correlated {
                    return Err(RiskRejection::CorrelatedExposure {
                        group,
                        count: same_group_open_count,
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn kill_switch_blocks_every_entry() {
        let gate = RiskGate::new();
        gate.engage_kill_switch("test");
        let err = gate
            .check_entry("BTCUSDT", &settings(), 0, false, 0, 0)
            .unwrap_err();
        assert_eq!(err, RiskRejection::KillSwitch);
    }

    #[test]
    fn resume_clears_kill_switch() {
        let gate = RiskGate::new();
        gate.engage_kill_switch("test");
        gate.resume();
        assert!(!gate.is_killed());
    }

    #[test]
    fn daily_loss_floor_rejects_and_engages_kill_switch() {
        let gate = RiskGate::new();
        let s = settings();
        gate.record_realised_pnl(s.daily_loss_floor_usd - 1.0, &s);
        assert!(gate.is_killed());
        let err = gate.check_entry("BTCUSDT", &s, 0, false, 0, 0).unwrap_err();
        assert_eq!(err, RiskRejection::KillSwitch);
    }

    #[test]
    fn concurrency_cap_rejects_when_at_max() {
        let gate = RiskGate::new();
        let s = settings();
        let err = gate
            .check_entry("BTCUSDT", &s, s.max_concurrent, false, 0, 0)
            .unwrap_err();
        assert_eq!(
            err,
            RiskRejection::TooManyPositions {
                open: s.max_concurrent,
                max: s.max_concurrent
            }
        );
    }

    #[test]
    fn symbol_uniqueness_rejects_duplicate() {
        let gate = RiskGate::new();
        let s = settings();
        let err = gate.check_entry("BTCUSDT", &s, 0, true, 0, 0).unwrap_err();
        assert_eq!(err, RiskRejection::SymbolBusy("BTCUSDT".to_string()));
    }

    #[test]
    fn stale_data_rejects_entry() {
        let gate = RiskGate::new();
        let s = settings();
        let err = gate
            .check_entry("BTCUSDT", &s, 0, false, MAX_TICK_AGE_NS + 1, 0)
            .unwrap_err();
        assert!(matches!(err, RiskRejection::SymbolStale { .. }));
    }

    #[test]
    fn correlated_exposure_disabled_by_default() {
        let gate = RiskGate::new();
        let mut s = settings();
        s.max_correlated = 0;
        let mut groups = HashMap::new();
        groups.insert("BTCUSDT".to_string(), "majors".to_string());
        gate.set_correlation_groups(groups);
        assert!(gate.check_entry("BTCUSDT", &s, 0, false, 0, 5).is_ok());
    }

    #[test]
    fn correlated_exposure_rejects_when_enabled_and_over_limit() {
        let gate = RiskGate::new();
        let mut s = settings();
        s.max_correlated = 2;
        let mut groups = HashMap::new();
        groups.insert("BTCUSDT".to_string(), "majors".to_string());
        gate.set_correlation_groups(groups);
        let err = gate.check_entry("BTCUSDT", &s, 0, false, 0, 2).unwrap_err();
        assert_eq!(
            err,
            RiskRejection::CorrelatedExposure {
                group: "majors".to_string(),
                count: 2
            }
        );
    }

    #[test]
    fn healthy_entry_passes_all_checks() {
        let gate = RiskGate::new();
        let s = settings();
        assert!(gate.check_entry("BTCUSDT", &s, 0, false, 0, 0).is_ok());
    }
}
