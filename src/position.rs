// =============================================================================
// Position Manager — lifecycle entry -> monitor -> exit
// =============================================================================
//
// Every open position is tracked here until it closes via stop, take,
// time-limit, manual command, or kill-switch. Exactly one `Outcome` is
// produced per close, except for adopted (pre-existing) positions, which are
// removed silently (Open Question 4).
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{now_ns, CloseReason, Label, Side};

/// An open or recently-closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub qty: f64,
    pub stop_price: f64,
    pub take_price: f64,
    pub opened_at_ns: u64,
    pub max_hold_ns: u64,
    /// Most favourable mark price seen since entry (highest for a long,
    /// lowest for a short). Supporting state for the optional trailing-stop
    /// behaviour; initialised to `entry_price` on open.
    #[serde(default)]
    pub peak_favorable_price: f64,
    /// `true` for a position the engine discovered already open on the
    /// exchange at boot rather than one it entered itself. Never produces
    /// an `Outcome` on close.
    #[serde(default)]
    pub adopted: bool,
}

impl Position {
    /// Unrealised PnL in USD at `mark_price`, ignoring fees.
    pub fn unrealised_pnl_usd(&self, mark_price: f64) -> f64 {
        (mark_price - self.entry_price) * self.qty * self.side.sign()
    }

    /// Advance `peak_favorable_price` if `mark_price` is more favourable
    /// than anything seen so far. Never moves it backwards.
    pub fn update_peak_favorable_price(&mut self, mark_price: f64) {
        match self.side {
            Side::Long => {
                if mark_price > self.peak_favorable_price {
                    self.peak_favorable_price = mark_price;
                }
            }
            Side::Short => {
                if mark_price < self.peak_favorable_price {
                    self.peak_favorable_price = mark_price;
                }
            }
        }
    }

    /// Whether `mark_price`/`now_ns` triggers an automatic exit, and which
    /// reason applies. Checked in the order time-limit, stop, take —
    /// time-limit takes priority when a single tick satisfies more than one
    /// condition.
    pub fn check_exit(&self, mark_price: f64, now_ns: u64) -> Option<CloseReason> {
        if now_ns.saturating_sub(self.opened_at_ns) >= self.max_hold_ns {
            return Some(CloseReason::TimeLimit);
        }
        match self.side {
            Side::Long => {
                if mark_price <= self.stop_price {
                    return Some(CloseReason::Stop);
                }
                if mark_price >= self.take_price {
                    return Some(CloseReason::Take);
                }
            }
            Side::Short => {
                if mark_price >= self.stop_price {
                    return Some(CloseReason::Stop);
                }
                if mark_price <= self.take_price {
                    return Some(CloseReason::Take);
                }
            }
        }
        None
    }
}

/// A closed position's labelled record, fed to the Model Oracle and the
/// session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub qty: f64,
    pub opened_at_ns: u64,
    pub closed_at_ns: u64,
    pub close_reason: CloseReason,
    pub label: Label,
    pub pnl_usd: f64,
}

impl Outcome {
    fn new(position: &Position, exit_price: f64, close_reason: CloseReason) -> Self {
        let pnl_usd = (exit_price - position.entry_price) * position.qty * position.side.sign();
        Self {
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            qty: position.qty,
            opened_at_ns: position.opened_at_ns,
            closed_at_ns: now_ns(),
            close_reason,
            label: if pnl_usd >= 0.0 { Label::Win } else { Label::Loss },
            pnl_usd,
        }
    }
}

/// Tracks all open positions, one per symbol. A symbol may have at most one
/// open position at a time (Risk Gate's uniqueness check enforces entry;
/// this type enforces it structurally on `open`).
pub struct PositionManager {
    open: RwLock<HashMap<String, Position>>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(HashMap::new()),
        }
    }

    /// Record a newly entered position. Returns `false` without mutating
    /// state if `symbol` already has an open position — callers should have
    /// already checked this via the Risk Gate, so this is a structural
    /// backstop, not the primary enforcement point.
    pub fn open_position(&self, position: Position) -> bool {
        let mut guard = self.open.write();
        if guard.contains_key(&position.symbol) {
            warn!(symbol = %position.symbol, "refusing to open duplicate position");
            return false;
        }
        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry_price = position.entry_price,
            qty = position.qty,
            adopted = position.adopted,
            "position opened"
        );
        guard.insert(position.symbol.clone(), position);
        true
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.open.read().get(symbol).cloned()
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.open.read().contains_key(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.open.read().keys().cloned().collect()
    }

    /// Close `symbol`'s position at `exit_price` for `reason`. Returns the
    /// `Outcome` unless the position was `adopted`, in which case the close
    /// is logged but no outcome is produced (Open Question 4), or the
    /// symbol had no open position.
    pub fn close_position(
        &self,
        symbol: &str,
        exit_price: f64,
        reason: CloseReason,
    ) -> Option<Outcome> {
        let position = self.open.write().remove(symbol)?;
        info!(
            symbol,
            reason = %reason,
            exit_price,
            adopted = position.adopted,
            "position closed"
        );
        if position.adopted {
            return None;
        }
        Some(Outcome::new(&position, exit_price, reason))
    }

    /// Scan all open positions against their latest mark price, closing and
    /// returning an `Outcome` for each that has hit stop/take/time-limit.
    /// Symbols with no entry in `marks` are left untouched.
    pub fn check_all_exits(&self, marks: &HashMap<String, f64>) -> Vec<Outcome> {
        let now = now_ns();
        let due: Vec<(String, f64, CloseReason)> = {
            let mut guard = self.open.write();
            guard
                .values_mut()
                .filter_map(|p| {
                    let mark = *marks.get(&p.symbol)?;
                    p.update_peak_favorable_price(mark);
                    let reason = p.check_exit(mark, now)?;
                    Some((p.symbol.clone(), mark, reason))
                })
                .collect()
        };

        due.into_iter()
            .filter_map(|(symbol, mark, reason)| self.close_position(&symbol, mark, reason))
            .collect()
    }

    /// Close every open position with `CloseReason::KillSwitch` at its last
    /// known mark price, used when the engine halts.
    pub fn close_all_for_kill_switch(&self, marks: &HashMap<String, f64>) -> Vec<Outcome> {
        let symbols = self.open_symbols();
        symbols
            .into_iter()
            .filter_map(|symbol| {
                let mark = marks
                    .get(&symbol)
                    .copied()
                    .or_else(|| self.get(&symbol).map(|p| p.entry_price))?;
                self.close_position(&symbol, mark, CloseReason::KillSwitch)
            })
            .collect()
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: Side::Long,
            entry_price: 100.0,
            qty: 1.0,
            stop_price: 99.0,
            take_price: 102.0,
            opened_at_ns: 0,
            max_hold_ns: 1_000_000_000,
            peak_favorable_price: 100.0,
            adopted: false,
        }
    }

    #[test]
    fn long_stop_triggers_below_stop_price() {
        let p = long_position("BTCUSDT");
        assert_eq!(p.check_exit(98.5, 10), Some(CloseReason::Stop));
    }

    #[test]
    fn long_take_triggers_above_take_price() {
        let p = long_position("BTCUSDT");
        assert_eq!(p.check_exit(102.5, 10), Some(CloseReason::Take));
    }

    #[test]
    fn long_time_limit_triggers_after_max_hold() {
        let p = long_position("BTCUSDT");
        assert_eq!(p.check_exit(100.0, 2_000_000_000), Some(CloseReason::TimeLimit));
    }

    #[test]
    fn no_exit_inside_bounds_and_time() {
        let p = long_position("BTCUSDT");
        assert_eq!(p.check_exit(100.5, 10), None);
    }

    #[test]
    fn time_limit_takes_priority_over_a_simultaneous_stop_or_take() {
        let p = long_position("BTCUSDT");
        // Both the time limit and the stop are breached on this tick;
        // time-limit must win.
        assert_eq!(
            p.check_exit(98.5, 2_000_000_000),
            Some(CloseReason::TimeLimit)
        );
        assert_eq!(
            p.check_exit(102.5, 2_000_000_000),
            Some(CloseReason::TimeLimit)
        );
    }

    #[test]
    fn short_side_exit_conditions_are_mirrored() {
        let mut p = long_position("ETHUSDT");
        p.side = Side::Short;
        p.stop_price = 101.0;
        p.take_price = 98.0;
        assert_eq!(p.check_exit(101.5, 1), Some(CloseReason::Stop));
        assert_eq!(p.check_exit(97.5, 1), Some(CloseReason::Take));
        assert_eq!(p.check_exit(100.0, 1), None);
    }

    #[test]
    fn peak_favorable_price_only_advances_in_the_favourable_direction() {
        let mut p = long_position("BTCUSDT");
        p.update_peak_favorable_price(101.0);
        assert_eq!(p.peak_favorable_price, 101.0);
        p.update_peak_favorable_price(100.5);
        assert_eq!(p.peak_favorable_price, 101.0);

        let mut short = long_position("ETHUSDT");
        short.side = Side::Short;
        short.peak_favorable_price = 100.0;
        short.update_peak_favorable_price(99.0);
        assert_eq!(short.peak_favorable_price, 99.0);
        short.update_peak_favorable_price(99.5);
        assert_eq!(short.peak_favorable_price, 99.0);
    }

    #[test]
    fn duplicate_open_is_refused() {
        let mgr = PositionManager::new();
        assert!(mgr.open_position(long_position("BTCUSDT")));
        assert!(!mgr.open_position(long_position("BTCUSDT")));
        assert_eq!(mgr.open_count(), 1);
    }

    #[test]
    fn close_produces_outcome_with_correct_label() {
        let mgr = PositionManager::new();
        mgr.open_position(long_position("BTCUSDT"));
        let outcome = mgr.close_position("BTCUSDT", 102.0, CloseReason::Take).unwrap();
        assert_eq!(outcome.label, Label::Win);
        assert!((outcome.pnl_usd - 2.0).abs() < 1e-9);
        assert!(!mgr.is_open("BTCUSDT"));
    }

    #[test]
    fn close_with_loss_labels_loss() {
        let mgr = PositionManager::new();
        mgr.open_position(long_position("BTCUSDT"));
        let outcome = mgr.close_position("BTCUSDT", 99.0, CloseReason::Stop).unwrap();
        assert_eq!(outcome.label, Label::Loss);
        assert!(outcome.pnl_usd < 0.0);
    }

    #[test]
    fn adopted_position_close_produces_no_outcome() {
        let mgr = PositionManager::new();
        let mut p = long_position("BTCUSDT");
        p.adopted = true;
        mgr.open_position(p);
        let outcome = mgr.close_position("BTCUSDT", 101.0, CloseReason::Manual);
        assert!(outcome.is_none());
        assert!(!mgr.is_open("BTCUSDT"));
    }

    #[test]
    fn check_all_exits_closes_only_triggered_symbols() {
        let mgr = PositionManager::new();
        mgr.open_position(long_position("BTCUSDT"));
        mgr.open_position(long_position("ETHUSDT"));

        let mut marks = HashMap::new();
        marks.insert("BTCUSDT".to_string(), 102.5); // hits take
        marks.insert("ETHUSDT".to_string(), 100.5); // stays open

        let outcomes = mgr.check_all_exits(&marks);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].symbol, "BTCUSDT");
        assert!(mgr.is_open("ETHUSDT"));
        assert!(!mgr.is_open("BTCUSDT"));
    }

    #[test]
    fn kill_switch_closes_everything() {
        let mgr = PositionManager::new();
        mgr.open_position(long_position("BTCUSDT"));
        mgr.open_position(long_position("ETHUSDT"));
        let marks = HashMap::new();
        let outcomes = mgr.close_all_for_kill_switch(&marks);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(mgr.open_count(), 0);
        assert!(outcomes.iter().all(|o| o.close_reason == CloseReason::KillSwitch));
    }
}
