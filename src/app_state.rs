// =============================================================================
// Shared Engine State — the dispatch loop's sole piece of mutable state
// =============================================================================
//
// `AppState` is read by the control surface and written only by the dispatch
// loop in `engine.rs`, per the single-mutator discipline. Every
// field uses interior mutability (`RwLock`/atomics) so the control surface can
// take a consistent snapshot without blocking the hot loop for long, but the
// loop itself is the only writer of trading state — the control surface only
// enqueues commands the loop applies at the next tick boundary.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Settings;
use crate::error::EngineError;
use crate::indicators::IndicatorSet;
use crate::market_data::STALE_GAP_RESET_NS;
use crate::position::{Position, PositionManager};
use crate::precision::PrecisionCatalog;
use crate::risk::RiskGate;
use crate::types::{now_ns, BalanceInfo, EngineState, Tick};

/// Cap on the `recent_errors` ring buffer exposed in the `/state` snapshot.
pub const MAX_RECENT_ERRORS: usize = 50;

/// One entry in the bounded recent-errors log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub kind: String,
    pub symbol: Option<String>,
    pub at: String,
}

/// Per-symbol counters surfaced in the `/state` snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SymbolStats {
    pub ticks: u64,
    pub signals: u64,
    pub dropped_ticks: u64,
}

/// Consistent, point-in-time view of the engine returned by `GET /state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub engine_state: EngineState,
    pub balance_estimate: Vec<BalanceInfo>,
    pub open_positions: Vec<Position>,
    pub daily_pnl: f64,
    pub daily_loss_floor_usd: f64,
    pub peak_equity_usd: f64,
    pub current_drawdown_usd: f64,
    pub settings: Settings,
    pub per_symbol_stats: HashMap<String, SymbolStats>,
    pub recent_errors: Vec<ErrorRecord>,
    pub session_start_ns: u64,
    pub version: u64,
}

/// Shared state the dispatch loop owns and the control surface reads.
pub struct AppState {
    pub session_start_ns: u64,

    engine_state: RwLock<EngineState>,
    settings: RwLock<Settings>,

    pub risk: Arc<RiskGate>,
    pub positions: Arc<PositionManager>,
    pub precision: Arc<PrecisionCatalog>,

    indicators: RwLock<HashMap<String, IndicatorSet>>,
    last_tick: RwLock<HashMap<String, Tick>>,
    per_symbol_stats: RwLock<HashMap<String, SymbolStats>>,

    balances: RwLock<Vec<BalanceInfo>>,
    recent_errors: RwLock<VecDeque<ErrorRecord>>,

    /// Cumulative realised PnL since session start (never resets on a daily
    /// rollover, unlike `RiskGate::daily_pnl_usd`).
    equity_usd: RwLock<f64>,
    /// High-water mark of `equity_usd` over the session.
    peak_equity_usd: RwLock<f64>,

    /// Bumped on every state mutation; surfaced in `Snapshot` so a polling
    /// control-surface client can tell two reads apart without diffing them.
    version: AtomicU64,
}

impl AppState {
    pub fn new(
        settings: Settings,
        risk: Arc<RiskGate>,
        positions: Arc<PositionManager>,
        precision: Arc<PrecisionCatalog>,
    ) -> Self {
        let mut indicators = HashMap::new();
        let mut stats = HashMap::new();
        for symbol in &settings.symbols {
            indicators.insert(symbol.clone(), IndicatorSet::new());
            stats.insert(symbol.clone(), SymbolStats::default());
        }

        Self {
            session_start_ns: now_ns(),
            engine_state: RwLock::new(EngineState::Starting),
            settings: RwLock::new(settings),
            risk,
            positions,
            precision,
            indicators: RwLock::new(indicators),
            last_tick: RwLock::new(HashMap::new()),
            per_symbol_stats: RwLock::new(stats),
            balances: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
            equity_usd: RwLock::new(0.0),
            peak_equity_usd: RwLock::new(0.0),
            version: AtomicU64::new(0),
        }
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    // -- engine lifecycle ----------------------------------------------

    pub fn engine_state(&self) -> EngineState {
        *self.engine_state.read()
    }

    pub fn set_engine_state(&self, state: EngineState) {
        *self.engine_state.write() = state;
        self.bump_version();
    }

    // -- settings --------------------------------------------------------

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn replace_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
        self.bump_version();
    }

    // -- symbol tracking (indicators + stats) ----------------------------

    /// Start tracking a newly active symbol. No-op if already tracked.
    pub fn track_symbol(&self, symbol: &str) {
        self.indicators
            .write()
            .entry(symbol.to_string())
            .or_insert_with(IndicatorSet::new);
        self.per_symbol_stats
            .write()
            .entry(symbol.to_string())
            .or_insert_with(SymbolStats::default);
        self.bump_version();
    }

    /// Stop tracking a symbol removed from the active set. Indicator state
    /// and accumulated stats are dropped; the session log already has the
    /// history of any outcomes produced while it was active.
    pub fn untrack_symbol(&self, symbol: &str) {
        self.indicators.write().remove(symbol);
        self.per_symbol_stats.write().remove(symbol);
        self.last_tick.write().remove(symbol);
        self.bump_version();
    }

    /// Feed one tick through `symbol`'s indicator set, recording it as the
    /// symbol's latest known tick and incrementing its tick counter. Returns
    /// `None` if the symbol isn't tracked (e.g. removed mid-flight).
    ///
    /// A gap since the previous tick larger than `STALE_GAP_RESET_NS`
    /// (reconnect/outage) discards the symbol's indicator set and starts a
    /// fresh warm-up rather than bridge stale state across the gap.
    pub fn record_tick(&self, symbol: &str, tick: Tick) -> Option<crate::indicators::IndicatorSnapshot> {
        let previous = self.last_tick.write().insert(symbol.to_string(), tick);
        if let Some(stats) = self.per_symbol_stats.write().get_mut(symbol) {
            stats.ticks += 1;
        }

        let mut indicators = self.indicators.write();
        if !indicators.contains_key(symbol) {
            self.bump_version();
            return None;
        }

        if let Some(prev) = previous {
            let gap = tick.timestamp_ns.saturating_sub(prev.timestamp_ns);
            if gap > STALE_GAP_RESET_NS {
                warn!(symbol, gap_ns = gap, "tick gap exceeds staleness threshold, resetting indicator warm-up");
                indicators.insert(symbol.to_string(), IndicatorSet::new());
            }
        }

        let snapshot = indicators.get_mut(symbol).map(|set| set.update(&tick));
        drop(indicators);
        self.bump_version();
        snapshot
    }

    pub fn record_dropped_tick(&self, symbol: &str) {
        if let Some(stats) = self.per_symbol_stats.write().get_mut(symbol) {
            stats.dropped_ticks += 1;
        }
    }

    pub fn record_signal_emitted(&self, symbol: &str) {
        if let Some(stats) = self.per_symbol_stats.write().get_mut(symbol) {
            stats.signals += 1;
        }
    }

    pub fn last_tick(&self, symbol: &str) -> Option<Tick> {
        self.last_tick.read().get(symbol).copied()
    }

    /// Age in nanoseconds of `symbol`'s last known tick as of `now_ns`, or
    /// `u64::MAX` if no tick has ever been seen (treated as maximally stale).
    pub fn tick_age_ns(&self, symbol: &str, now: u64) -> u64 {
        match self.last_tick(symbol) {
            Some(t) => now.saturating_sub(t.timestamp_ns),
            None => u64::MAX,
        }
    }

    /// Latest mark prices for every symbol with a known tick, used to drive
    /// `PositionManager::check_all_exits`.
    pub fn mark_prices(&self) -> HashMap<String, f64> {
        self.last_tick
            .read()
            .iter()
            .map(|(symbol, tick)| (symbol.clone(), tick.price))
            .collect()
    }

    // -- balances ----------------------------------------------------------

    pub fn set_balances(&self, balances: Vec<BalanceInfo>) {
        *self.balances.write() = balances;
        self.bump_version();
    }

    // -- equity / drawdown ------------------------------------------------

    /// Roll a closed position's realised PnL into the session equity curve
    /// and its high-water mark. Unlike `RiskGate::daily_pnl_usd`, this never
    /// resets on a day rollover — it tracks the whole session.
    pub fn record_realised_pnl(&self, pnl_usd: f64) {
        let mut equity = self.equity_usd.write();
        *equity += pnl_usd;
        let equity = *equity;

        let mut peak = self.peak_equity_usd.write();
        if equity > *peak {
            *peak = equity;
        }
        self.bump_version();
    }

    pub fn equity_usd(&self) -> f64 {
        *self.equity_usd.read()
    }

    pub fn peak_equity_usd(&self) -> f64 {
        *self.peak_equity_usd.read()
    }

    /// Drawdown from the session's equity high-water mark, in USD. Zero at
    /// or above the peak.
    pub fn current_drawdown_usd(&self) -> f64 {
        self.peak_equity_usd() - self.equity_usd()
    }

    // -- error log -----------------------------------------------------

    /// Append a component error to the bounded recent-errors log, evicting
    /// the oldest entry once `MAX_RECENT_ERRORS` is reached.
    pub fn push_error(&self, symbol: Option<&str>, err: &EngineError) {
        crate::error::log_engine_error(symbol.unwrap_or("-"), err);

        let code = match err {
            EngineError::FilterRejected { code, .. } => Some(code.clone()),
            _ => None,
        };

        let mut log = self.recent_errors.write();
        if log.len() >= MAX_RECENT_ERRORS {
            log.pop_front();
        }
        log.push_back(ErrorRecord {
            message: err.to_string(),
            code,
            kind: err.kind().to_string(),
            symbol: symbol.map(|s| s.to_string()),
            at: Utc::now().to_rfc3339(),
        });
    }

    // -- snapshot ----------------------------------------------------------

    /// A consistent point-in-time view for `GET /state`. Each field is read
    /// from its own lock independently; since only the dispatch loop ever
    /// writes, a reader never observes a torn update within a single field,
    /// and cross-field consistency only matters to within one tick.
    pub fn snapshot(&self) -> Snapshot {
        let settings = self.settings();
        Snapshot {
            engine_state: self.engine_state(),
            balance_estimate: self.balances.read().clone(),
            open_positions: self
                .positions
                .open_symbols()
                .into_iter()
                .filter_map(|s| self.positions.get(&s))
                .collect(),
            daily_pnl: self.risk.daily_pnl_usd(),
            daily_loss_floor_usd: settings.daily_loss_floor_usd,
            peak_equity_usd: self.peak_equity_usd(),
            current_drawdown_usd: self.current_drawdown_usd(),
            settings,
            per_symbol_stats: self.per_symbol_stats.read().clone(),
            recent_errors: self.recent_errors.read().iter().cloned().collect(),
            session_start_ns: self.session_start_ns,
            version: self.version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseReason, Side};

    fn state() -> AppState {
        AppState::new(
            Settings::default(),
            Arc::new(RiskGate::new()),
            Arc::new(PositionManager::new()),
            Arc::new(PrecisionCatalog::new()),
        )
    }

    fn tick(price: f64, ts: u64) -> Tick {
        Tick {
            price,
            volume: 1.0,
            bid: None,
            ask: None,
            timestamp_ns: ts,
            taker_sold: Some(false),
        }
    }

    #[test]
    fn new_state_tracks_configured_symbols() {
        let s = state();
        assert!(s.last_tick("BTCUSDT").is_none());
        s.record_tick("BTCUSDT", tick(100.0, 1));
        assert_eq!(s.last_tick("BTCUSDT").unwrap().price, 100.0);
    }

    #[test]
    fn untracked_symbol_yields_no_snapshot_on_tick() {
        let s = state();
        assert!(s.record_tick("ETHUSDT", tick(100.0, 1)).is_none());
    }

    #[test]
    fn track_and_untrack_symbol_round_trips() {
        let s = state();
        s.track_symbol("ETHUSDT");
        assert!(s.record_tick("ETHUSDT", tick(100.0, 1)).is_some());
        s.untrack_symbol("ETHUSDT");
        assert!(s.last_tick("ETHUSDT").is_none());
    }

    #[test]
    fn tick_age_is_max_for_unseen_symbol() {
        let s = state();
        assert_eq!(s.tick_age_ns("BTCUSDT", now_ns()), u64::MAX);
    }

    #[test]
    fn push_error_caps_recent_errors_log() {
        let s = state();
        for i in 0..(MAX_RECENT_ERRORS + 10) {
            s.push_error(Some("BTCUSDT"), &EngineError::Transient(format!("err {i}")));
        }
        assert_eq!(s.snapshot().recent_errors.len(), MAX_RECENT_ERRORS);
    }

    #[test]
    fn snapshot_reflects_open_positions() {
        let s = state();
        s.positions.open_position(Position {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            qty: 1.0,
            stop_price: 99.0,
            take_price: 102.0,
            opened_at_ns: 0,
            max_hold_ns: 1_000_000_000,
            peak_favorable_price: 100.0,
            adopted: false,
        });
        let snap = s.snapshot();
        assert_eq!(snap.open_positions.len(), 1);
        assert_eq!(snap.open_positions[0].symbol, "BTCUSDT");

        s.positions.close_position("BTCUSDT", 101.0, CloseReason::Manual);
        assert!(s.snapshot().open_positions.is_empty());
    }

    #[test]
    fn large_tick_gap_resets_indicator_warm_up() {
        let s = state();
        for i in 0..60u64 {
            let snap = s.record_tick("BTCUSDT", tick(100.0 + (i % 5) as f64, i * 1_000_000_000)).unwrap();
            if i == 59 {
                assert!(snap.is_ready());
            }
        }

        let gapped = s
            .record_tick(
                "BTCUSDT",
                tick(100.0, 59_000_000_000 + STALE_GAP_RESET_NS + 1),
            )
            .unwrap();
        assert!(!gapped.is_ready());
    }

    #[test]
    fn equity_tracks_realised_pnl_and_peak_drawdown() {
        let s = state();
        assert_eq!(s.equity_usd(), 0.0);
        assert_eq!(s.peak_equity_usd(), 0.0);
        assert_eq!(s.current_drawdown_usd(), 0.0);

        s.record_realised_pnl(50.0);
        assert_eq!(s.equity_usd(), 50.0);
        assert_eq!(s.peak_equity_usd(), 50.0);
        assert_eq!(s.current_drawdown_usd(), 0.0);

        s.record_realised_pnl(-20.0);
        assert_eq!(s.equity_usd(), 30.0);
        assert_eq!(s.peak_equity_usd(), 50.0);
        assert_eq!(s.current_drawdown_usd(), 20.0);

        s.record_realised_pnl(40.0);
        assert_eq!(s.equity_usd(), 70.0);
        assert_eq!(s.peak_equity_usd(), 70.0);
        assert_eq!(s.current_drawdown_usd(), 0.0);
    }

    #[test]
    fn engine_state_transitions_are_observable() {
        let s = state();
        assert_eq!(s.engine_state(), EngineState::Starting);
        s.set_engine_state(EngineState::Running);
        assert_eq!(s.engine_state(), EngineState::Running);
    }
}
