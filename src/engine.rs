// =============================================================================
// Engine Supervisor — the dispatch loop
// =============================================================================
//
// Boots the other components, owns `AppState`, and runs the single dispatch
// loop that is the sole mutator of trading state. Ticks, control commands,
// and a maintenance timer are merged through one `tokio::select!`: I/O runs
// on worker tasks that feed this loop bounded channels, and everything
// numeric — indicator updates, risk checks, signal scoring — is inlined here
// with no further suspension.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::config::Settings;
use crate::control::{ControlCommand, EngineCommand};
use crate::error::EngineError;
use crate::execution::{ExchangeClient, OrderExecutorHandle};
use crate::indicators::ring::DEFAULT_CAPACITY;
use crate::indicators::sma::Sma;
use crate::oracle::ModelOracle;
use crate::persistence::{SessionEvent, SessionLog};
use crate::position::{Outcome, Position};
use crate::precision::{self, PrecisionCatalog};
use crate::signals::SignalGenerator;
use crate::types::{now_ns, CloseReason, EngineState, Side, Tick};

/// Grace period the supervisor waits for `close_all` to finish before it
/// gives up and exits non-zero.
pub const GRACE_SHUTDOWN_NS: u64 = 10_000_000_000;

/// Process exit codes reported by `shutdown()`.
pub mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const FATAL: i32 = 1;
    pub const HALTED: i32 = 2;
    pub const GRACE_TIMEOUT: i32 = 3;
}

pub struct Engine {
    pub state: Arc<AppState>,
    oracle: Arc<dyn ModelOracle>,
    executor: OrderExecutorHandle,
    exchange: Arc<dyn ExchangeClient>,
    outcome_tx: mpsc::Sender<Outcome>,
    session_log: Option<Arc<SessionLog>>,
    signal_gen: SignalGenerator,
    volume_sma: HashMap<String, Sma>,
}

impl Engine {
    pub fn new(
        state: Arc<AppState>,
        oracle: Arc<dyn ModelOracle>,
        executor: OrderExecutorHandle,
        exchange: Arc<dyn ExchangeClient>,
        outcome_tx: mpsc::Sender<Outcome>,
        session_log: Option<Arc<SessionLog>>,
    ) -> Self {
        Self {
            state,
            oracle,
            executor,
            exchange,
            outcome_tx,
            session_log,
            signal_gen: SignalGenerator::new(),
            volume_sma: HashMap::new(),
        }
    }

    /// Run the dispatch loop until `shutdown_rx` fires, or `tick_rx`/`cmd_rx`
    /// close unexpectedly. A `Halted` engine state (daily-loss kill-switch)
    /// does NOT stop this loop on its own — the control surface stays up so
    /// an operator can inspect state and resume; only an explicit shutdown
    /// signal (main.rs's Ctrl-C/SIGTERM handler) ends the process.
    pub async fn run(
        mut self,
        mut tick_rx: mpsc::Receiver<(String, Tick)>,
        mut cmd_rx: mpsc::Receiver<EngineCommand>,
        mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> i32 {
        self.state.set_engine_state(EngineState::Running);
        info!("engine supervisor running");

        let mut maintenance = tokio::time::interval(std::time::Duration::from_secs(3600));
        maintenance.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                tick = tick_rx.recv() => {
                    match tick {
                        Some((symbol, t)) => self.handle_tick(&symbol, t).await,
                        None => {
                            warn!("tick channel closed, shutting down");
                            break;
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c).await,
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = maintenance.tick() => self.handle_maintenance().await,
                _ = &mut shutdown_rx => {
                    info!("shutdown signal received");
                    break;
                }
            }

            if self.state.engine_state() == EngineState::Stopped {
                break;
            }
        }

        self.shutdown().await
    }

    async fn shutdown(&self) -> i32 {
        let halted = self.state.engine_state() == EngineState::Halted;
        self.state.set_engine_state(EngineState::Stopped);
        let deadline = now_ns() + GRACE_SHUTDOWN_NS;
        while self.state.positions.open_count() > 0 && now_ns() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        if let Some(log) = &self.session_log {
            let settings = self.state.settings();
            let _ = log.append(&SessionEvent::Settings { settings });
            let _ = log.append(&SessionEvent::SymbolsChanged {
                active_symbols: self.state.positions.open_symbols(),
            });
        }

        if self.state.positions.open_count() > 0 {
            warn!(
                residual = self.state.positions.open_count(),
                "grace shutdown elapsed with residual open positions"
            );
            return exit_code::GRACE_TIMEOUT;
        }

        if halted {
            return exit_code::HALTED;
        }
        exit_code::CLEAN
    }

    // -- tick handling -----------------------------------------------------

    async fn handle_tick(&mut self, symbol: &str, tick: Tick) {
        let Some(snapshot) = self.state.record_tick(symbol, tick) else {
            return;
        };

        let mut marks = HashMap::with_capacity(1);
        marks.insert(symbol.to_string(), tick.price);
        let outcomes = self.state.positions.check_all_exits(&marks);
        for outcome in outcomes {
            self.finalize_outcome(outcome).await;
        }

        let engine_state = self.state.engine_state();
        if engine_state != EngineState::Running {
            return;
        }

        let settings = self.state.settings();
        if settings.paused {
            return;
        }
        if self.state.positions.is_open(symbol) {
            return;
        }
        if !snapshot.is_ready() {
            return;
        }

        let volume_ratio = self.update_volume_ratio(symbol, tick.volume);

        let Some(signal) = self.signal_gen.generate(
            symbol,
            &snapshot,
            tick.price,
            volume_ratio,
            tick.timestamp_ns,
            settings.min_signal_strength,
            settings.min_signal_interval_ns,
            settings.momentum_threshold,
            settings.volume_threshold,
        ) else {
            return;
        };

        self.state.record_signal_emitted(symbol);
        self.attempt_entry(signal, tick, &settings).await;
    }

    fn update_volume_ratio(&mut self, symbol: &str, volume: f64) -> f64 {
        let sma = self
            .volume_sma
            .entry(symbol.to_string())
            .or_insert_with(|| Sma::new(DEFAULT_CAPACITY.min(20)));
        let avg = sma.update(volume);
        match avg {
            Some(avg) if avg > 0.0 => volume / avg,
            _ => 1.0,
        }
    }

    async fn attempt_entry(&mut self, signal: crate::signals::Signal, tick: Tick, settings: &Settings) {
        let symbol = signal.symbol.clone();
        let now = tick.timestamp_ns;
        let tick_age = self.state.tick_age_ns(&symbol, now);

        let result = self.state.risk.check_entry(
            &symbol,
            settings,
            self.state.positions.open_count(),
            self.state.positions.is_open(&symbol),
            tick_age,
            0,
        );

        if let Err(rejection) = result {
            self.state
                .push_error(Some(&symbol), &EngineError::RiskRejected(rejection.to_string()));
            return;
        }

        let features = vec![
            signal.components.trend,
            signal.components.momentum,
            signal.components.mean_reversion,
            signal.components.order_flow,
            signal.components.volume_confirmation,
        ];

        let prediction = self.oracle.predict(&symbol, &features).await;
        let raw_stop_take = self
            .oracle
            .dynamic_stop_take(&symbol, tick.price, signal.side, &features, prediction.confidence)
            .await;
        let stop_pct = settings.clamp_stop_pct(raw_stop_take.stop_pct);
        let take_pct = settings.clamp_take_pct(raw_stop_take.take_pct);

        let raw_qty = settings.position_size_usd / tick.price;
        let normalised = match self.state.precision.normalise_order(&symbol, raw_qty, tick.price) {
            Ok(n) => n,
            Err(reason) => {
                self.state.push_error(
                    Some(&symbol),
                    &EngineError::FilterRejected {
                        code: format!("{reason:?}"),
                        msg: reason.to_string(),
                    },
                );
                return;
            }
        };

        match self
            .executor
            .submit(&symbol, signal.side.entry_order_side(), &normalised.qty_str, false)
            .await
        {
            Ok(body) => {
                let entry_price = body
                    .get("avgPrice")
                    .and_then(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64()))
                    .filter(|p| *p > 0.0)
                    .unwrap_or(tick.price);

                let (stop_price, take_price) = stop_take_prices(signal.side, entry_price, stop_pct, take_pct);

                let position = Position {
                    symbol: symbol.clone(),
                    side: signal.side,
                    entry_price,
                    qty: normalised.qty,
                    stop_price,
                    take_price,
                    opened_at_ns: now,
                    max_hold_ns: settings.max_hold_ns,
                    peak_favorable_price: entry_price,
                    adopted: false,
                };
                self.state.positions.open_position(position);
            }
            Err(EngineError::FilterRejected { code, msg }) => {
                self.state
                    .push_error(Some(&symbol), &EngineError::FilterRejected { code, msg });
                self.refresh_precision_catalog().await;
            }
            Err(e) => self.state.push_error(Some(&symbol), &e),
        }
    }

    async fn finalize_outcome(&mut self, outcome: Outcome) {
        let settings = self.state.settings();
        self.state.risk.record_realised_pnl(outcome.pnl_usd, &settings);
        self.state.record_realised_pnl(outcome.pnl_usd);

        if let Some(log) = &self.session_log {
            let _ = log.append(&SessionEvent::Outcome {
                outcome: outcome.clone(),
            });
        }
        let _ = self.outcome_tx.try_send(outcome);

        if self.state.risk.is_killed() && self.state.engine_state() != EngineState::Halted {
            warn!("daily loss floor breached, halting engine");
            self.state.set_engine_state(EngineState::Halted);
            self.close_all(CloseReason::KillSwitch).await;
        }
    }

    /// Close every open position sequentially; kill-switch close-all is
    /// explicitly not parallel, to respect executor queue
    /// capacity).
    async fn close_all(&mut self, reason: CloseReason) {
        let symbols = self.state.positions.open_symbols();
        for symbol in symbols {
            self.close_one(&symbol, reason).await;
        }
    }

    async fn close_one(&mut self, symbol: &str, reason: CloseReason) {
        let Some(position) = self.state.positions.get(symbol) else {
            return;
        };
        let mark = self.state.last_tick(symbol).map(|t| t.price).unwrap_or(position.entry_price);

        let normalised = match self.state.precision.normalise_order(symbol, position.qty, mark) {
            Ok(n) => n,
            Err(_) => precision::NormalisedOrder {
                qty_str: format!("{:.6}", position.qty),
                qty: position.qty,
                ref_price: mark,
            },
        };

        let exit_price = match self
            .executor
            .submit(symbol, position.side.exit_order_side(), &normalised.qty_str, true)
            .await
        {
            Ok(body) => body
                .get("avgPrice")
                .and_then(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64()))
                .filter(|p| *p > 0.0)
                .unwrap_or(mark),
            Err(e) => {
                self.state.push_error(Some(symbol), &e);
                mark
            }
        };

        if let Some(outcome) = self.state.positions.close_position(symbol, exit_price, reason) {
            self.finalize_outcome(outcome).await;
        }
    }

    async fn refresh_precision_catalog(&self) {
        match self.exchange.fetch_exchange_info().await {
            Ok(body) => match precision::parse_exchange_info(&body) {
                Ok(rules) => self.state.precision.install(rules),
                Err(e) => warn!(error = %e, "failed to parse refreshed exchangeInfo"),
            },
            Err(e) => self.state.push_error(None, &e),
        }
    }

    async fn handle_maintenance(&self) {
        let settings = self.state.settings();
        if let Some(log) = &self.session_log {
            let _ = log.append(&SessionEvent::Settings { settings });
        }
        self.refresh_precision_catalog().await;
    }

    // -- command handling ----------------------------------------------

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::UpdateSetting { key, value, reply } => {
                let mut settings = self.state.settings();
                let result = apply_setting(&mut settings, &key, &value);
                if result.is_ok() {
                    self.state.replace_settings(settings);
                }
                let _ = reply.send(result);
            }
            EngineCommand::ClosePosition { symbol, reply } => {
                match symbol {
                    Some(symbol) => {
                        if !self.state.positions.is_open(&symbol) {
                            let _ = reply.send(Err(format!("no open position for {symbol}")));
                        } else {
                            self.close_one(&symbol, CloseReason::Manual).await;
                            let _ = reply.send(Ok(()));
                        }
                    }
                    None => {
                        self.close_all(CloseReason::Manual).await;
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            EngineCommand::Control { command, reply } => {
                match command {
                    ControlCommand::Pause => {
                        let mut settings = self.state.settings();
                        settings.paused = true;
                        self.state.replace_settings(settings);
                    }
                    ControlCommand::Resume => {
                        self.state.risk.resume();
                        let mut settings = self.state.settings();
                        settings.paused = false;
                        self.state.replace_settings(settings);
                        if self.state.engine_state() == EngineState::Halted {
                            self.state.set_engine_state(EngineState::Running);
                        }
                    }
                    ControlCommand::EmergencyStop => {
                        self.state.risk.engage_kill_switch("emergency stop command");
                        self.state.set_engine_state(EngineState::Halted);
                        self.close_all(CloseReason::KillSwitch).await;
                    }
                }
                let _ = reply.send(Ok(()));
            }
            EngineCommand::AddSymbol { symbol, reply } => {
                let mut settings = self.state.settings();
                if !settings.symbols.contains(&symbol) {
                    settings.symbols.push(symbol.clone());
                    self.state.replace_settings(settings);
                }
                self.state.track_symbol(&symbol);
                let _ = reply.send(Ok(()));
            }
            EngineCommand::RemoveSymbol { symbol, reply } => {
                if self.state.positions.is_open(&symbol) {
                    self.close_one(&symbol, CloseReason::Manual).await;
                }
                let mut settings = self.state.settings();
                settings.symbols.retain(|s| s != &symbol);
                self.state.replace_settings(settings);
                self.state.untrack_symbol(&symbol);
                self.volume_sma.remove(&symbol);
                let _ = reply.send(Ok(()));
            }
        }
    }
}

fn stop_take_prices(side: Side, entry_price: f64, stop_pct: f64, take_pct: f64) -> (f64, f64) {
    match side {
        Side::Long => (entry_price * (1.0 - stop_pct), entry_price * (1.0 + take_pct)),
        Side::Short => (entry_price * (1.0 + stop_pct), entry_price * (1.0 - take_pct)),
    }
}

/// Apply one `{key, value}` settings update, validating range/type per key.
/// Unknown keys and out-of-range values are rejected with a message naming
/// the offending key.
fn apply_setting(settings: &mut Settings, key: &str, value: &serde_json::Value) -> Result<(), String> {
    fn as_f64(v: &serde_json::Value, key: &str) -> Result<f64, String> {
        v.as_f64().ok_or_else(|| format!("{key}: expected a number"))
    }
    fn as_u64(v: &serde_json::Value, key: &str) -> Result<u64, String> {
        v.as_u64().ok_or_else(|| format!("{key}: expected a non-negative integer"))
    }
    fn as_bool(v: &serde_json::Value, key: &str) -> Result<bool, String> {
        v.as_bool().ok_or_else(|| format!("{key}: expected a boolean"))
    }

    match key {
        "position_size_usd" => {
            let v = as_f64(value, key)?;
            if v <= 0.0 {
                return Err(format!("{key}: must be positive"));
            }
            settings.position_size_usd = v;
        }
        "max_concurrent" => {
            let v = as_u64(value, key)? as usize;
            if v == 0 {
                return Err(format!("{key}: must be at least 1"));
            }
            settings.max_concurrent = v;
        }
        "min_signal_strength" => {
            let v = as_f64(value, key)?;
            if !(0.0..=1.0).contains(&v) {
                return Err(format!("{key}: must be in [0, 1]"));
            }
            settings.min_signal_strength = v;
        }
        "min_signal_interval_ns" => settings.min_signal_interval_ns = as_u64(value, key)?,
        "stop_floor_pct" => settings.stop_floor_pct = as_f64(value, key)?,
        "stop_cap_pct" => settings.stop_cap_pct = as_f64(value, key)?,
        "take_floor_pct" => settings.take_floor_pct = as_f64(value, key)?,
        "take_cap_pct" => settings.take_cap_pct = as_f64(value, key)?,
        "daily_loss_floor_usd" => {
            let v = as_f64(value, key)?;
            if v >= 0.0 {
                return Err(format!("{key}: must be negative"));
            }
            settings.daily_loss_floor_usd = v;
        }
        "max_hold_ns" => settings.max_hold_ns = as_u64(value, key)?,
        "leverage" => settings.leverage = as_u64(value, key)? as u32,
        "paused" => settings.paused = as_bool(value, key)?,
        "max_correlated" => settings.max_correlated = as_u64(value, key)? as usize,
        "momentum_threshold" => {
            let v = as_f64(value, key)?;
            if v <= 0.0 {
                return Err(format!("{key}: must be positive"));
            }
            settings.momentum_threshold = v;
        }
        "volume_threshold" => settings.volume_threshold = as_f64(value, key)?,
        other => return Err(format!("unknown setting key: {other}")),
    }
    Ok(())
}
