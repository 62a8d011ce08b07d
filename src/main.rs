// =============================================================================
// Aurora Perpetual Scalper — Main Entry Point
// =============================================================================
//
// Boots config/credentials, wires the Precision Catalog, Risk Gate, Position
// Manager and Model Oracle into shared `AppState`, spawns one reconnecting
// market-data stream per symbol and the control-surface HTTP server, then
// runs the engine supervisor's dispatch loop until Ctrl-C.
// =============================================================================

mod app_state;
mod config;
mod control;
mod engine;
mod error;
mod execution;
mod indicators;
mod market_data;
mod oracle;
mod persistence;
mod position;
mod precision;
mod risk;
mod signals;
mod types;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::control::{ControlCommand, ControlState, EngineCommand};
use crate::engine::Engine;
use crate::execution::{BinanceFuturesClient, ExchangeClient};
use crate::oracle::{spawn_outcome_forwarder, HttpOracleClient, ModelOracle, NullOracle, StopTake};
use crate::persistence::SessionLog;
use crate::position::PositionManager;
use crate::precision::{self, PrecisionCatalog};
use crate::risk::RiskGate;

const TICK_CHANNEL_CAPACITY: usize = market_data::DEFAULT_CHANNEL_CAPACITY;
const MERGED_TICK_CAPACITY: usize = 8192;
const COMMAND_CHANNEL_CAPACITY: usize = 64;
const ORDER_QUEUE_CAPACITY: usize = 64;
const ORDER_MAX_RETRIES: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("aurora perpetual scalper starting up");

    let settings_path = std::env::var("SETTINGS_PATH").ok().map(std::path::PathBuf::from);
    let config = match EngineConfig::load(settings_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "fatal: configuration load failed");
            std::process::exit(1);
        }
    };

    let persisted = SessionLog::load_latest(&config.persistence_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to replay session log, starting with fresh state");
        Default::default()
    });
    let settings = persisted.settings.unwrap_or(config.settings);

    info!(symbols = ?settings.symbols, testnet = config.credentials.use_testnet, "settings resolved");

    let session_log = match SessionLog::open(&config.persistence_path) {
        Ok(log) => Some(Arc::new(log)),
        Err(e) => {
            warn!(error = %e, "failed to open session log, continuing without persistence");
            None
        }
    };

    let exchange_client: Arc<dyn ExchangeClient> = Arc::new(BinanceFuturesClient::new(
        config.credentials.api_key.clone(),
        config.credentials.api_secret.clone(),
        config.credentials.use_testnet,
    ));

    let precision_catalog = Arc::new(PrecisionCatalog::new());
    match exchange_client.fetch_exchange_info().await {
        Ok(body) => match precision::parse_exchange_info(&body) {
            Ok(rules) => precision_catalog.install(rules),
            Err(e) => warn!(error = %e, "failed to parse exchangeInfo at boot, catalog starts empty"),
        },
        Err(e) => warn!(error = %e, "failed to fetch exchangeInfo at boot, catalog starts empty"),
    }

    let risk_gate = Arc::new(RiskGate::new());
    let position_manager = Arc::new(PositionManager::new());
    let state = Arc::new(AppState::new(
        settings.clone(),
        risk_gate,
        position_manager,
        precision_catalog,
    ));

    let oracle: Arc<dyn ModelOracle> = match std::env::var("ORACLE_URL") {
        Ok(url) => {
            info!(url, "model oracle configured");
            Arc::new(HttpOracleClient::new(
                url,
                StopTake {
                    stop_pct: settings.stop_floor_pct,
                    take_pct: settings.take_floor_pct,
                },
            ))
        }
        Err(_) => {
            info!("no ORACLE_URL set, using deterministic null oracle");
            Arc::new(NullOracle::default())
        }
    };

    let (executor, _executor_join) =
        execution::spawn_executor(exchange_client.clone(), ORDER_QUEUE_CAPACITY, ORDER_MAX_RETRIES);
    let (outcome_tx, outcome_rx) = mpsc::channel(ORDER_QUEUE_CAPACITY);
    let _oracle_forwarder = spawn_outcome_forwarder(oracle.clone(), outcome_rx);

    let (merged_tick_tx, merged_tick_rx) = mpsc::channel(MERGED_TICK_CAPACITY);
    let mut stream_tasks = Vec::new();
    for symbol in &settings.symbols {
        let (producer, mut symbol_rx) = market_data::tick_channel(symbol.clone(), TICK_CHANNEL_CAPACITY);

        let sym = symbol.clone();
        let use_testnet = config.credentials.use_testnet;
        stream_tasks.push(tokio::spawn(market_data::run_with_reconnect(sym, use_testnet, producer)));

        let forward_symbol = symbol.clone();
        let forward_tx = merged_tick_tx.clone();
        stream_tasks.push(tokio::spawn(async move {
            while let Some(tick) = symbol_rx.recv().await {
                if forward_tx.send((forward_symbol.clone(), tick)).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(merged_tick_tx);
    info!(count = settings.symbols.len(), "market data streams launched");

    let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>(COMMAND_CHANNEL_CAPACITY);

    let control_state = ControlState {
        app: state.clone(),
        commands: cmd_tx.clone(),
    };
    let control_bind_addr = config.control_bind_addr.clone();
    let control_server = tokio::spawn(async move {
        let router = control::router(control_state);
        match tokio::net::TcpListener::bind(&control_bind_addr).await {
            Ok(listener) => {
                info!(addr = %control_bind_addr, "control surface listening");
                if let Err(e) = axum::serve(listener, router).await {
                    error!(error = %e, "control surface server failed");
                }
            }
            Err(e) => error!(addr = %control_bind_addr, error = %e, "failed to bind control surface"),
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let shutdown_cmd_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("shutdown signal received, engaging emergency stop before exit");
        let (reply_tx, reply_rx) = oneshot::channel();
        if shutdown_cmd_tx
            .send(EngineCommand::Control {
                command: ControlCommand::EmergencyStop,
                reply: reply_tx,
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        let _ = shutdown_tx.send(());
    });

    let engine = Engine::new(
        state,
        oracle,
        executor,
        exchange_client,
        outcome_tx,
        session_log,
    );

    let exit_code = engine.run(merged_tick_rx, cmd_rx, shutdown_rx).await;

    control_server.abort();
    for task in stream_tasks {
        task.abort();
    }

    info!(exit_code, "aurora perpetual scalper shut down");
    std::process::exit(exit_code);
}
