// =============================================================================
// Control Surface — local HTTP/JSON endpoint, plaintext, unauthenticated
// =============================================================================
//
// This surface is deliberately unauthenticated: the operator is expected to
// bind it to a trusted interface rather than the public internet (see
// DESIGN.md for why no bearer-token extractor is wired in here).
//
// Handlers never touch `AppState`'s trading fields directly for anything that
// changes engine behaviour; they enqueue an `EngineCommand` and await its
// reply, so the dispatch loop remains the single mutator.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use super::{ControlCommand, EngineCommand};
use crate::app_state::AppState;

#[derive(Clone)]
pub struct ControlState {
    pub app: Arc<AppState>,
    pub commands: mpsc::Sender<EngineCommand>,
}

pub fn router(state: ControlState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/state", get(get_state))
        .route("/settings", post(post_settings))
        .route("/positions/close", post(post_positions_close))
        .route("/control", post(post_control))
        .route("/symbols/add", post(post_symbols_add))
        .route("/symbols/remove", post(post_symbols_remove))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct ApiResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn err(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
        }
    }
}

async fn get_state(State(state): State<ControlState>) -> impl IntoResponse {
    Json(state.app.snapshot())
}

#[derive(Deserialize)]
struct SettingUpdate {
    key: String,
    value: serde_json::Value,
}

async fn post_settings(
    State(state): State<ControlState>,
    Json(body): Json<SettingUpdate>,
) -> impl IntoResponse {
    dispatch(&state, |reply| EngineCommand::UpdateSetting {
        key: body.key,
        value: body.value,
        reply,
    })
    .await
}

#[derive(Deserialize, Default)]
struct CloseRequest {
    #[serde(default)]
    symbol: Option<String>,
}

async fn post_positions_close(
    State(state): State<ControlState>,
    Json(body): Json<CloseRequest>,
) -> impl IntoResponse {
    dispatch(&state, |reply| EngineCommand::ClosePosition {
        symbol: body.symbol,
        reply,
    })
    .await
}

#[derive(Deserialize)]
struct ControlRequest {
    command: ControlCommand,
}

async fn post_control(
    State(state): State<ControlState>,
    Json(body): Json<ControlRequest>,
) -> impl IntoResponse {
    dispatch(&state, |reply| EngineCommand::Control {
        command: body.command,
        reply,
    })
    .await
}

#[derive(Deserialize)]
struct SymbolRequest {
    symbol: String,
}

async fn post_symbols_add(
    State(state): State<ControlState>,
    Json(body): Json<SymbolRequest>,
) -> impl IntoResponse {
    dispatch(&state, |reply| EngineCommand::AddSymbol {
        symbol: body.symbol,
        reply,
    })
    .await
}

async fn post_symbols_remove(
    State(state): State<ControlState>,
    Json(body): Json<SymbolRequest>,
) -> impl IntoResponse {
    dispatch(&state, |reply| EngineCommand::RemoveSymbol {
        symbol: body.symbol,
        reply,
    })
    .await
}

/// Enqueue a command built from a fresh reply channel and await its outcome,
/// translating queue/channel failures into a synchronous `{ok: false}`
/// response rather than hanging the caller.
async fn dispatch(
    state: &ControlState,
    build: impl FnOnce(oneshot::Sender<Result<(), String>>) -> EngineCommand,
) -> impl IntoResponse {
    let (reply_tx, reply_rx) = oneshot::channel();
    let command = build(reply_tx);

    if state.commands.send(command).await.is_err() {
        warn!("engine command channel closed, control surface degraded");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err("engine dispatch loop is not accepting commands")),
        );
    }

    match reply_rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(ApiResponse::ok())),
        Ok(Err(reason)) => (StatusCode::BAD_REQUEST, Json(ApiResponse::err(reason))),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::err("dispatch loop dropped the reply channel")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::position::PositionManager;
    use crate::precision::PrecisionCatalog;
    use crate::risk::RiskGate;

    fn test_state() -> (ControlState, mpsc::Receiver<EngineCommand>) {
        let app = Arc::new(AppState::new(
            Settings::default(),
            Arc::new(RiskGate::new()),
            Arc::new(PositionManager::new()),
            Arc::new(PrecisionCatalog::new()),
        ));
        let (tx, rx) = mpsc::channel(8);
        (ControlState { app, commands: tx }, rx)
    }

    #[tokio::test]
    async fn dispatch_returns_ok_on_success_reply() {
        let (state, mut rx) = test_state();
        let handle = tokio::spawn(async move {
            dispatch(&state, |reply| EngineCommand::Control {
                command: ControlCommand::Pause,
                reply,
            })
            .await
            .into_response()
        });

        match rx.recv().await.unwrap() {
            EngineCommand::Control { reply, .. } => reply.send(Ok(())).unwrap(),
            _ => panic!("unexpected command"),
        }

        let resp = handle.await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn dispatch_returns_bad_request_on_rejection() {
        let (state, mut rx) = test_state();
        let handle = tokio::spawn(async move {
            dispatch(&state, |reply| EngineCommand::AddSymbol {
                symbol: "XXXUSDT".to_string(),
                reply,
            })
            .await
            .into_response()
        });

        match rx.recv().await.unwrap() {
            EngineCommand::AddSymbol { reply, .. } => {
                reply.send(Err("unknown symbol".to_string())).unwrap()
            }
            _ => panic!("unexpected command"),
        }

        let resp = handle.await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dispatch_reports_unavailable_when_channel_closed() {
        let (state, rx) = test_state();
        drop(rx);
        let resp = dispatch(&state, |reply| EngineCommand::Control {
            command: ControlCommand::Resume,
            reply,
        })
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
