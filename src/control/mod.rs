// =============================================================================
// Control Surface module
// =============================================================================

pub mod rest;

use tokio::sync::oneshot;

/// A command accepted by `POST /control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Pause,
    Resume,
    EmergencyStop,
}

/// A command handed off from the control surface to the dispatch loop,
/// serialised through the same event queue as ticks. Every
/// variant carries a reply channel so the HTTP handler can await the loop's
/// outcome synchronously, from the caller's perspective, without the control
/// surface itself ever mutating engine state.
#[derive(Debug)]
pub enum EngineCommand {
    UpdateSetting {
        key: String,
        value: serde_json::Value,
        reply: oneshot::Sender<Result<(), String>>,
    },
    ClosePosition {
        symbol: Option<String>,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Control {
        command: ControlCommand,
        reply: oneshot::Sender<Result<(), String>>,
    },
    AddSymbol {
        symbol: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    RemoveSymbol {
        symbol: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
}

pub use rest::{router, ControlState};
