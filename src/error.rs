// =============================================================================
// Error Taxonomy — tagged result variants for every recoverable condition
// =============================================================================
//
// The dispatch loop never propagates an error out of a component call; every
// component converts failures into one of the variants below before
// returning. Only truly unrecoverable conditions (`Fatal`) terminate the
// supervisor. Logging levels: WARN for `Transient`, ERROR for
// `FilterRejected`/`Rejected`/`Fatal`, INFO for `RiskRejected` (expected
// operational noise), WARN for `DataStale`/`Halted`.
// =============================================================================

use serde::Serialize;
use thiserror::Error;

/// The seven error kinds recognised by the engine, per the error-handling
/// design. Each variant carries the structured context the classifying
/// component already has in hand.
#[derive(Debug, Clone, Error, Serialize)]
pub enum EngineError {
    /// Retry candidate: transport failure, 5xx, timeout, executor queue full.
    #[error("transient: {0}")]
    Transient(String),

    /// Order-shape violation reported by the exchange, matched against a
    /// known filter-error code; never retriable. Triggers a Precision
    /// Catalog refresh.
    #[error("filter rejected ({code}): {msg}")]
    FilterRejected { code: String, msg: String },

    /// Any other non-retriable 4xx response from the exchange, not matched
    /// to a known filter-error code. Never retriable and never triggers a
    /// Precision Catalog refresh.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A risk-gate check vetoed the order.
    #[error("risk rejected: {0}")]
    RiskRejected(String),

    /// Indicator/stream data for a symbol is too old to trust.
    #[error("data stale for {symbol}: last tick {age_ns} ns ago")]
    DataStale { symbol: String, age_ns: u64 },

    /// Kill-switch engaged — only observe/close/resume accepted.
    #[error("engine halted: {0}")]
    Halted(String),

    /// Unrecoverable condition; propagated to the supervisor which logs once
    /// and exits with code 1.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// The `tracing` level this error kind should be logged at.
    pub fn log_level(&self) -> tracing::Level {
        match self {
            Self::Transient(_) => tracing::Level::WARN,
            Self::FilterRejected { .. } => tracing::Level::ERROR,
            Self::Rejected(_) => tracing::Level::ERROR,
            Self::RiskRejected(_) => tracing::Level::INFO,
            Self::DataStale { .. } => tracing::Level::WARN,
            Self::Halted(_) => tracing::Level::WARN,
            Self::Fatal(_) => tracing::Level::ERROR,
        }
    }

    /// Short machine-readable tag for counters and the dashboard error log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "Transient",
            Self::FilterRejected { .. } => "FilterRejected",
            Self::Rejected(_) => "Rejected",
            Self::RiskRejected(_) => "RiskRejected",
            Self::DataStale { .. } => "DataStale",
            Self::Halted(_) => "Halted",
            Self::Fatal(_) => "Fatal",
        }
    }
}

/// Log `err` at its designated level with the given `symbol` context.
pub fn log_engine_error(symbol: &str, err: &EngineError) {
    match err.log_level() {
        tracing::Level::ERROR => tracing::error!(symbol, kind = err.kind(), %err, "component error"),
        tracing::Level::WARN => tracing::warn!(symbol, kind = err.kind(), %err, "component error"),
        _ => tracing::info!(symbol, kind = err.kind(), %err, "component error"),
    }
}
